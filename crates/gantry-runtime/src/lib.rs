//! Container engine client for Gantry stage execution.
//!
//! This crate implements the execution layer the stage manager drives: the
//! blocking `ContainerEngine` trait, a CLI-backed engine for Docker and Podman,
//! an in-memory `MockEngine` for tests and dry runs, tar helpers for copying
//! paths out of containers, and prerequisite checks for the engine binaries.

pub mod archive;
pub mod docker;
pub mod engine;
pub mod mock;
pub mod prereq;

pub use engine::{select_engine, BindMount, ContainerEngine, ContainerSpec, ExecOutput};
pub use mock::{EngineCall, MockEngine};
pub use prereq::{check_engine_prereqs, command_exists, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container engine '{0}' is not available on this system")]
    EngineUnavailable(String),
    #[error("{op} '{target}' failed{}: {stderr}", exit_suffix(.code))]
    CommandFailed {
        op: &'static str,
        target: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("network not found: {0}")]
    NetworkNotFound(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("path '{path}' not found in container {container}")]
    PathNotFound { container: String, path: String },
    #[error("unexpected engine output for {op}: {output}")]
    InvalidOutput { op: &'static str, output: String },
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" (exit {c})")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_display_includes_exit_code() {
        let e = EngineError::CommandFailed {
            op: "build",
            target: "app:v1".to_owned(),
            code: Some(1),
            stderr: "no such file".to_owned(),
        };
        assert_eq!(e.to_string(), "build 'app:v1' failed (exit 1): no such file");
    }

    #[test]
    fn command_failed_display_without_code() {
        let e = EngineError::CommandFailed {
            op: "push",
            target: "app:v1".to_owned(),
            code: None,
            stderr: "killed".to_owned(),
        };
        assert_eq!(e.to_string(), "push 'app:v1' failed: killed");
    }
}
