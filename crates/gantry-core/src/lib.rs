//! Stage execution core for Gantry CI workers.
//!
//! The `StageManager` is bound to one event and exposes one method per stage
//! kind: checkout, image build, package, integration test and image release.
//! Each method maps its stage configuration onto source provider, container
//! engine and workspace operations, and releases every container and network
//! it creates before returning, on success and failure alike. The
//! `EventRunner` drives a whole pipeline through those methods in order and
//! reports each transition to the server.

pub mod checkout;
pub mod concurrency;
pub mod guard;
pub mod image_build;
pub mod integration;
pub mod manager;
pub mod package;
pub mod release;
pub mod runner;
pub mod toolchain;
pub mod workspace;

pub use concurrency::{install_signal_handler, shutdown_requested};
pub use guard::{ContainerGuard, NetworkGuard, ResourceTracker, TrackedResource};
pub use integration::IntegrationReport;
pub use manager::StageManager;
pub use package::{PackageReport, Phase};
pub use release::{condition_met, PushFailure, ReleaseReport};
pub use runner::{EventRunner, RunSummary};
pub use toolchain::{cache_key, toolchain, Toolchain};
pub use workspace::{Workspace, WorkspaceLock, CONTAINER_WORKDIR};

use gantry_runtime::EngineError;
use gantry_schema::{ImageName, SchemaError, SourceKind};
use gantry_scm::ScmError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a stage method did not succeed. Each variant names the offending
/// identifier so the message can be surfaced verbatim in the status record.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("invalid stage configuration: {0}")]
    InvalidConfig(#[from] SchemaError),
    #[error("workspace error at {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no source provider registered for kind '{0}'")]
    UnsupportedSourceKind(SourceKind),
    #[error("checkout of {descriptor} failed: {source}")]
    Checkout {
        descriptor: String,
        #[source]
        source: ScmError,
    },
    #[error("Dockerfile for image '{image}' not found at {}", .path.display())]
    DockerfileNotFound { image: ImageName, path: PathBuf },
    #[error("build of image '{image}' failed: {source}")]
    Build {
        image: ImageName,
        #[source]
        source: EngineError,
    },
    #[error("{phase} command `{command}` exited with code {exit_code}")]
    CommandFailed {
        phase: Phase,
        command: String,
        exit_code: i64,
    },
    #[error("{phase} output '{path}' was not produced")]
    OutputMissing { phase: Phase, path: String },
    #[error("failed to {action} {target}: {source}")]
    ContainerLifecycle {
        action: &'static str,
        target: String,
        #[source]
        source: EngineError,
    },
    #[error("integration test in image '{image}' exited with code {exit_code}")]
    TestFailed { image: ImageName, exit_code: i64 },
    #[error("{} image push(es) failed: {}", .failures.len(), release::describe_failures(.failures))]
    Release {
        pushed: Vec<ImageName>,
        failures: Vec<PushFailure>,
    },
}

impl StageError {
    /// False for a test that ran and reported failure; true for every error
    /// that kept the stage from doing its work.
    pub fn is_fault(&self) -> bool {
        !matches!(self, StageError::TestFailed { .. })
    }

    pub(crate) fn workspace(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StageError::Workspace { path, source }
    }

    pub(crate) fn lifecycle(
        action: &'static str,
        target: impl ToString,
    ) -> impl FnOnce(EngineError) -> Self {
        let target = target.to_string();
        move |source| StageError::ContainerLifecycle {
            action,
            target,
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(#[from] SchemaError),
    #[error("workspace {} is in use by another worker", .0.display())]
    WorkspaceBusy(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
