//! Pipeline definitions, stage configuration and run context for Gantry.
//!
//! This crate defines the schema layer: TOML pipeline parsing (`Pipeline`),
//! the per-stage configuration types consumed by the stage executors, the
//! immutable `RunContext` bound to one event, the `StageResult` status record
//! reported back to the server, and the worker configuration file.

pub mod context;
pub mod pipeline;
pub mod source;
pub mod stages;
pub mod status;
pub mod types;
pub mod worker;

pub use context::{PerformParams, RegistryAuth, RunContext};
pub use pipeline::{parse_pipeline_file, parse_pipeline_str, Pipeline};
pub use source::{CheckoutStage, DependencySource, SourceDescriptor, SourceKind};
pub use stages::{
    BuildTool, BuildToolKind, BuilderImage, CommandSet, ImageBuildInfo, ImageBuildStage,
    ImageReleaseStage, IntegrationTestConfig, IntegrationTestStage, PackageStage,
    ReleaseCondition, ReleasePolicy, ServiceDescriptor,
};
pub use status::{Artifacts, StageKind, StageResult, StageStatus};
pub use types::{ContainerId, EventId, ImageName, NetworkId};
pub use worker::{ServerSection, WorkerConfig};

use std::path::{Component, Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse pipeline: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported pipeline_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("invalid {field} '{path}': {reason}")]
    InvalidPath {
        field: &'static str,
        path: String,
        reason: &'static str,
    },
    #[error("dependency folder '{0}' is declared more than once")]
    DuplicateFolder(String),
    #[error("image '{0}' is built by more than one entry")]
    DuplicateImage(String),
    #[error("service name '{0}' is declared more than once")]
    DuplicateService(String),
    #[error("invalid service name '{0}': expected [a-zA-Z0-9_.-], not starting with '-'")]
    InvalidServiceName(String),
}

/// Check that `path` is relative and stays below the directory it is joined to.
pub fn validate_relative_path(field: &'static str, path: &str) -> Result<(), SchemaError> {
    let invalid = |reason| SchemaError::InvalidPath {
        field,
        path: path.to_owned(),
        reason,
    };
    if path.trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    let mut depth = 0usize;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("must not contain '..'")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("must be relative"));
            }
        }
    }
    if depth == 0 {
        return Err(invalid("must name an entry below the workspace root"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_accepted() {
        assert!(validate_relative_path("folder", "dep").is_ok());
        assert!(validate_relative_path("folder", "./libs/dep").is_ok());
        assert!(validate_relative_path("output", "target/app.jar").is_ok());
    }

    #[test]
    fn escaping_paths_rejected() {
        assert!(validate_relative_path("folder", "").is_err());
        assert!(validate_relative_path("folder", ".").is_err());
        assert!(validate_relative_path("folder", "/etc").is_err());
        assert!(validate_relative_path("folder", "../sibling").is_err());
        assert!(validate_relative_path("folder", "a/../../b").is_err());
    }

    #[test]
    fn error_display_names_field() {
        let e = validate_relative_path("dockerfile_path", "/abs").unwrap_err();
        assert!(e.to_string().contains("dockerfile_path"));
        assert!(e.to_string().contains("/abs"));
    }
}
