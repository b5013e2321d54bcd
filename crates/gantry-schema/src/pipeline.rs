use crate::source::CheckoutStage;
use crate::stages::{ImageBuildStage, ImageReleaseStage, IntegrationTestStage, PackageStage};
use crate::status::StageKind;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Declarative pipeline definition (`pipeline_version = 1`).
///
/// Only `[checkout]` is mandatory; every other stage runs when its table is present.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Pipeline {
    pub pipeline_version: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub checkout: CheckoutStage,
    #[serde(default)]
    pub package: Option<PackageStage>,
    #[serde(default)]
    pub image_build: Option<ImageBuildStage>,
    #[serde(default)]
    pub integration_test: Option<IntegrationTestStage>,
    #[serde(default)]
    pub image_release: Option<ImageReleaseStage>,
}

impl Pipeline {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.pipeline_version != 1 {
            return Err(SchemaError::UnsupportedVersion(self.pipeline_version));
        }
        self.checkout.validate()?;
        if let Some(stage) = &self.package {
            stage.validate()?;
        }
        if let Some(stage) = &self.image_build {
            stage.validate()?;
        }
        if let Some(stage) = &self.integration_test {
            stage.validate()?;
        }
        if let Some(stage) = &self.image_release {
            stage.validate()?;
        }
        Ok(())
    }

    /// Configured stages in execution order.
    pub fn stages(&self) -> Vec<StageKind> {
        StageKind::ORDER
            .into_iter()
            .filter(|kind| self.has_stage(*kind))
            .collect()
    }

    pub fn has_stage(&self, kind: StageKind) -> bool {
        match kind {
            StageKind::Checkout => true,
            StageKind::Package => self.package.is_some(),
            StageKind::ImageBuild => self.image_build.is_some(),
            StageKind::IntegrationTest => self.integration_test.is_some(),
            StageKind::ImageRelease => self.image_release.is_some(),
        }
    }
}

pub fn parse_pipeline_str(input: &str) -> Result<Pipeline, SchemaError> {
    let pipeline: Pipeline = toml::from_str(input)?;
    pipeline.validate()?;
    Ok(pipeline)
}

pub fn parse_pipeline_file(path: impl AsRef<Path>) -> Result<Pipeline, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_pipeline_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceKind;
    use crate::stages::{BuildToolKind, ReleaseCondition};

    const FULL: &str = r#"
pipeline_version = 1
name = "toy"

[checkout.main]
kind = "github"
url = "https://github.com/example/toy-dockerfile.git"
ref = "master"

[[checkout.dependencies]]
folder = "dep"
kind = "github"
url = "https://github.com/example/toy-dockerfile.git"

[package.builder]
image = "busybox"
env = { TEST = "TEST" }

[package.build_tool]
name = "maven"
version = "1.0"
cache_dependency = true

[package.unit_test]
commands = ["ls -la"]
outputs = ["README.md"]

[package.package]
commands = ["ls -la"]
outputs = ["README.md"]

[[image_build.builds]]
task_name = "v1"
image_name = "registry.example.com/team/test:v1"
dockerfile_path = "Dockerfile"

[integration_test.config]
image = "busybox:1.24.0"
commands = ["ls", "cd /"]
env = { TEST = "TEST" }

[[integration_test.services]]
name = "testService"
image = "mongo:3.0.5"
commands = ["mongod --smallfiles"]

[[image_release.policies]]
image = "registry.example.com/team/test:v1"

[[image_release.policies]]
image = "registry.example.com/team/test:v1"
condition = { type = "tag", pattern = "v*" }
"#;

    #[test]
    fn parses_full_pipeline() {
        let p = parse_pipeline_str(FULL).expect("should parse");
        assert_eq!(p.name.as_deref(), Some("toy"));
        assert_eq!(p.checkout.main.kind, SourceKind::Github);
        assert_eq!(p.checkout.main.git_ref.as_deref(), Some("master"));
        assert_eq!(p.checkout.dependencies.len(), 1);
        assert_eq!(p.checkout.dependencies[0].folder, "dep");

        let package = p.package.as_ref().unwrap();
        assert_eq!(package.builder.env.get("TEST").map(String::as_str), Some("TEST"));
        let tool = package.build_tool.as_ref().unwrap();
        assert_eq!(tool.name, BuildToolKind::Maven);
        assert!(tool.cache_dependency);
        assert_eq!(package.unit_test.outputs, vec!["README.md"]);

        let release = p.image_release.as_ref().unwrap();
        assert_eq!(release.policies[0].condition, ReleaseCondition::Always);
        assert!(matches!(
            release.policies[1].condition,
            ReleaseCondition::Tag { .. }
        ));

        assert_eq!(p.stages(), StageKind::ORDER.to_vec());
    }

    #[test]
    fn parses_minimal_pipeline() {
        let p = parse_pipeline_str(
            r#"
pipeline_version = 1
[checkout.main]
kind = "local"
url = "/srv/src"
"#,
        )
        .unwrap();
        assert_eq!(p.stages(), vec![StageKind::Checkout]);
        assert!(p.checkout.dependencies.is_empty());
    }

    #[test]
    fn rejects_unknown_fields() {
        let input = r#"
pipeline_version = 1
[checkout.main]
kind = "git"
url = "https://x/app.git"
unknown = true
"#;
        assert!(parse_pipeline_str(input).is_err());
    }

    #[test]
    fn rejects_unknown_build_tool() {
        let input = r#"
pipeline_version = 1
[checkout.main]
kind = "git"
url = "https://x/app.git"
[package.builder]
image = "busybox"
[package.build_tool]
name = "ant"
"#;
        assert!(matches!(
            parse_pipeline_str(input),
            Err(SchemaError::ParseToml(_))
        ));
    }

    #[test]
    fn rejects_wrong_version() {
        let input = r#"
pipeline_version = 2
[checkout.main]
kind = "git"
url = "https://x/app.git"
"#;
        assert!(matches!(
            parse_pipeline_str(input),
            Err(SchemaError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn rejects_missing_checkout() {
        assert!(parse_pipeline_str("pipeline_version = 1\n").is_err());
    }

    #[test]
    fn parse_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, FULL).unwrap();
        let p = parse_pipeline_file(&path).unwrap();
        assert_eq!(p.pipeline_version, 1);
        assert!(parse_pipeline_file(dir.path().join("missing.toml")).is_err());
    }
}
