use crate::types::ImageName;
use crate::{validate_relative_path, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

fn validate_env(env: &BTreeMap<String, String>) -> Result<(), SchemaError> {
    for key in env.keys() {
        if key.is_empty() || key.contains('=') {
            return Err(SchemaError::InvalidPath {
                field: "environment variable",
                path: key.clone(),
                reason: "name must be non-empty and must not contain '='",
            });
        }
    }
    Ok(())
}

fn validate_image(image: &ImageName, field: &'static str) -> Result<(), SchemaError> {
    if image.trim().is_empty() {
        return Err(SchemaError::EmptyField(field));
    }
    Ok(())
}

// --- image build ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageBuildInfo {
    #[serde(default)]
    pub task_name: Option<String>,
    pub image_name: ImageName,
    /// Dockerfile location relative to the workspace root.
    #[serde(default)]
    pub dockerfile_path: Option<String>,
    /// Inline Dockerfile content; takes precedence over `dockerfile_path`.
    #[serde(default)]
    pub dockerfile: Option<String>,
}

impl ImageBuildInfo {
    pub fn new(image_name: impl Into<ImageName>) -> Self {
        Self {
            image_name: image_name.into(),
            ..Self::default()
        }
    }

    pub fn inline_dockerfile(&self) -> Option<&str> {
        self.dockerfile.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn explicit_dockerfile_path(&self) -> Option<&str> {
        self.dockerfile_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
    }

    /// Name used in logs: the task name when given, the image otherwise.
    pub fn label(&self) -> &str {
        self.task_name
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(self.image_name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageBuildStage {
    #[serde(default)]
    pub builds: Vec<ImageBuildInfo>,
}

impl ImageBuildStage {
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = BTreeSet::new();
        for info in &self.builds {
            validate_image(&info.image_name, "image_build.image_name")?;
            if !seen.insert(info.image_name.as_str()) {
                return Err(SchemaError::DuplicateImage(info.image_name.to_string()));
            }
            if info.inline_dockerfile().is_none() {
                if let Some(path) = info.explicit_dockerfile_path() {
                    validate_relative_path("dockerfile_path", path)?;
                }
            }
        }
        Ok(())
    }
}

// --- package ---

/// Build tools with known provisioning and cache behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildToolKind {
    Maven,
    Gradle,
    Npm,
    Cargo,
    Go,
}

impl BuildToolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildToolKind::Maven => "maven",
            BuildToolKind::Gradle => "gradle",
            BuildToolKind::Npm => "npm",
            BuildToolKind::Cargo => "cargo",
            BuildToolKind::Go => "go",
        }
    }
}

impl fmt::Display for BuildToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildTool {
    pub name: BuildToolKind,
    #[serde(default)]
    pub version: String,
    /// Advisory: a cache miss never fails the stage.
    #[serde(default)]
    pub cache_dependency: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuilderImage {
    pub image: ImageName,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl BuilderImage {
    pub fn new(image: impl Into<ImageName>) -> Self {
        Self {
            image: image.into(),
            env: BTreeMap::new(),
        }
    }
}

/// Commands run in order inside one container, plus the paths they produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSet {
    #[serde(default)]
    pub commands: Vec<String>,
    /// Paths relative to the container working directory.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl CommandSet {
    pub fn new<S: Into<String>>(commands: impl IntoIterator<Item = S>) -> Self {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            outputs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_outputs<S: Into<String>>(mut self, outputs: impl IntoIterator<Item = S>) -> Self {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.outputs.is_empty()
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.commands.iter().any(|c| c.trim().is_empty()) {
            return Err(SchemaError::EmptyField("command"));
        }
        for output in &self.outputs {
            validate_relative_path("output", output)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageStage {
    pub builder: BuilderImage,
    #[serde(default)]
    pub build_tool: Option<BuildTool>,
    #[serde(default)]
    pub unit_test: CommandSet,
    #[serde(default)]
    pub package: CommandSet,
}

impl PackageStage {
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_image(&self.builder.image, "package.builder.image")?;
        validate_env(&self.builder.env)?;
        self.unit_test.validate()?;
        self.package.validate()
    }
}

// --- integration test ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntegrationTestConfig {
    pub image: ImageName,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A sidecar reachable from the test container by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescriptor {
    pub name: String,
    pub image: ImageName,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntegrationTestStage {
    pub config: IntegrationTestConfig,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

fn valid_service_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

impl IntegrationTestStage {
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_image(&self.config.image, "integration_test.config.image")?;
        validate_env(&self.config.env)?;
        let mut seen = BTreeSet::new();
        for service in &self.services {
            if !valid_service_name(&service.name) {
                return Err(SchemaError::InvalidServiceName(service.name.clone()));
            }
            validate_image(&service.image, "integration_test.services.image")?;
            validate_env(&service.env)?;
            if !seen.insert(service.name.as_str()) {
                return Err(SchemaError::DuplicateService(service.name.clone()));
            }
        }
        Ok(())
    }
}

// --- image release ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReleaseCondition {
    #[default]
    Always,
    /// Release when the run's ref is a branch matching `pattern` (`*` wildcards).
    Branch { pattern: String },
    /// Release when the run's ref is a tag matching `pattern` (`*` wildcards).
    Tag { pattern: String },
}

impl fmt::Display for ReleaseCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseCondition::Always => f.write_str("always"),
            ReleaseCondition::Branch { pattern } => write!(f, "branch '{pattern}'"),
            ReleaseCondition::Tag { pattern } => write!(f, "tag '{pattern}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleasePolicy {
    pub image: ImageName,
    #[serde(default)]
    pub condition: ReleaseCondition,
}

impl ReleasePolicy {
    pub fn always(image: impl Into<ImageName>) -> Self {
        Self {
            image: image.into(),
            condition: ReleaseCondition::Always,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageReleaseStage {
    #[serde(default)]
    pub policies: Vec<ReleasePolicy>,
}

impl ImageReleaseStage {
    pub fn validate(&self) -> Result<(), SchemaError> {
        for policy in &self.policies {
            validate_image(&policy.image, "image_release.policies.image")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_dockerfile_wins_and_blank_is_absent() {
        let mut info = ImageBuildInfo::new("app:v1");
        info.dockerfile = Some("   ".to_owned());
        info.dockerfile_path = Some("Dockerfile-abc".to_owned());
        assert!(info.inline_dockerfile().is_none());
        assert_eq!(info.explicit_dockerfile_path(), Some("Dockerfile-abc"));

        info.dockerfile = Some("FROM alpine".to_owned());
        assert_eq!(info.inline_dockerfile(), Some("FROM alpine"));
    }

    #[test]
    fn duplicate_image_names_rejected() {
        let stage = ImageBuildStage {
            builds: vec![ImageBuildInfo::new("app:v1"), ImageBuildInfo::new("app:v1")],
        };
        assert!(matches!(
            stage.validate(),
            Err(SchemaError::DuplicateImage(name)) if name == "app:v1"
        ));
    }

    #[test]
    fn empty_image_name_rejected() {
        let stage = ImageBuildStage {
            builds: vec![ImageBuildInfo::new("")],
        };
        assert!(matches!(stage.validate(), Err(SchemaError::EmptyField(_))));
    }

    #[test]
    fn label_prefers_task_name() {
        let mut info = ImageBuildInfo::new("app:v1");
        assert_eq!(info.label(), "app:v1");
        info.task_name = Some("v1".to_owned());
        assert_eq!(info.label(), "v1");
    }

    #[test]
    fn command_set_rejects_escaping_output() {
        let set = CommandSet::new(["make"]).with_outputs(["../secret"]);
        assert!(set.validate().is_err());
        let set = CommandSet::new(["make"]).with_outputs(["dist/app"]);
        assert!(set.validate().is_ok());
    }

    #[test]
    fn duplicate_service_names_rejected() {
        let service = ServiceDescriptor {
            name: "db".to_owned(),
            image: ImageName::new("mongo:3.0.5"),
            commands: Vec::new(),
            env: BTreeMap::new(),
        };
        let stage = IntegrationTestStage {
            config: IntegrationTestConfig {
                image: ImageName::new("busybox"),
                commands: vec!["true".to_owned()],
                env: BTreeMap::new(),
            },
            services: vec![service.clone(), service],
        };
        assert!(matches!(
            stage.validate(),
            Err(SchemaError::DuplicateService(_))
        ));
    }

    #[test]
    fn service_name_must_be_a_hostname() {
        assert!(valid_service_name("testService"));
        assert!(valid_service_name("db-1.internal"));
        assert!(!valid_service_name("-db"));
        assert!(!valid_service_name("my db"));
        assert!(!valid_service_name(""));
    }

    #[test]
    fn env_names_with_equals_rejected() {
        let mut builder = BuilderImage::new("busybox");
        builder.env.insert("A=B".to_owned(), "x".to_owned());
        let stage = PackageStage {
            builder,
            build_tool: None,
            unit_test: CommandSet::default(),
            package: CommandSet::default(),
        };
        assert!(stage.validate().is_err());
    }

    #[test]
    fn release_condition_defaults_to_always() {
        let policy: ReleasePolicy = toml::from_str(r#"image = "app:v1""#).unwrap();
        assert_eq!(policy.condition, ReleaseCondition::Always);

        let policy: ReleasePolicy =
            toml::from_str(r#"image = "app:v1"
condition = { type = "branch", pattern = "release/*" }"#)
                .unwrap();
        assert_eq!(
            policy.condition,
            ReleaseCondition::Branch {
                pattern: "release/*".to_owned()
            }
        );
    }
}
