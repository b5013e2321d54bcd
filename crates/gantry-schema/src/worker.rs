use crate::context::RegistryAuth;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Worker process configuration (`gantry.toml`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    /// Dependency caches live here, keyed per build tool and version.
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub registry: RegistryAuth,
    /// Access token handed to source providers.
    #[serde(default, skip_serializing)]
    pub scm_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub url: String,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            workspace: default_workspace(),
            cache_root: None,
            server: None,
            registry: RegistryAuth::default(),
            scm_token: None,
        }
    }
}

fn default_engine() -> String {
    "docker".to_owned()
}

fn default_workspace() -> PathBuf {
    std::env::temp_dir().join("gantry").join("workspace")
}

impl WorkerConfig {
    pub fn parse_str(input: &str) -> Result<Self, SchemaError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = fs::read_to_string(path)?;
        Self::parse_str(&content)
    }

    /// Apply secret overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(password) = lookup("GANTRY_REGISTRY_PASSWORD") {
            self.registry.password = password;
        }
        if let Some(token) = lookup("GANTRY_SCM_TOKEN") {
            self.scm_token = Some(token);
        }
        if let Some(token) = lookup("GANTRY_SERVER_TOKEN") {
            if let Some(server) = self.server.as_mut() {
                server.token = Some(token);
            }
        }
        self
    }

    /// Cache directory, defaulting to a sibling of the workspace.
    pub fn cache_root(&self) -> PathBuf {
        self.cache_root.clone().unwrap_or_else(|| {
            self.workspace
                .parent()
                .unwrap_or(Path::new("."))
                .join("cache")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg = WorkerConfig::parse_str(
            r#"
engine = "podman"
workspace = "/var/lib/gantry/code"
cache_root = "/var/cache/gantry"

[server]
url = "http://gantry-server:7099"

[registry]
server = "registry.example.com"
repository = "team"
username = "ci"
password = "pw"
"#,
        )
        .unwrap();
        assert_eq!(cfg.engine, "podman");
        assert_eq!(cfg.workspace, PathBuf::from("/var/lib/gantry/code"));
        assert_eq!(cfg.cache_root(), PathBuf::from("/var/cache/gantry"));
        assert_eq!(cfg.registry.username, "ci");
        assert!(cfg.server.is_some());
    }

    #[test]
    fn defaults_apply() {
        let cfg = WorkerConfig::parse_str("").unwrap();
        assert_eq!(cfg.engine, "docker");
        assert!(cfg.workspace.ends_with("gantry/workspace"));
        assert!(cfg.cache_root().ends_with("gantry/cache"));
    }

    #[test]
    fn overrides_replace_secrets() {
        let cfg = WorkerConfig::parse_str(
            r#"
[server]
url = "http://server"
[registry]
server = "r"
"#,
        )
        .unwrap()
        .with_overrides(|key| match key {
            "GANTRY_REGISTRY_PASSWORD" => Some("from-env".to_owned()),
            "GANTRY_SCM_TOKEN" => Some("tok".to_owned()),
            "GANTRY_SERVER_TOKEN" => Some("srv".to_owned()),
            _ => None,
        });
        assert_eq!(cfg.registry.password, "from-env");
        assert_eq!(cfg.scm_token.as_deref(), Some("tok"));
        assert_eq!(cfg.server.unwrap().token.as_deref(), Some("srv"));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(WorkerConfig::parse_str("unknown = 1").is_err());
    }
}
