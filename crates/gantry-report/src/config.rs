use crate::ReportError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl ServerConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    /// Load config from `~/.config/gantry/server.json`.
    pub fn load_default() -> Result<Self, ReportError> {
        let path = default_config_path()?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ReportError::Config(format!("invalid server config: {e}")))?;
        Ok(Self {
            url: config.url.trim_end_matches('/').to_owned(),
            ..config
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ReportError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf, ReportError> {
    let home = std::env::var("HOME").map_err(|_| ReportError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/gantry/server.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");

        let config = ServerConfig::new("https://ci.example.com").with_token("secret123");
        config.save(&path).unwrap();

        let loaded = ServerConfig::load(&path).unwrap();
        assert_eq!(loaded.url, "https://ci.example.com");
        assert_eq!(loaded.auth_token.as_deref(), Some("secret123"));
    }

    #[test]
    fn config_strips_trailing_slash() {
        let config = ServerConfig::new("https://example.com/");
        assert_eq!(config.url, "https://example.com");
    }

    #[test]
    fn loaded_url_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"url": "http://ci:8080/"}"#).unwrap();
        let loaded = ServerConfig::load(&path).unwrap();
        assert_eq!(loaded.url, "http://ci:8080");
        assert!(loaded.auth_token.is_none());
    }

    #[test]
    fn invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ServerConfig::load(&path),
            Err(ReportError::Config(_))
        ));
    }
}
