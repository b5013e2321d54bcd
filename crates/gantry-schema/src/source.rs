use crate::{validate_relative_path, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Source-control backend a descriptor is checked out with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Github,
    Gitlab,
    Git,
    Svn,
    Local,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Github,
        SourceKind::Gitlab,
        SourceKind::Git,
        SourceKind::Svn,
        SourceKind::Local,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Github => "github",
            SourceKind::Gitlab => "gitlab",
            SourceKind::Git => "git",
            SourceKind::Svn => "svn",
            SourceKind::Local => "local",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub url: String,
    /// Branch, tag, full ref or revision. `None` means the remote default.
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl SourceDescriptor {
    pub fn new(kind: SourceKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            git_ref: None,
            username: None,
            password: None,
        }
    }

    #[must_use]
    pub fn with_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = Some(git_ref.into());
        self
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.url.trim().is_empty() {
            return Err(SchemaError::EmptyField("source url"));
        }
        Ok(())
    }
}

impl fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("git_ref", &self.git_ref)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.url)?;
        if let Some(r) = &self.git_ref {
            write!(f, "@{r}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySource {
    /// Destination below the workspace root.
    pub folder: String,
    #[serde(flatten)]
    pub source: SourceDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckoutStage {
    pub main: SourceDescriptor,
    #[serde(default)]
    pub dependencies: Vec<DependencySource>,
}

impl CheckoutStage {
    pub fn new(main: SourceDescriptor) -> Self {
        Self {
            main,
            dependencies: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        self.main.validate()?;
        let mut seen = BTreeSet::new();
        for dep in &self.dependencies {
            dep.source.validate()?;
            validate_relative_path("dependency folder", &dep.folder)?;
            let normalized = normalize_folder(&dep.folder);
            if !seen.insert(normalized) {
                return Err(SchemaError::DuplicateFolder(dep.folder.clone()));
            }
        }
        Ok(())
    }
}

fn normalize_folder(folder: &str) -> String {
    folder
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}
