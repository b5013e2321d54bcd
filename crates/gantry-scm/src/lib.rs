//! Source providers for Gantry checkouts.
//!
//! A `SourceRegistry` maps each `SourceKind` to the provider that checks it
//! out. The registry is an explicit value handed to the stage manager, so a
//! worker (or a test) decides exactly which providers exist. Git-based kinds
//! shell out to `git`, `svn` to the Subversion client, and `local` copies a
//! directory tree.

pub mod git;
pub mod local;
pub mod svn;

pub use git::GitProvider;
pub use local::LocalProvider;
pub use svn::SvnProvider;

use gantry_schema::{SourceDescriptor, SourceKind};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScmError {
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("'{0}' is not installed or not on PATH")]
    ToolUnavailable(&'static str),
    #[error("{tool} {action} failed: {stderr}")]
    CommandFailed {
        tool: &'static str,
        action: &'static str,
        stderr: String,
    },
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("ref '{0}' does not exist in the source")]
    InvalidRef(String),
    #[error("invalid source url '{0}'")]
    InvalidUrl(String),
}

/// Secrets available to a provider for one checkout.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SourceCredentials {
    /// Access token supplied with the event (hosted git providers).
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SourceCredentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Combine the event token with the login stored on the descriptor.
    pub fn for_descriptor(token: Option<&str>, descriptor: &SourceDescriptor) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()).map(str::to_owned),
            username: descriptor.username.clone(),
            password: descriptor.password.clone(),
        }
    }

    /// Every secret value, for scrubbing them out of tool output.
    pub(crate) fn secrets(&self) -> Vec<&str> {
        self.token
            .iter()
            .chain(self.password.iter())
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Replace every secret in `text` with `***`.
pub(crate) fn redact(text: &str, credentials: &SourceCredentials) -> String {
    let mut out = text.to_owned();
    for secret in credentials.secrets() {
        out = out.replace(secret, "***");
        let encoded = git::encode_userinfo(secret);
        if encoded != secret {
            out = out.replace(&encoded, "***");
        }
    }
    out
}

/// Checks one kind of source out into a directory.
pub trait SourceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Populate `dest` with the source at `git_ref` (the descriptor's own ref
    /// is the caller's fallback; `None` means the remote default). `dest`
    /// exists and is empty when called.
    fn checkout(
        &self,
        descriptor: &SourceDescriptor,
        dest: &Path,
        git_ref: Option<&str>,
        credentials: &SourceCredentials,
    ) -> Result<(), ScmError>;
}

/// Explicit mapping from source kind to provider.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    providers: BTreeMap<SourceKind, Arc<dyn SourceProvider>>,
}

impl SourceRegistry {
    /// A registry with no providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in providers: git for GitHub, GitLab and plain git, SVN, local.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SourceKind::Github, Arc::new(GitProvider::github()));
        registry.register(SourceKind::Gitlab, Arc::new(GitProvider::gitlab()));
        registry.register(SourceKind::Git, Arc::new(GitProvider::generic()));
        registry.register(SourceKind::Svn, Arc::new(SvnProvider::new()));
        registry.register(SourceKind::Local, Arc::new(LocalProvider::new()));
        registry
    }

    /// Register `provider` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: SourceKind, provider: Arc<dyn SourceProvider>) {
        self.providers.insert(kind, provider);
    }

    pub fn resolve(&self, kind: SourceKind) -> Option<Arc<dyn SourceProvider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        self.providers.keys().copied().collect()
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.providers.iter().map(|(k, p)| (k, p.name())))
            .finish()
    }
}
