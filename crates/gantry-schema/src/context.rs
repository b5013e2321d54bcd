use crate::types::EventId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials for the registry images are released to.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryAuth {
    pub server: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl RegistryAuth {
    pub fn new(server: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            repository: repository.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Anonymous registries are pushed to without a login.
    pub fn has_login(&self) -> bool {
        !self.username.is_empty()
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("server", &self.server)
            .field("repository", &self.repository)
            .field("username", &self.username)
            .field(
                "password",
                &if self.password.is_empty() {
                    ""
                } else {
                    "<redacted>"
                },
            )
            .finish()
    }
}

/// Parameters the server supplies when it triggers a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformParams {
    /// `refs/heads/<branch>`, `refs/tags/<tag>`, any other ref, or a bare branch name.
    #[serde(default, rename = "ref")]
    pub ref_name: Option<String>,
}

impl PerformParams {
    pub fn with_ref(ref_name: impl Into<String>) -> Self {
        Self {
            ref_name: Some(ref_name.into()),
        }
    }

    pub fn branch(&self) -> Option<&str> {
        let r = self.ref_name.as_deref()?;
        if let Some(branch) = r.strip_prefix("refs/heads/") {
            return Some(branch);
        }
        if r.starts_with("refs/") || r.is_empty() {
            return None;
        }
        Some(r)
    }

    pub fn tag(&self) -> Option<&str> {
        self.ref_name.as_deref()?.strip_prefix("refs/tags/")
    }
}

/// Immutable per-event bundle shared by every stage of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    event_id: EventId,
    registry: RegistryAuth,
    perform: PerformParams,
}

impl RunContext {
    pub fn new(event_id: impl Into<EventId>, registry: RegistryAuth, perform: PerformParams) -> Self {
        Self {
            event_id: event_id.into(),
            registry,
            perform,
        }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn registry(&self) -> &RegistryAuth {
        &self.registry
    }

    pub fn perform(&self) -> &PerformParams {
        &self.perform
    }
}
