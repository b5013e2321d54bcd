use crate::types::ImageName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five stage kinds, in the order a pipeline runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Checkout,
    Package,
    ImageBuild,
    IntegrationTest,
    ImageRelease,
}

impl StageKind {
    pub const ORDER: [StageKind; 5] = [
        StageKind::Checkout,
        StageKind::Package,
        StageKind::ImageBuild,
        StageKind::IntegrationTest,
        StageKind::ImageRelease,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Checkout => "checkout",
            StageKind::Package => "package",
            StageKind::ImageBuild => "image_build",
            StageKind::IntegrationTest => "integration_test",
            StageKind::ImageRelease => "image_release",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StageStatus::Pending | StageStatus::Running)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
            StageStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

/// Per-stage status record. The worker reports it; the server persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub artifacts: Artifacts,
    /// Containers or networks that could not be removed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leaked_resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl StageResult {
    pub fn new(stage: StageKind, status: StageStatus) -> Self {
        Self {
            stage,
            status,
            error: None,
            artifacts: Artifacts::default(),
            leaked_resources: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn failed(stage: StageKind, error: impl Into<String>) -> Self {
        let mut result = Self::new(stage, StageStatus::Failed);
        result.error = Some(error.into());
        result
    }

    pub fn success(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}
