//! Stage status reporting for Gantry workers.
//!
//! The worker pushes every stage transition of an event to the controlling
//! server through a `StatusReporter`. The HTTP reporter posts JSON status
//! records; the memory and no-op reporters serve tests and offline runs.

pub mod config;
pub mod http;
pub mod memory;

pub use config::ServerConfig;
pub use http::HttpReporter;
pub use memory::{MemoryReporter, NoopReporter, ReportRecord};

/// Protocol version sent as `X-Gantry-Protocol` header on all HTTP requests.
pub const PROTOCOL_VERSION: u32 = 1;

use gantry_schema::{EventId, StageKind, StageResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("server rejected report with HTTP {code}: {url}")]
    Rejected { code: u16, url: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("server config error: {0}")]
    Config(String),
}

/// Sink for stage status updates of one or more events.
///
/// Delivery is best effort: the caller logs a failed report and carries on.
pub trait StatusReporter: Send + Sync {
    fn report(
        &self,
        event: &EventId,
        stage: StageKind,
        result: &StageResult,
    ) -> Result<(), ReportError>;
}
