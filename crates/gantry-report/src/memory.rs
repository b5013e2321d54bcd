use crate::{ReportError, StatusReporter};
use gantry_schema::{EventId, StageKind, StageResult, StageStatus};
use std::sync::Mutex;

/// Discards every report.
#[derive(Debug, Default)]
pub struct NoopReporter;

impl StatusReporter for NoopReporter {
    fn report(&self, _: &EventId, _: StageKind, _: &StageResult) -> Result<(), ReportError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRecord {
    pub event: EventId,
    pub stage: StageKind,
    pub result: StageResult,
}

/// Keeps every report in memory, in delivery order.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    records: Mutex<Vec<ReportRecord>>,
    fail: bool,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records reports but answers every one with an error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<ReportRecord> {
        match self.records.lock() {
            Ok(r) => r.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Statuses reported for `stage`, in order.
    pub fn statuses(&self, stage: StageKind) -> Vec<StageStatus> {
        self.records()
            .into_iter()
            .filter(|r| r.stage == stage)
            .map(|r| r.result.status)
            .collect()
    }

    /// The most recent report for `stage`.
    pub fn last(&self, stage: StageKind) -> Option<StageResult> {
        self.records()
            .into_iter()
            .rev()
            .find(|r| r.stage == stage)
            .map(|r| r.result)
    }
}

impl StatusReporter for MemoryReporter {
    fn report(
        &self,
        event: &EventId,
        stage: StageKind,
        result: &StageResult,
    ) -> Result<(), ReportError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| ReportError::Http(format!("mutex poisoned: {e}")))?;
        records.push(ReportRecord {
            event: event.clone(),
            stage,
            result: result.clone(),
        });
        if self.fail {
            return Err(ReportError::Http("server unreachable".to_owned()));
        }
        Ok(())
    }
}
