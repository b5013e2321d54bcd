use crate::concurrency::shutdown_requested;
use crate::manager::StageManager;
use crate::workspace::WorkspaceLock;
use crate::{RunError, StageError};
use gantry_schema::{EventId, ImageName, Pipeline, StageKind, StageResult, StageStatus};
use tracing::{error, info, warn};

/// Final state of every configured stage of one event, in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub event_id: EventId,
    pub results: Vec<StageResult>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        !self.cancelled && self.results.iter().all(StageResult::success)
    }

    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.results
            .iter()
            .find(|r| r.status == StageStatus::Failed)
    }
}

/// Drives a pipeline through a `StageManager`, one stage at a time.
pub struct EventRunner {
    cancel_check: Box<dyn Fn() -> bool + Send + Sync>,
}

impl Default for EventRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRunner {
    /// Runner that stops between stages once Ctrl-C was pressed.
    pub fn new() -> Self {
        Self {
            cancel_check: Box::new(shutdown_requested),
        }
    }

    #[must_use]
    pub fn with_cancel_check(mut self, check: Box<dyn Fn() -> bool + Send + Sync>) -> Self {
        self.cancel_check = check;
        self
    }

    pub fn run(
        &self,
        manager: &mut StageManager,
        pipeline: &Pipeline,
        token: Option<&str>,
    ) -> Result<RunSummary, RunError> {
        self.run_with(manager, pipeline, token, &mut |_| {})
    }

    /// Like `run`, calling `observer` with every result as it is reported.
    pub fn run_with(
        &self,
        manager: &mut StageManager,
        pipeline: &Pipeline,
        token: Option<&str>,
        observer: &mut dyn FnMut(&StageResult),
    ) -> Result<RunSummary, RunError> {
        pipeline.validate()?;
        let lock_path = manager.workspace().lock_path();
        let _lock = WorkspaceLock::try_acquire(&lock_path)?
            .ok_or_else(|| RunError::WorkspaceBusy(manager.workspace().root().to_path_buf()))?;

        let event_id = manager.context().event_id().clone();
        info!("running event {event_id}: {} stage(s)", pipeline.stages().len());

        let mut summary = RunSummary {
            event_id,
            results: Vec::new(),
            cancelled: false,
        };
        let mut built: Vec<ImageName> = Vec::new();
        let mut failed = false;

        for kind in pipeline.stages() {
            if failed || summary.cancelled {
                let status = if summary.cancelled {
                    StageStatus::Cancelled
                } else {
                    StageStatus::Skipped
                };
                let result = StageResult::new(kind, status);
                publish(manager, &result, observer);
                summary.results.push(result);
                continue;
            }
            if (self.cancel_check)() {
                warn!("shutdown requested, cancelling {kind} and later stages");
                summary.cancelled = true;
                let result = StageResult::new(kind, StageStatus::Cancelled);
                publish(manager, &result, observer);
                summary.results.push(result);
                continue;
            }

            let mut result = StageResult::new(kind, StageStatus::Running);
            result.started_at = Some(now());
            publish(manager, &result, observer);

            info!("stage {kind} started");
            let live_before = manager.resource_tracker().snapshot();
            let outcome = execute(manager, pipeline, kind, token, &mut built, &mut result);
            result.leaked_resources = manager
                .resource_tracker()
                .snapshot()
                .iter()
                .filter(|r| !live_before.contains(r))
                .map(ToString::to_string)
                .collect();
            result.finished_at = Some(now());
            match outcome {
                Ok(()) => {
                    result.status = StageStatus::Succeeded;
                    info!("stage {kind} succeeded");
                }
                Err(e) => {
                    if e.is_fault() {
                        error!("stage {kind} failed: {e}");
                    } else {
                        warn!("stage {kind} failed: {e}");
                    }
                    result.status = StageStatus::Failed;
                    result.error = Some(e.to_string());
                    failed = true;
                }
            }
            publish(manager, &result, observer);
            summary.results.push(result);
        }
        Ok(summary)
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn publish(manager: &StageManager, result: &StageResult, observer: &mut dyn FnMut(&StageResult)) {
    if let Err(e) = manager.report(result) {
        warn!("failed to report {} {}: {e}", result.stage, result.status);
    }
    observer(result);
}

/// Dispatch one stage and record its artifacts in `result`.
fn execute(
    manager: &mut StageManager,
    pipeline: &Pipeline,
    kind: StageKind,
    token: Option<&str>,
    built: &mut Vec<ImageName>,
    result: &mut StageResult,
) -> Result<(), StageError> {
    match kind {
        StageKind::Checkout => manager.exec_code_checkout(token, &pipeline.checkout),
        StageKind::Package => {
            let Some(stage) = &pipeline.package else {
                return Ok(());
            };
            let report = manager.exec_package(
                &stage.builder,
                stage.build_tool.as_ref(),
                &stage.unit_test,
                &stage.package,
            )?;
            result.artifacts.outputs = report.outputs;
            Ok(())
        }
        StageKind::ImageBuild => {
            let Some(stage) = &pipeline.image_build else {
                return Ok(());
            };
            let images = manager.exec_image_build(stage)?;
            built.extend(images.iter().cloned());
            result.artifacts.images = images;
            Ok(())
        }
        StageKind::IntegrationTest => {
            let Some(stage) = &pipeline.integration_test else {
                return Ok(());
            };
            manager.exec_integration_test(built.as_slice(), stage).map(|_| ())
        }
        StageKind::ImageRelease => {
            let Some(stage) = &pipeline.image_release else {
                return Ok(());
            };
            match manager.exec_image_release(built.as_slice(), stage) {
                Ok(report) => {
                    result.artifacts.images = report.pushed;
                    Ok(())
                }
                Err(StageError::Release { pushed, failures }) => {
                    result.artifacts.images.clone_from(&pushed);
                    Err(StageError::Release { pushed, failures })
                }
                Err(e) => Err(e),
            }
        }
    }
}
