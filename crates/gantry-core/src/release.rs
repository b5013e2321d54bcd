use crate::manager::StageManager;
use crate::StageError;
use gantry_schema::{ImageName, ImageReleaseStage, PerformParams, ReleaseCondition};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub pushed: Vec<ImageName>,
    /// Policies that did not apply to this run, with the reason.
    pub skipped: Vec<(ImageName, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFailure {
    pub image: ImageName,
    pub reason: String,
}

pub(crate) fn describe_failures(failures: &[PushFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.image, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Glob match where `*` stands for any run of characters, including `/`.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return value.is_empty();
    };
    let Some(mut rest) = value.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // no '*' in the pattern
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// Whether a release policy applies to the ref this run was triggered for.
pub fn condition_met(condition: &ReleaseCondition, perform: &PerformParams) -> bool {
    match condition {
        ReleaseCondition::Always => true,
        ReleaseCondition::Branch { pattern } => perform
            .branch()
            .is_some_and(|branch| wildcard_match(pattern, branch)),
        ReleaseCondition::Tag { pattern } => perform
            .tag()
            .is_some_and(|tag| wildcard_match(pattern, tag)),
    }
}

impl StageManager {
    /// Push every policy image that was built by this run and whose condition
    /// holds. A failed push does not stop the others; the stage fails after
    /// all attempts with the pushed and failed images listed.
    pub fn exec_image_release(
        &mut self,
        built: &[ImageName],
        stage: &ImageReleaseStage,
    ) -> Result<ReleaseReport, StageError> {
        stage.validate()?;
        let registry = self.context.registry();
        let mut report = ReleaseReport::default();
        let mut failures = Vec::new();
        for policy in &stage.policies {
            if !built.contains(&policy.image) {
                info!("skipping release of {}: not built by this run", policy.image);
                report
                    .skipped
                    .push((policy.image.clone(), "not built by this run".to_owned()));
                continue;
            }
            if !condition_met(&policy.condition, self.context.perform()) {
                info!(
                    "skipping release of {}: condition {} not met",
                    policy.image, policy.condition
                );
                report
                    .skipped
                    .push((policy.image.clone(), format!("condition {} not met", policy.condition)));
                continue;
            }
            info!("pushing {} to {}", policy.image, registry.server);
            match self.engine.push(&policy.image, registry) {
                Ok(()) => report.pushed.push(policy.image.clone()),
                Err(e) => {
                    warn!("push of {} failed: {e}", policy.image);
                    failures.push(PushFailure {
                        image: policy.image.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(StageError::Release {
                pushed: report.pushed,
                failures,
            })
        }
    }
}
