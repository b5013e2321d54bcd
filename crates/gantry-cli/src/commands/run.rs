use super::{
    colorize_status, json_pretty, spin_fail, spin_ok, spin_skip, spinner, EXIT_CANCELLED,
    EXIT_STAGE_FAILURE, EXIT_SUCCESS,
};
use gantry_core::{EventRunner, RunError, StageManager, Workspace};
use gantry_report::{HttpReporter, NoopReporter, ServerConfig, StatusReporter};
use gantry_runtime::select_engine;
use gantry_schema::{
    parse_pipeline_file, PerformParams, RunContext, StageResult, StageStatus, WorkerConfig,
};
use gantry_scm::SourceRegistry;
use indicatif::ProgressBar;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub fn run(
    config: &WorkerConfig,
    pipeline_path: &Path,
    event_id: &str,
    git_ref: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let pipeline = parse_pipeline_file(pipeline_path)
        .map_err(|e| format!("pipeline error: {}: {e}", pipeline_path.display()))?;

    let engine = select_engine(&config.engine).map_err(|e| format!("config error: {e}"))?;
    if !engine.available() {
        return Err(format!("container engine '{}' is not available", config.engine));
    }

    let perform = git_ref.map_or_else(PerformParams::default, PerformParams::with_ref);
    let context = RunContext::new(event_id, config.registry.clone(), perform);
    let mut manager = StageManager::new(
        Arc::from(engine),
        SourceRegistry::with_defaults(),
        reporter(config),
        context,
        Workspace::new(&config.workspace),
    )
    .with_cache_root(config.cache_root());

    let mut current: Option<ProgressBar> = None;
    let mut observer = |result: &StageResult| {
        if json {
            return;
        }
        let stage = result.stage.as_str();
        match result.status {
            StageStatus::Running => current = Some(spinner(&format!("{stage}..."))),
            StageStatus::Succeeded => {
                if let Some(pb) = current.take() {
                    spin_ok(&pb, stage);
                }
            }
            StageStatus::Failed => {
                let error = result.error.as_deref().unwrap_or("unknown error");
                match current.take() {
                    Some(pb) => spin_fail(&pb, &format!("{stage}: {error}")),
                    None => eprintln!("✗ {stage}: {error}"),
                }
            }
            StageStatus::Skipped | StageStatus::Cancelled => {
                let pb = spinner(stage);
                spin_skip(&pb, &format!("{stage} ({})", colorize_status(&result.status.to_string())));
            }
            StageStatus::Pending => {}
        }
    };

    let summary = EventRunner::new()
        .run_with(&mut manager, &pipeline, config.scm_token.as_deref(), &mut observer)
        .map_err(|e| match e {
            RunError::InvalidPipeline(e) => format!("pipeline error: {e}"),
            other => other.to_string(),
        })?;

    if json {
        let payload = serde_json::json!({
            "event_id": &summary.event_id,
            "success": summary.success(),
            "cancelled": summary.cancelled,
            "stages": &summary.results,
        });
        println!("{}", json_pretty(&payload)?);
    } else if summary.success() {
        println!("event {} succeeded", summary.event_id);
    } else if summary.cancelled {
        println!("event {} cancelled", summary.event_id);
    } else if let Some(failed) = summary.failed_stage() {
        println!(
            "event {} {} at stage {}",
            summary.event_id,
            colorize_status("failed"),
            failed.stage
        );
    }

    Ok(if summary.cancelled {
        EXIT_CANCELLED
    } else if summary.success() {
        EXIT_SUCCESS
    } else {
        EXIT_STAGE_FAILURE
    })
}

/// Server from the worker config, else `~/.config/gantry/server.json`, else no reporting.
fn reporter(config: &WorkerConfig) -> Arc<dyn StatusReporter> {
    let server = match &config.server {
        Some(section) => {
            let server = ServerConfig::new(&section.url);
            match &section.token {
                Some(token) => Some(server.with_token(token)),
                None => Some(server),
            }
        }
        None => ServerConfig::load_default().ok(),
    };
    match server {
        Some(server) => {
            debug!("reporting stage status to {}", server.url);
            Arc::new(HttpReporter::new(server))
        }
        None => {
            debug!("no server configured, stage status is not reported");
            Arc::new(NoopReporter)
        }
    }
}
