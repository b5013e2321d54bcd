use crate::guard::ResourceTracker;
use crate::workspace::{Workspace, CONTAINER_WORKDIR};
use crate::StageError;
use gantry_report::{ReportError, StatusReporter};
use gantry_runtime::{BindMount, ContainerEngine, ContainerSpec};
use gantry_schema::{ImageName, RunContext, StageResult};
use gantry_scm::SourceRegistry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Executes the stages of one event.
///
/// Bound to a single `RunContext` for its whole life. Stage methods take
/// `&mut self`, so one manager cannot run two stages at once; each call is a
/// single attempt and retries are up to the caller. The executors live in
/// their own modules as further `impl StageManager` blocks.
pub struct StageManager {
    pub(crate) engine: Arc<dyn ContainerEngine>,
    pub(crate) sources: SourceRegistry,
    pub(crate) reporter: Arc<dyn StatusReporter>,
    pub(crate) context: RunContext,
    pub(crate) workspace: Workspace,
    pub(crate) cache_root: PathBuf,
    pub(crate) tracker: ResourceTracker,
    sequence: u32,
}

impl StageManager {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        sources: SourceRegistry,
        reporter: Arc<dyn StatusReporter>,
        context: RunContext,
        workspace: Workspace,
    ) -> Self {
        let cache_root = workspace
            .root()
            .parent()
            .unwrap_or(Path::new("/"))
            .join("cache");
        debug!(
            "stage manager for event {} (engine {}, workspace {})",
            context.event_id(),
            engine.name(),
            workspace.root().display()
        );
        Self {
            engine,
            sources,
            reporter,
            context,
            workspace,
            cache_root,
            tracker: ResourceTracker::new(),
            sequence: 0,
        }
    }

    /// Directory holding per-tool dependency caches.
    #[must_use]
    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Live containers and networks of this run. Clone it before a blocking
    /// stage call to force-remove them if the call has to be abandoned.
    pub fn resource_tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Send one stage result to the server. The caller decides what a failed
    /// report means; the stage methods never report on their own.
    pub fn report(&self, result: &StageResult) -> Result<(), ReportError> {
        self.reporter
            .report(self.context.event_id(), result.stage, result)
    }

    /// Make `image` available locally, pulling it when absent.
    pub(crate) fn ensure_image(&self, image: &ImageName) -> Result<(), StageError> {
        let present = self
            .engine
            .image_exists(image)
            .map_err(StageError::lifecycle("inspect image", image))?;
        if !present {
            info!("pulling image {image}");
            self.engine
                .pull(image)
                .map_err(StageError::lifecycle("pull image", image))?;
        }
        Ok(())
    }

    /// Unique engine resource name for this run: `gantry-<event>-<role>-<n>`.
    pub(crate) fn resource_name(&mut self, role: &str) -> String {
        self.sequence += 1;
        let event: String = self
            .context
            .event_id()
            .short()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let role: String = role
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("gantry-{event}-{role}-{}", self.sequence)
    }

    /// Variables every stage container sees next to the user environment.
    pub(crate) fn run_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "GANTRY_EVENT_ID".to_owned(),
            self.context.event_id().to_string(),
        );
        if let Some(r) = &self.context.perform().ref_name {
            env.insert("GANTRY_REF".to_owned(), r.clone());
        }
        env
    }

    /// Container spec with the workspace mounted as working directory.
    pub(crate) fn workspace_container(
        &self,
        image: &ImageName,
        name: String,
        env: &BTreeMap<String, String>,
    ) -> ContainerSpec {
        ContainerSpec::new(image.clone())
            .name(name)
            .env(env)
            .env(&self.run_env())
            .mount(BindMount::new(self.workspace.root(), CONTAINER_WORKDIR))
            .workdir(CONTAINER_WORKDIR)
            .label("gantry.event", self.context.event_id().as_str())
    }
}

/// A command list as one shell script that stops at the first failing line.
pub(crate) fn script_command(commands: &[String]) -> Vec<String> {
    vec![
        "/bin/sh".to_owned(),
        "-e".to_owned(),
        "-c".to_owned(),
        commands.join("\n"),
    ]
}

pub(crate) fn shell_command(command: &str) -> Vec<String> {
    vec!["/bin/sh".to_owned(), "-c".to_owned(), command.to_owned()]
}
