use crate::EngineError;
use gantry_schema::{ContainerId, ImageName, NetworkId, RegistryAuth};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }
}

/// Everything the engine needs to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: ImageName,
    pub name: Option<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<BindMount>,
    /// Empty means the image's default command.
    pub command: Vec<String>,
    pub workdir: Option<String>,
    pub network: Option<NetworkId>,
    /// Hostname other containers on `network` reach this one by.
    pub network_alias: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<ImageName>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn env(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    #[must_use]
    pub fn mount(mut self, mount: BindMount) -> Self {
        self.mounts.push(mount);
        self
    }

    #[must_use]
    pub fn command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    #[must_use]
    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    #[must_use]
    pub fn network(mut self, network: &NetworkId, alias: Option<&str>) -> Self {
        self.network = Some(network.clone());
        self.network_alias = alias.map(str::to_owned);
        self
    }

    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Blocking client for a container engine.
///
/// One handle is shared by every stage of a run. Implementations must tolerate
/// sequential reuse; they need not be safe for concurrent use by several runs.
pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Build `dockerfile` with `context` as build context and tag the result.
    fn build(&self, context: &Path, dockerfile: &Path, tag: &ImageName)
        -> Result<(), EngineError>;

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, EngineError>;

    fn start(&self, id: &ContainerId) -> Result<(), EngineError>;

    fn stop(&self, id: &ContainerId) -> Result<(), EngineError>;

    /// Remove a container and its anonymous volumes. Removing a container
    /// that no longer exists succeeds.
    fn remove(&self, id: &ContainerId) -> Result<(), EngineError>;

    /// Block until the container exits and return its exit code.
    fn wait(&self, id: &ContainerId) -> Result<i64, EngineError>;

    fn logs(&self, id: &ContainerId) -> Result<String, EngineError>;

    /// Run `command` inside a running container. A non-zero exit code is
    /// reported in the output, not as an error.
    fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecOutput, EngineError>;

    /// Tar stream of `path` (absolute inside the container), rooted at its file name.
    fn copy_from_container(&self, id: &ContainerId, path: &str) -> Result<Vec<u8>, EngineError>;

    fn image_exists(&self, image: &ImageName) -> Result<bool, EngineError>;

    fn pull(&self, image: &ImageName) -> Result<(), EngineError>;

    fn push(&self, image: &ImageName, auth: &RegistryAuth) -> Result<(), EngineError>;

    fn create_network(&self, name: &str) -> Result<NetworkId, EngineError>;

    fn remove_network(&self, id: &NetworkId) -> Result<(), EngineError>;
}

pub fn select_engine(name: &str) -> Result<Box<dyn ContainerEngine>, EngineError> {
    match name {
        "docker" => Ok(Box::new(crate::docker::CliEngine::docker())),
        "podman" => Ok(Box::new(crate::docker::CliEngine::podman())),
        "mock" => Ok(Box::new(crate::mock::MockEngine::new())),
        other => Err(EngineError::EngineUnavailable(other.to_owned())),
    }
}
