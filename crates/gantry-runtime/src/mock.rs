use crate::archive;
use crate::engine::{ContainerEngine, ContainerSpec, ExecOutput};
use crate::EngineError;
use gantry_schema::{ContainerId, ImageName, NetworkId, RegistryAuth};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// One recorded engine operation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Build {
        tag: ImageName,
        dockerfile: PathBuf,
        content: String,
    },
    Pull(ImageName),
    Create {
        id: ContainerId,
        spec: ContainerSpec,
    },
    Start(ContainerId),
    Stop(ContainerId),
    Remove(ContainerId),
    Wait(ContainerId),
    Exec {
        id: ContainerId,
        command: Vec<String>,
    },
    Copy {
        id: ContainerId,
        path: String,
    },
    Push {
        image: ImageName,
        auth: RegistryAuth,
    },
    CreateNetwork {
        id: NetworkId,
        name: String,
    },
    RemoveNetwork(NetworkId),
}

#[derive(Debug)]
struct MockContainer {
    spec: ContainerSpec,
    running: bool,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    images: BTreeSet<ImageName>,
    unpullable: BTreeSet<ImageName>,
    containers: BTreeMap<ContainerId, MockContainer>,
    networks: BTreeMap<NetworkId, String>,
    calls: Vec<EngineCall>,
    failing_builds: BTreeSet<ImageName>,
    failing_pushes: BTreeSet<ImageName>,
    failing_removals: BTreeSet<ImageName>,
    failing_network_removal: bool,
    exit_codes: BTreeMap<ImageName, i64>,
    logs: BTreeMap<ImageName, String>,
    exec_results: Vec<(String, i64, String)>,
}

/// In-memory engine for tests and dry runs.
///
/// Containers resolve paths through their bind mounts, so files written into
/// a mounted workspace on the host are visible to `copy_from_container`.
pub struct MockEngine {
    available: bool,
    state: Mutex<MockState>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            available: true,
            state: Mutex::new(MockState::default()),
        }
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, EngineError> {
        self.state.lock().map_err(|e| EngineError::CommandFailed {
            op: "lock",
            target: "mock".to_owned(),
            code: None,
            stderr: format!("mutex poisoned: {e}"),
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    /// Make `image` present locally without a pull.
    pub fn add_image(&self, image: impl Into<ImageName>) {
        self.with_state(|s| {
            s.images.insert(image.into());
        });
    }

    /// Pulls of `image` fail as if the registry does not know it.
    pub fn fail_pull(&self, image: impl Into<ImageName>) {
        self.with_state(|s| {
            s.unpullable.insert(image.into());
        });
    }

    pub fn fail_build(&self, image: impl Into<ImageName>) {
        self.with_state(|s| {
            s.failing_builds.insert(image.into());
        });
    }

    pub fn fail_push(&self, image: impl Into<ImageName>) {
        self.with_state(|s| {
            s.failing_pushes.insert(image.into());
        });
    }

    /// Removal of any container created from `image` fails.
    pub fn fail_remove(&self, image: impl Into<ImageName>) {
        self.with_state(|s| {
            s.failing_removals.insert(image.into());
        });
    }

    pub fn fail_network_removal(&self) {
        self.with_state(|s| s.failing_network_removal = true);
    }

    /// Exit code `wait` reports for containers created from `image`.
    pub fn set_exit_code(&self, image: impl Into<ImageName>, code: i64) {
        self.with_state(|s| {
            s.exit_codes.insert(image.into(), code);
        });
    }

    pub fn set_logs(&self, image: impl Into<ImageName>, logs: impl Into<String>) {
        self.with_state(|s| {
            s.logs.insert(image.into(), logs.into());
        });
    }

    /// Any exec whose joined command line contains `pattern` returns `exit_code`.
    pub fn script_exec(&self, pattern: impl Into<String>, exit_code: i64, output: impl Into<String>) {
        self.with_state(|s| {
            s.exec_results
                .push((pattern.into(), exit_code, output.into()));
        });
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn pushed(&self) -> Vec<ImageName> {
        self.with_state(|s| {
            s.calls
                .iter()
                .filter_map(|c| match c {
                    EngineCall::Push { image, .. } => Some(image.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn built(&self) -> Vec<ImageName> {
        self.with_state(|s| {
            s.calls
                .iter()
                .filter_map(|c| match c {
                    EngineCall::Build { tag, .. } => Some(tag.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    /// Commands passed to `exec`, joined with spaces.
    pub fn exec_commands(&self) -> Vec<String> {
        self.with_state(|s| {
            s.calls
                .iter()
                .filter_map(|c| match c {
                    EngineCall::Exec { command, .. } => Some(command.join(" ")),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.with_state(|s| {
            s.calls
                .iter()
                .filter_map(|c| match c {
                    EngineCall::Create { spec, .. } => Some(spec.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    pub fn live_containers(&self) -> Vec<ContainerId> {
        self.with_state(|s| s.containers.keys().cloned().collect())
    }

    pub fn live_networks(&self) -> Vec<NetworkId> {
        self.with_state(|s| s.networks.keys().cloned().collect())
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.with_state(|s| s.images.iter().any(|i| i == image))
    }
}

fn not_found(id: &ContainerId) -> EngineError {
    EngineError::ContainerNotFound(id.to_string())
}

/// Map an absolute in-container path onto the host through the longest matching mount.
fn resolve_mount(spec: &ContainerSpec, path: &str) -> Option<PathBuf> {
    spec.mounts
        .iter()
        .filter_map(|m| {
            let target = m.target.trim_end_matches('/');
            let rest = path.strip_prefix(target)?;
            if !rest.is_empty() && !rest.starts_with('/') {
                return None;
            }
            Some((target.len(), m.source.join(rest.trim_start_matches('/'))))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, host)| host)
}

impl ContainerEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn available(&self) -> bool {
        self.available
    }

    fn build(
        &self,
        context: &Path,
        dockerfile: &Path,
        tag: &ImageName,
    ) -> Result<(), EngineError> {
        let content = std::fs::read_to_string(dockerfile).map_err(|e| {
            EngineError::CommandFailed {
                op: "build",
                target: tag.to_string(),
                code: Some(1),
                stderr: format!("unable to read {}: {e}", dockerfile.display()),
            }
        })?;
        let mut state = self.lock()?;
        state.calls.push(EngineCall::Build {
            tag: tag.clone(),
            dockerfile: dockerfile.to_path_buf(),
            content,
        });
        if !context.is_dir() || state.failing_builds.contains(tag) {
            return Err(EngineError::CommandFailed {
                op: "build",
                target: tag.to_string(),
                code: Some(1),
                stderr: "mock build failure".to_owned(),
            });
        }
        state.images.insert(tag.clone());
        Ok(())
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, EngineError> {
        let mut state = self.lock()?;
        if !state.images.contains(&spec.image) {
            return Err(EngineError::ImageNotFound(spec.image.to_string()));
        }
        if let Some(network) = &spec.network {
            if !state.networks.contains_key(network) {
                return Err(EngineError::NetworkNotFound(network.to_string()));
            }
        }
        state.next_id += 1;
        let id = ContainerId::new(format!("mock-{:04}", state.next_id));
        state.calls.push(EngineCall::Create {
            id: id.clone(),
            spec: spec.clone(),
        });
        state.containers.insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                running: false,
            },
        );
        Ok(id)
    }

    fn start(&self, id: &ContainerId) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.calls.push(EngineCall::Start(id.clone()));
        let container = state.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        container.running = true;
        Ok(())
    }

    fn stop(&self, id: &ContainerId) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.calls.push(EngineCall::Stop(id.clone()));
        let container = state.containers.get_mut(id).ok_or_else(|| not_found(id))?;
        container.running = false;
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.calls.push(EngineCall::Remove(id.clone()));
        let Some(container) = state.containers.get(id) else {
            return Ok(());
        };
        if state.failing_removals.contains(&container.spec.image) {
            return Err(EngineError::CommandFailed {
                op: "remove",
                target: id.to_string(),
                code: Some(1),
                stderr: "mock removal failure".to_owned(),
            });
        }
        state.containers.remove(id);
        Ok(())
    }

    fn wait(&self, id: &ContainerId) -> Result<i64, EngineError> {
        let mut state = self.lock()?;
        state.calls.push(EngineCall::Wait(id.clone()));
        let image = {
            let container = state.containers.get_mut(id).ok_or_else(|| not_found(id))?;
            container.running = false;
            container.spec.image.clone()
        };
        Ok(state.exit_codes.get(&image).copied().unwrap_or(0))
    }

    fn logs(&self, id: &ContainerId) -> Result<String, EngineError> {
        let state = self.lock()?;
        let container = state.containers.get(id).ok_or_else(|| not_found(id))?;
        Ok(state
            .logs
            .get(&container.spec.image)
            .cloned()
            .unwrap_or_default())
    }

    fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecOutput, EngineError> {
        let mut state = self.lock()?;
        state.calls.push(EngineCall::Exec {
            id: id.clone(),
            command: command.to_vec(),
        });
        let container = state.containers.get(id).ok_or_else(|| not_found(id))?;
        if !container.running {
            return Err(EngineError::CommandFailed {
                op: "exec",
                target: id.to_string(),
                code: Some(1),
                stderr: format!("container {id} is not running"),
            });
        }
        let line = command.join(" ");
        let scripted = state
            .exec_results
            .iter()
            .find(|(pattern, _, _)| line.contains(pattern.as_str()));
        Ok(match scripted {
            Some((_, exit_code, output)) => ExecOutput {
                exit_code: *exit_code,
                output: output.clone(),
            },
            None => ExecOutput {
                exit_code: 0,
                output: String::new(),
            },
        })
    }

    fn copy_from_container(&self, id: &ContainerId, path: &str) -> Result<Vec<u8>, EngineError> {
        let mut state = self.lock()?;
        state.calls.push(EngineCall::Copy {
            id: id.clone(),
            path: path.to_owned(),
        });
        let container = state.containers.get(id).ok_or_else(|| not_found(id))?;
        let missing = || EngineError::PathNotFound {
            container: id.to_string(),
            path: path.to_owned(),
        };
        let host = resolve_mount(&container.spec, path).ok_or_else(missing)?;
        if host.symlink_metadata().is_err() {
            return Err(missing());
        }
        let name = host
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(missing)?;
        Ok(archive::pack_path(&host, &name)?)
    }

    fn image_exists(&self, image: &ImageName) -> Result<bool, EngineError> {
        Ok(self.lock()?.images.contains(image))
    }

    fn pull(&self, image: &ImageName) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.calls.push(EngineCall::Pull(image.clone()));
        if state.unpullable.contains(image) {
            return Err(EngineError::ImageNotFound(image.to_string()));
        }
        state.images.insert(image.clone());
        Ok(())
    }

    fn push(&self, image: &ImageName, auth: &RegistryAuth) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        if !state.images.contains(image) {
            return Err(EngineError::ImageNotFound(image.to_string()));
        }
        if state.failing_pushes.contains(image) {
            return Err(EngineError::CommandFailed {
                op: "push",
                target: image.to_string(),
                code: Some(1),
                stderr: "mock push failure".to_owned(),
            });
        }
        state.calls.push(EngineCall::Push {
            image: image.clone(),
            auth: auth.clone(),
        });
        Ok(())
    }

    fn create_network(&self, name: &str) -> Result<NetworkId, EngineError> {
        let mut state = self.lock()?;
        if state.networks.values().any(|n| n == name) {
            return Err(EngineError::CommandFailed {
                op: "network create",
                target: name.to_owned(),
                code: Some(1),
                stderr: format!("network with name {name} already exists"),
            });
        }
        state.next_id += 1;
        let id = NetworkId::new(format!("mock-net-{:04}", state.next_id));
        state.calls.push(EngineCall::CreateNetwork {
            id: id.clone(),
            name: name.to_owned(),
        });
        state.networks.insert(id.clone(), name.to_owned());
        Ok(id)
    }

    fn remove_network(&self, id: &NetworkId) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.calls.push(EngineCall::RemoveNetwork(id.clone()));
        if !state.networks.contains_key(id) {
            return Err(EngineError::NetworkNotFound(id.to_string()));
        }
        let attached = state
            .containers
            .values()
            .any(|c| c.spec.network.as_ref() == Some(id));
        if attached || state.failing_network_removal {
            return Err(EngineError::CommandFailed {
                op: "network remove",
                target: id.to_string(),
                code: Some(1),
                stderr: "network has active endpoints".to_owned(),
            });
        }
        state.networks.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BindMount;

    #[test]
    fn create_requires_local_image() {
        let engine = MockEngine::new();
        let spec = ContainerSpec::new("busybox");
        assert!(matches!(
            engine.create_container(&spec),
            Err(EngineError::ImageNotFound(_))
        ));
        engine.pull(&ImageName::new("busybox")).unwrap();
        assert!(engine.create_container(&spec).is_ok());
    }

    #[test]
    fn container_lifecycle_is_recorded() {
        let engine = MockEngine::new();
        engine.add_image("busybox");
        let id = engine.create_container(&ContainerSpec::new("busybox")).unwrap();
        engine.start(&id).unwrap();
        let out = engine.exec(&id, &["ls".to_owned()]).unwrap();
        assert!(out.success());
        engine.stop(&id).unwrap();
        engine.remove(&id).unwrap();
        engine.remove(&id).unwrap();

        assert!(engine.live_containers().is_empty());
        assert_eq!(engine.calls().len(), 6);
        assert_eq!(engine.exec_commands(), vec!["ls"]);
    }

    #[test]
    fn exec_on_stopped_container_fails() {
        let engine = MockEngine::new();
        engine.add_image("busybox");
        let id = engine.create_container(&ContainerSpec::new("busybox")).unwrap();
        assert!(engine.exec(&id, &["ls".to_owned()]).is_err());
    }

    #[test]
    fn scripted_exec_and_exit_codes() {
        let engine = MockEngine::new();
        engine.add_image("busybox");
        engine.script_exec("mvn test", 3, "tests failed");
        engine.set_exit_code("busybox", 7);
        let id = engine.create_container(&ContainerSpec::new("busybox")).unwrap();
        engine.start(&id).unwrap();

        let out = engine
            .exec(&id, &["/bin/sh".to_owned(), "-c".to_owned(), "mvn test".to_owned()])
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.output, "tests failed");
        assert_eq!(engine.wait(&id).unwrap(), 7);
    }

    #[test]
    fn copy_resolves_through_mounts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        let engine = MockEngine::new();
        engine.add_image("busybox");
        let spec = ContainerSpec::new("busybox").mount(BindMount::new(dir.path(), "/workspace"));
        let id = engine.create_container(&spec).unwrap();

        let data = engine.copy_from_container(&id, "/workspace/README.md").unwrap();
        assert_eq!(
            archive::archive_root(&data).unwrap().as_deref(),
            Some("README.md")
        );
        assert!(matches!(
            engine.copy_from_container(&id, "/workspace/missing"),
            Err(EngineError::PathNotFound { .. })
        ));
        assert!(matches!(
            engine.copy_from_container(&id, "/etc/passwd"),
            Err(EngineError::PathNotFound { .. })
        ));
    }

    #[test]
    fn longest_mount_wins() {
        let spec = ContainerSpec::new("x")
            .mount(BindMount::new("/host/ws", "/workspace"))
            .mount(BindMount::new("/host/cache", "/workspace/.cache"));
        assert_eq!(
            resolve_mount(&spec, "/workspace/.cache/a"),
            Some(PathBuf::from("/host/cache/a"))
        );
        assert_eq!(
            resolve_mount(&spec, "/workspace/src"),
            Some(PathBuf::from("/host/ws/src"))
        );
        assert_eq!(resolve_mount(&spec, "/workspacex"), None);
    }

    #[test]
    fn network_removal_blocked_by_attached_container() {
        let engine = MockEngine::new();
        engine.add_image("mongo");
        let net = engine.create_network("gantry-1").unwrap();
        let id = engine
            .create_container(&ContainerSpec::new("mongo").network(&net, Some("db")))
            .unwrap();
        assert!(engine.remove_network(&net).is_err());
        engine.remove(&id).unwrap();
        engine.remove_network(&net).unwrap();
        assert!(engine.live_networks().is_empty());
    }

    #[test]
    fn scripted_push_and_removal_failures() {
        let engine = MockEngine::new();
        engine.add_image("app:v1");
        engine.fail_push("app:v1");
        engine.fail_remove("app:v1");
        let auth = RegistryAuth::new("registry.example.com", "team");
        assert!(engine.push(&ImageName::new("app:v1"), &auth).is_err());
        assert!(engine.pushed().is_empty());

        let id = engine.create_container(&ContainerSpec::new("app:v1")).unwrap();
        assert!(engine.remove(&id).is_err());
        assert_eq!(engine.live_containers(), vec![id]);
    }

    #[test]
    fn build_reads_dockerfile_and_registers_image() {
        let dir = tempfile::tempdir().unwrap();
        let dockerfile = dir.path().join("Dockerfile");
        std::fs::write(&dockerfile, "FROM busybox\n").unwrap();
        let engine = MockEngine::new();
        engine
            .build(dir.path(), &dockerfile, &ImageName::new("app:v1"))
            .unwrap();
        assert!(engine.has_image("app:v1"));
        assert_eq!(engine.built(), vec![ImageName::new("app:v1")]);
        match &engine.calls()[0] {
            EngineCall::Build { content, .. } => assert_eq!(content, "FROM busybox\n"),
            other => panic!("unexpected call {other:?}"),
        }
    }
}
