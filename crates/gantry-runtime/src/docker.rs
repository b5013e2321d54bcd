use crate::engine::{ContainerEngine, ContainerSpec, ExecOutput};
use crate::EngineError;
use gantry_schema::{ContainerId, ImageName, NetworkId, RegistryAuth};
use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Docker,
    Podman,
}

/// Engine client that drives the `docker` or `podman` command-line tool.
pub struct CliEngine {
    binary: String,
    flavor: Flavor,
}

impl CliEngine {
    pub fn docker() -> Self {
        Self {
            binary: "docker".to_owned(),
            flavor: Flavor::Docker,
        }
    }

    pub fn podman() -> Self {
        Self {
            binary: "podman".to_owned(),
            flavor: Flavor::Podman,
        }
    }

    /// Use a specific binary path, e.g. a wrapper script.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn output(&self, args: &[String]) -> Result<Output, EngineError> {
        debug!("{} {}", self.binary, args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::EngineUnavailable(self.binary.clone())
                } else {
                    EngineError::Io(e)
                }
            })
    }

    /// Run and require success; returns trimmed stdout.
    fn checked(
        &self,
        op: &'static str,
        target: &str,
        args: &[String],
    ) -> Result<String, EngineError> {
        let output = self.output(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
        } else {
            Err(failure(op, target, &output))
        }
    }

    fn login(&self, auth: &RegistryAuth, config_dir: &Path) -> Result<(), EngineError> {
        debug!("{} login {} as {}", self.binary, auth.server, auth.username);
        let mut child = Command::new(&self.binary)
            .args(self.login_args(auth, config_dir))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(auth.password.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(failure("login", &auth.server, &output))
        }
    }

    /// Per-push credential store so logins never touch the host's config.
    /// Docker takes it as a global option, podman as a subcommand flag.
    fn config_args(&self, config_dir: &Path) -> Vec<String> {
        match self.flavor {
            Flavor::Docker => vec![
                "--config".to_owned(),
                config_dir.to_string_lossy().into_owned(),
            ],
            Flavor::Podman => Vec::new(),
        }
    }

    fn authfile_args(&self, config_dir: &Path) -> Vec<String> {
        match self.flavor {
            Flavor::Docker => Vec::new(),
            Flavor::Podman => vec![
                "--authfile".to_owned(),
                config_dir.join("auth.json").to_string_lossy().into_owned(),
            ],
        }
    }

    fn login_args(&self, auth: &RegistryAuth, config_dir: &Path) -> Vec<String> {
        let mut args = self.config_args(config_dir);
        args.push("login".to_owned());
        args.extend(self.authfile_args(config_dir));
        args.extend(
            [
                "--username",
                auth.username.as_str(),
                "--password-stdin",
                auth.server.as_str(),
            ]
            .map(str::to_owned),
        );
        args
    }

    fn push_args(&self, image: &ImageName, config_dir: &Path) -> Vec<String> {
        let mut args = self.config_args(config_dir);
        args.push("push".to_owned());
        args.extend(self.authfile_args(config_dir));
        args.push(image.to_string());
        args
    }
}

/// Exit status docker and podman use when `exec` itself fails, as opposed to
/// the executed command.
const EXEC_ENGINE_FAILURE: i32 = 125;

fn failure(op: &'static str, target: &str, output: &Output) -> EngineError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    let lower = stderr.to_lowercase();
    if lower.contains("no such container") {
        return EngineError::ContainerNotFound(target.to_owned());
    }
    if lower.contains("no such image") || lower.contains("image not known") {
        return EngineError::ImageNotFound(target.to_owned());
    }
    EngineError::CommandFailed {
        op,
        target: target.to_owned(),
        code: output.status.code(),
        stderr,
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| (*a).to_owned()).collect()
}

pub(crate) fn build_args(context: &Path, dockerfile: &Path, tag: &ImageName) -> Vec<String> {
    vec![
        "build".to_owned(),
        "--file".to_owned(),
        dockerfile.to_string_lossy().into_owned(),
        "--tag".to_owned(),
        tag.to_string(),
        context.to_string_lossy().into_owned(),
    ]
}

pub(crate) fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_owned()];
    if let Some(name) = &spec.name {
        args.push("--name".to_owned());
        args.push(name.clone());
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_owned());
        args.push(format!("{key}={value}"));
    }
    for (key, value) in &spec.env {
        args.push("--env".to_owned());
        args.push(format!("{key}={value}"));
    }
    for mount in &spec.mounts {
        args.push("--volume".to_owned());
        let mut volume = format!("{}:{}", mount.source.display(), mount.target);
        if mount.read_only {
            volume.push_str(":ro");
        }
        args.push(volume);
    }
    if let Some(workdir) = &spec.workdir {
        args.push("--workdir".to_owned());
        args.push(workdir.clone());
    }
    if let Some(network) = &spec.network {
        args.push("--network".to_owned());
        args.push(network.to_string());
        if let Some(alias) = &spec.network_alias {
            args.push("--network-alias".to_owned());
            args.push(alias.clone());
        }
    }
    args.push(spec.image.to_string());
    args.extend(spec.command.iter().cloned());
    args
}

pub(crate) fn exec_args(id: &ContainerId, command: &[String]) -> Vec<String> {
    let mut args = vec!["exec".to_owned(), id.to_string()];
    args.extend(command.iter().cloned());
    args
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

impl ContainerEngine for CliEngine {
    fn name(&self) -> &str {
        match self.flavor {
            Flavor::Docker => "docker",
            Flavor::Podman => "podman",
        }
    }

    fn available(&self) -> bool {
        self.output(&owned(&["version"]))
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn build(
        &self,
        context: &Path,
        dockerfile: &Path,
        tag: &ImageName,
    ) -> Result<(), EngineError> {
        self.checked("build", tag, &build_args(context, dockerfile, tag))?;
        Ok(())
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, EngineError> {
        let stdout = self.checked("create", &spec.image, &create_args(spec))?;
        let id = stdout.lines().last().unwrap_or_default().trim().to_owned();
        if id.is_empty() {
            return Err(EngineError::InvalidOutput {
                op: "create",
                output: stdout,
            });
        }
        Ok(ContainerId::new(id))
    }

    fn start(&self, id: &ContainerId) -> Result<(), EngineError> {
        self.checked("start", id, &owned(&["start", id.as_str()]))?;
        Ok(())
    }

    fn stop(&self, id: &ContainerId) -> Result<(), EngineError> {
        self.checked("stop", id, &owned(&["stop", "--time", "10", id.as_str()]))?;
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<(), EngineError> {
        match self.checked("remove", id, &owned(&["rm", "--force", "--volumes", id.as_str()])) {
            Ok(_) | Err(EngineError::ContainerNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn wait(&self, id: &ContainerId) -> Result<i64, EngineError> {
        let stdout = self.checked("wait", id, &owned(&["wait", id.as_str()]))?;
        stdout
            .lines()
            .last()
            .and_then(|line| line.trim().parse::<i64>().ok())
            .ok_or(EngineError::InvalidOutput {
                op: "wait",
                output: stdout,
            })
    }

    fn logs(&self, id: &ContainerId) -> Result<String, EngineError> {
        let output = self.output(&owned(&["logs", id.as_str()]))?;
        if output.status.success() {
            Ok(combined_output(&output))
        } else {
            Err(failure("logs", id, &output))
        }
    }

    fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecOutput, EngineError> {
        let output = self.output(&exec_args(id, command))?;
        if output.status.code() == Some(EXEC_ENGINE_FAILURE) {
            return Err(failure("exec", id, &output));
        }
        Ok(ExecOutput {
            exit_code: output.status.code().map_or(-1, i64::from),
            output: combined_output(&output),
        })
    }

    fn copy_from_container(&self, id: &ContainerId, path: &str) -> Result<Vec<u8>, EngineError> {
        let output = self.output(&owned(&["cp", format!("{id}:{path}").as_str(), "-"]))?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
        if stderr.contains("could not find the file") || stderr.contains("no such file") {
            return Err(EngineError::PathNotFound {
                container: id.to_string(),
                path: path.to_owned(),
            });
        }
        Err(failure("copy", id, &output))
    }

    fn image_exists(&self, image: &ImageName) -> Result<bool, EngineError> {
        let output = self.output(&owned(&["image", "inspect", image.as_str()]))?;
        Ok(output.status.success())
    }

    fn pull(&self, image: &ImageName) -> Result<(), EngineError> {
        self.checked("pull", image, &owned(&["pull", image.as_str()]))?;
        Ok(())
    }

    fn push(&self, image: &ImageName, auth: &RegistryAuth) -> Result<(), EngineError> {
        let config_dir = tempfile::Builder::new()
            .prefix("gantry-registry-")
            .tempdir()?;
        if auth.has_login() {
            self.login(auth, config_dir.path())?;
        }
        self.checked("push", image, &self.push_args(image, config_dir.path()))?;
        Ok(())
    }

    fn create_network(&self, name: &str) -> Result<NetworkId, EngineError> {
        let stdout = self.checked(
            "network create",
            name,
            &owned(&["network", "create", "--label", "gantry=1", name]),
        )?;
        let id = stdout.lines().last().unwrap_or(name).trim();
        Ok(NetworkId::new(if id.is_empty() { name } else { id }))
    }

    fn remove_network(&self, id: &NetworkId) -> Result<(), EngineError> {
        match self.checked("network remove", id, &owned(&["network", "rm", id.as_str()])) {
            Ok(_) => Ok(()),
            Err(EngineError::CommandFailed { stderr, .. })
                if stderr.to_lowercase().contains("not found") =>
            {
                Err(EngineError::NetworkNotFound(id.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BindMount;
    use std::collections::BTreeMap;

    #[test]
    fn build_args_order() {
        let args = build_args(
            Path::new("/tmp/code"),
            Path::new("/tmp/code/Dockerfile"),
            &ImageName::new("app:v1"),
        );
        assert_eq!(
            args,
            owned(&[
                "build",
                "--file",
                "/tmp/code/Dockerfile",
                "--tag",
                "app:v1",
                "/tmp/code"
            ])
        );
    }

    #[test]
    fn create_args_include_everything_before_image() {
        let mut env = BTreeMap::new();
        env.insert("TEST".to_owned(), "TEST".to_owned());
        let mut mount = BindMount::new("/cache/m2", "/root/.m2");
        mount.read_only = true;
        let spec = ContainerSpec::new("busybox")
            .name("gantry-1-test")
            .env(&env)
            .mount(BindMount::new("/tmp/code", "/workspace"))
            .mount(mount)
            .workdir("/workspace")
            .network(&NetworkId::new("net"), Some("testService"))
            .command(owned(&["/bin/sh", "-c", "ls"]));
        let args = create_args(&spec);

        let image_pos = args.iter().position(|a| a == "busybox").unwrap();
        assert_eq!(&args[image_pos + 1..], &owned(&["/bin/sh", "-c", "ls"])[..]);
        assert!(args.contains(&"TEST=TEST".to_owned()));
        assert!(args.contains(&"/tmp/code:/workspace".to_owned()));
        assert!(args.contains(&"/cache/m2:/root/.m2:ro".to_owned()));
        assert!(args.contains(&"testService".to_owned()));
        assert!(args.iter().position(|a| a == "--workdir").unwrap() < image_pos);
    }

    #[test]
    fn exec_args_append_command() {
        let args = exec_args(&ContainerId::new("c1"), &owned(&["/bin/sh", "-c", "ls -la"]));
        assert_eq!(args, owned(&["exec", "c1", "/bin/sh", "-c", "ls -la"]));
    }

    #[test]
    fn docker_push_uses_private_config() {
        let engine = CliEngine::docker();
        let args = engine.push_args(&ImageName::new("r/app:v1"), Path::new("/tmp/cfg"));
        assert_eq!(args, owned(&["--config", "/tmp/cfg", "push", "r/app:v1"]));
    }

    #[test]
    fn podman_push_uses_authfile() {
        let engine = CliEngine::podman();
        let args = engine.push_args(&ImageName::new("r/app:v1"), Path::new("/tmp/cfg"));
        assert_eq!(
            args,
            owned(&["push", "--authfile", "/tmp/cfg/auth.json", "r/app:v1"])
        );
    }

    #[test]
    fn podman_login_writes_the_authfile_push_reads() {
        let engine = CliEngine::podman();
        let auth = RegistryAuth::new("registry.example.com", "team").with_login("ci", "secret");
        let login = engine.login_args(&auth, Path::new("/tmp/cfg"));
        assert_eq!(
            login,
            owned(&[
                "login",
                "--authfile",
                "/tmp/cfg/auth.json",
                "--username",
                "ci",
                "--password-stdin",
                "registry.example.com"
            ])
        );
    }

    /// Shell script standing in for the engine binary.
    #[cfg(unix)]
    fn fake_engine(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("engine");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    fn flag_value(line: &str, flag: &str) -> String {
        let words: Vec<&str> = line.split_whitespace().collect();
        words
            .iter()
            .position(|w| *w == flag)
            .and_then(|i| words.get(i + 1))
            .map(|w| (*w).to_owned())
            .unwrap_or_default()
    }

    #[cfg(unix)]
    #[test]
    fn login_and_push_share_one_private_credential_store() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("argv.log");
        let body = format!("echo \"$@\" >> {}\ncat > /dev/null", log.display());
        let auth = RegistryAuth::new("registry.example.com", "team").with_login("ci", "secret");
        let image = ImageName::new("registry.example.com/team/app:v1");

        for (engine, flag) in [
            (CliEngine::podman(), "--authfile"),
            (CliEngine::docker(), "--config"),
        ] {
            std::fs::remove_file(&log).ok();
            let engine = engine.with_binary(fake_engine(dir.path(), &body));
            engine.push(&image, &auth).unwrap();

            let logged = std::fs::read_to_string(&log).unwrap();
            let lines: Vec<&str> = logged.lines().collect();
            assert_eq!(lines.len(), 2, "{logged}");
            assert!(lines[0].contains("login") && lines[1].contains("push"));
            let store = flag_value(lines[0], flag);
            assert!(store.contains("gantry-registry-"), "{logged}");
            assert_eq!(store, flag_value(lines[1], flag));
            assert!(!logged.contains("secret"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn exec_failure_is_keyed_on_engine_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let id = ContainerId::new("c1");
        let command = owned(&["/bin/sh", "-c", "true"]);

        let engine = CliEngine::docker()
            .with_binary(fake_engine(dir.path(), "echo 'service is not running' >&2\nexit 1"));
        let out = engine.exec(&id, &command).unwrap();
        assert_eq!(out.exit_code, 1);
        assert!(out.output.contains("is not running"));

        let engine = CliEngine::docker().with_binary(fake_engine(
            dir.path(),
            "echo 'Error: container c1 is not running' >&2\nexit 125",
        ));
        assert!(engine.exec(&id, &command).is_err());
    }

    #[test]
    fn missing_binary_reports_unavailable() {
        let engine = CliEngine::docker().with_binary("/nonexistent/gantry-docker");
        assert!(!engine.available());
        assert!(matches!(
            engine.pull(&ImageName::new("busybox")),
            Err(EngineError::EngineUnavailable(_))
        ));
    }
}
