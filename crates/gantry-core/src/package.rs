use crate::guard::ContainerGuard;
use crate::manager::{shell_command, StageManager};
use crate::toolchain::{cache_key, toolchain};
use crate::workspace::CONTAINER_WORKDIR;
use crate::StageError;
use gantry_runtime::{archive, BindMount, EngineError};
use gantry_schema::{BuildTool, BuilderImage, CommandSet, ContainerId};
use std::fmt;
use tracing::{debug, info, warn};

/// Keeps the builder container alive between `exec` calls; exits on SIGTERM.
const KEEPALIVE: &str = "trap 'exit 0' TERM; while :; do sleep 1; done";

/// The three command phases of the package stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Provision,
    UnitTest,
    Package,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Provision => "provision",
            Phase::UnitTest => "unit test",
            Phase::Package => "package",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageReport {
    /// Declared outputs copied back into the workspace, relative to its root.
    pub outputs: Vec<String>,
    /// `Some(true)` when a dependency cache was restored, `Some(false)` on a
    /// miss, `None` when caching was not requested.
    pub cache_hit: Option<bool>,
    pub commands_run: usize,
}

impl StageManager {
    /// Provision, unit-test and package inside one builder container that
    /// shares the workspace. The container is removed on every exit path.
    pub fn exec_package(
        &mut self,
        builder: &BuilderImage,
        build_tool: Option<&BuildTool>,
        unit_test: &CommandSet,
        package: &CommandSet,
    ) -> Result<PackageReport, StageError> {
        unit_test.validate()?;
        package.validate()?;
        info!("packaging with builder image {}", builder.image);
        self.ensure_image(&builder.image)?;

        let name = self.resource_name("builder");
        let mut spec = self
            .workspace_container(&builder.image, name, &builder.env)
            .command(shell_command(KEEPALIVE));
        let mut report = PackageReport::default();
        if let Some(tool) = build_tool.filter(|t| t.cache_dependency) {
            let (mount, hit) = self.restore_cache(tool);
            report.cache_hit = Some(hit);
            if let Some(mount) = mount {
                spec = spec.mount(mount);
            }
        }

        let engine = self.engine.as_ref();
        let container = ContainerGuard::create(engine, &self.tracker, &spec)
            .map_err(StageError::lifecycle("create container", &builder.image))?;
        engine
            .start(container.id())
            .map_err(StageError::lifecycle("start container", container.label()))?;

        if let Some(tool) = build_tool {
            let chain = toolchain(tool.name);
            info!("provisioning {} {}", tool.name, tool.version);
            report.commands_run +=
                self.run_phase(container.id(), Phase::Provision, &chain.provision_commands())?;
        }

        report.commands_run += self.run_phase(container.id(), Phase::UnitTest, &unit_test.commands)?;
        report
            .outputs
            .extend(self.copy_outputs(container.id(), Phase::UnitTest, &unit_test.outputs)?);

        report.commands_run += self.run_phase(container.id(), Phase::Package, &package.commands)?;
        report
            .outputs
            .extend(self.copy_outputs(container.id(), Phase::Package, &package.outputs)?);

        Ok(report)
    }

    /// Bind mount for the tool's dependency cache. A missing cache directory
    /// is a miss: it is created empty so this run seeds it.
    fn restore_cache(&self, tool: &BuildTool) -> (Option<BindMount>, bool) {
        let dir = self.cache_root.join(cache_key(tool));
        let hit = dir.is_dir();
        if hit {
            info!("restoring {} cache from {}", tool.name, dir.display());
        } else {
            warn!("no {} {} dependency cache at {}", tool.name, tool.version, dir.display());
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!("cannot create cache directory {}: {e}", dir.display());
                return (None, false);
            }
        }
        let target = toolchain(tool.name).cache_path;
        (Some(BindMount::new(dir, target)), hit)
    }

    fn run_phase(
        &self,
        id: &ContainerId,
        phase: Phase,
        commands: &[String],
    ) -> Result<usize, StageError> {
        for command in commands {
            debug!("[{phase}] {command}");
            let output = self
                .engine
                .exec(id, &shell_command(command))
                .map_err(StageError::lifecycle("exec in container", id))?;
            if !output.output.is_empty() {
                debug!("[{phase}] output:\n{}", output.output.trim_end());
            }
            if !output.success() {
                return Err(StageError::CommandFailed {
                    phase,
                    command: command.clone(),
                    exit_code: output.exit_code,
                });
            }
        }
        Ok(commands.len())
    }

    /// Copy each declared output out of the container and unpack it at the
    /// same relative location in the workspace.
    fn copy_outputs(
        &self,
        id: &ContainerId,
        phase: Phase,
        outputs: &[String],
    ) -> Result<Vec<String>, StageError> {
        let mut copied = Vec::with_capacity(outputs.len());
        for output in outputs {
            let relative = output.trim_start_matches("./");
            let container_path = format!("{CONTAINER_WORKDIR}/{relative}");
            let missing = || StageError::OutputMissing {
                phase,
                path: output.clone(),
            };
            let data = match self.engine.copy_from_container(id, &container_path) {
                Ok(data) => data,
                Err(EngineError::PathNotFound { .. }) => return Err(missing()),
                Err(e) => return Err(StageError::lifecycle("copy from container", id)(e)),
            };
            let host = self.workspace.join(relative)?;
            let parent = host.parent().unwrap_or(self.workspace.root());
            let entries = archive::unpack_archive(&data, parent)
                .map_err(StageError::workspace(parent))?;
            if entries.is_empty() {
                return Err(missing());
            }
            debug!("[{phase}] copied {output} ({} entries)", entries.len());
            copied.push(relative.to_owned());
        }
        Ok(copied)
    }
}
