use crate::guard::{ContainerGuard, NetworkGuard};
use crate::manager::{script_command, StageManager};
use crate::StageError;
use gantry_runtime::ContainerSpec;
use gantry_schema::{ImageName, IntegrationTestStage};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationReport {
    pub image: ImageName,
    pub exit_code: i64,
    /// Combined output of the test container.
    pub logs: String,
    /// Sidecars that ran next to the test, by service name.
    pub services: Vec<String>,
}

impl StageManager {
    /// Run the test container next to its sidecars on a private network.
    ///
    /// A non-zero test exit is `StageError::TestFailed`. Sidecars, the test
    /// container and the network are torn down before returning in every
    /// case; teardown failures are logged and never replace the test result.
    pub fn exec_integration_test(
        &mut self,
        built: &[ImageName],
        stage: &IntegrationTestStage,
    ) -> Result<IntegrationReport, StageError> {
        stage.validate()?;
        let network_name = self.resource_name("net");
        let sidecar_names: Vec<String> = stage
            .services
            .iter()
            .map(|s| self.resource_name(&format!("svc-{}", s.name)))
            .collect();
        let test_name = self.resource_name("test");

        let engine = self.engine.as_ref();
        let network = NetworkGuard::create(engine, &self.tracker, &network_name)
            .map_err(StageError::lifecycle("create network", &network_name))?;

        // guards drop in reverse order: test container, sidecars, network
        let mut sidecars = Vec::with_capacity(stage.services.len());
        for (service, name) in stage.services.iter().zip(sidecar_names) {
            info!("starting service {} ({})", service.name, service.image);
            self.ensure_image(&service.image)?;
            let mut spec = ContainerSpec::new(service.image.clone())
                .name(name)
                .env(&service.env)
                .network(network.id(), Some(service.name.as_str()))
                .label("gantry.event", self.context.event_id().as_str());
            if !service.commands.is_empty() {
                spec = spec.command(script_command(&service.commands));
            }
            let sidecar = ContainerGuard::create(engine, &self.tracker, &spec)
                .map_err(StageError::lifecycle("create service", &service.name))?;
            engine
                .start(sidecar.id())
                .map_err(StageError::lifecycle("start service", &service.name))?;
            sidecars.push(sidecar);
        }

        let config = &stage.config;
        if built.contains(&config.image) {
            debug!("test image {} was built by this run", config.image);
        } else {
            self.ensure_image(&config.image)?;
        }
        let mut spec = self
            .workspace_container(&config.image, test_name, &config.env)
            .network(network.id(), None);
        if !config.commands.is_empty() {
            spec = spec.command(script_command(&config.commands));
        }
        info!("running integration test in {}", config.image);
        let test = ContainerGuard::create(engine, &self.tracker, &spec)
            .map_err(StageError::lifecycle("create test container", &config.image))?;
        engine
            .start(test.id())
            .map_err(StageError::lifecycle("start test container", &config.image))?;
        let exit_code = engine
            .wait(test.id())
            .map_err(StageError::lifecycle("wait for test container", &config.image))?;
        let logs = engine.logs(test.id()).unwrap_or_else(|e| {
            warn!("cannot read test container logs: {e}");
            String::new()
        });

        drop(test);
        drop(sidecars);
        drop(network);

        if exit_code != 0 {
            return Err(StageError::TestFailed {
                image: config.image.clone(),
                exit_code,
            });
        }
        info!("integration test passed");
        Ok(IntegrationReport {
            image: config.image.clone(),
            exit_code,
            logs,
            services: stage.services.iter().map(|s| s.name.clone()).collect(),
        })
    }
}
