use crate::manager::StageManager;
use crate::StageError;
use gantry_schema::{ImageBuildInfo, ImageBuildStage, ImageName};
use std::io::Write as _;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, info};

const DEFAULT_DOCKERFILE: &str = "Dockerfile";

impl StageManager {
    /// Build every entry in order with the workspace root as context.
    /// The first failure aborts the stage. Returns the tagged images in order.
    pub fn exec_image_build(
        &mut self,
        stage: &ImageBuildStage,
    ) -> Result<Vec<ImageName>, StageError> {
        stage.validate()?;
        let mut built = Vec::with_capacity(stage.builds.len());
        for info in &stage.builds {
            info!("building image {} ({})", info.image_name, info.label());
            // the inline temp file must outlive the build call
            let (dockerfile, _inline) = self.dockerfile_for(info)?;
            debug!("using Dockerfile {}", dockerfile.display());
            self.engine
                .build(self.workspace.root(), &dockerfile, &info.image_name)
                .map_err(|source| StageError::Build {
                    image: info.image_name.clone(),
                    source,
                })?;
            built.push(info.image_name.clone());
        }
        Ok(built)
    }

    fn dockerfile_for(
        &self,
        info: &ImageBuildInfo,
    ) -> Result<(PathBuf, Option<NamedTempFile>), StageError> {
        let root = self.workspace.root();
        if let Some(content) = info.inline_dockerfile() {
            let mut file = tempfile::Builder::new()
                .prefix(".gantry-dockerfile-")
                .tempfile_in(root)
                .map_err(StageError::workspace(root))?;
            file.write_all(content.as_bytes())
                .and_then(|()| file.flush())
                .map_err(StageError::workspace(file.path()))?;
            return Ok((file.path().to_path_buf(), Some(file)));
        }
        let relative = info.explicit_dockerfile_path().unwrap_or(DEFAULT_DOCKERFILE);
        let path = self
            .workspace
            .resolve_file(relative)
            .ok_or_else(|| StageError::DockerfileNotFound {
                image: info.image_name.clone(),
                path: root.join(relative),
            })?;
        Ok((path, None))
    }
}
