use crate::manager::StageManager;
use crate::StageError;
use gantry_schema::{CheckoutStage, SourceDescriptor};
use gantry_scm::{SourceCredentials, SourceProvider};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

impl StageManager {
    /// Populate the workspace: main source at the root, each dependency in
    /// its folder. Fail-fast; on any error the workspace is left empty.
    pub fn exec_code_checkout(
        &mut self,
        token: Option<&str>,
        stage: &CheckoutStage,
    ) -> Result<(), StageError> {
        stage.validate()?;
        let main = self.provider(&stage.main)?;
        let dependencies = stage
            .dependencies
            .iter()
            .map(|dep| self.provider(&dep.source).map(|p| (dep, p)))
            .collect::<Result<Vec<_>, StageError>>()?;

        let root = self.workspace.root().to_path_buf();
        self.workspace
            .reset()
            .map_err(StageError::workspace(&root))?;

        let main_ref = self
            .context
            .perform()
            .ref_name
            .as_deref()
            .or(stage.main.git_ref.as_deref());
        info!("checking out {} into {}", stage.main, root.display());

        let mut result = checkout_one(main.as_ref(), &stage.main, &root, main_ref, token);
        if result.is_ok() {
            for (dep, provider) in &dependencies {
                let dest = match self.workspace.join(&dep.folder) {
                    Ok(dest) => dest,
                    Err(e) => {
                        result = Err(e.into());
                        break;
                    }
                };
                info!("checking out dependency {} into {}", dep.source, dep.folder);
                result = std::fs::create_dir_all(&dest)
                    .map_err(StageError::workspace(&dest))
                    .and_then(|()| {
                        checkout_one(
                            provider.as_ref(),
                            &dep.source,
                            &dest,
                            dep.source.git_ref.as_deref(),
                            token,
                        )
                    });
                if result.is_err() {
                    break;
                }
            }
        }

        if result.is_err() {
            if let Err(e) = self.workspace.reset() {
                warn!("failed to clear workspace {}: {e}", root.display());
            }
        }
        result
    }

    fn provider(&self, descriptor: &SourceDescriptor) -> Result<Arc<dyn SourceProvider>, StageError> {
        self.sources
            .resolve(descriptor.kind)
            .ok_or(StageError::UnsupportedSourceKind(descriptor.kind))
    }
}

fn checkout_one(
    provider: &dyn SourceProvider,
    descriptor: &SourceDescriptor,
    dest: &Path,
    git_ref: Option<&str>,
    token: Option<&str>,
) -> Result<(), StageError> {
    let credentials = SourceCredentials::for_descriptor(token, descriptor);
    provider
        .checkout(descriptor, dest, git_ref, &credentials)
        .map_err(|source| StageError::Checkout {
            descriptor: descriptor.to_string(),
            source,
        })
}
