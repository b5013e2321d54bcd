use crate::{ScmError, SourceCredentials, SourceProvider};
use gantry_schema::SourceDescriptor;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Copies a directory on the worker host. Refs do not apply and are ignored.
#[derive(Debug, Default)]
pub struct LocalProvider;

impl LocalProvider {
    pub fn new() -> Self {
        Self
    }
}

fn source_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

fn copy_tree(src: &Path, dst: &Path) -> Result<u64, std::io::Error> {
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            copied += copy_tree(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)?;
            #[cfg(not(unix))]
            fs::copy(src.join(&link), &target)?;
            copied += 1;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

impl SourceProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    fn checkout(
        &self,
        descriptor: &SourceDescriptor,
        dest: &Path,
        git_ref: Option<&str>,
        _credentials: &SourceCredentials,
    ) -> Result<(), ScmError> {
        let src = source_path(&descriptor.url);
        if !src.is_dir() {
            return Err(ScmError::NotFound(descriptor.url.clone()));
        }
        if let Some(r) = git_ref {
            debug!("local source {} ignores ref {r}", src.display());
        }
        fs::create_dir_all(dest)?;
        let copied = copy_tree(&src, dest)?;
        debug!("copied {copied} files from {} to {}", src.display(), dest.display());
        Ok(())
    }
}
