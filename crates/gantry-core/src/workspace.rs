use fs2::FileExt;
use gantry_schema::validate_relative_path;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Mount point and working directory of the workspace inside stage containers.
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// Directory tree holding the checked-out sources and build outputs of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Relative roots are resolved against the current directory so the path
    /// can be bind-mounted.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir().map_or(root.clone(), |cwd| cwd.join(&root))
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove everything below the root and recreate it empty.
    pub fn reset(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        fs::read_dir(&self.root).map_or(true, |mut entries| entries.next().is_none())
    }

    /// `root/relative`, rejecting paths that would leave the workspace.
    pub fn join(&self, relative: &str) -> Result<PathBuf, gantry_schema::SchemaError> {
        validate_relative_path("workspace path", relative)?;
        Ok(self.root.join(relative))
    }

    /// Existing regular file at `relative` whose real path stays below the root.
    pub fn resolve_file(&self, relative: &str) -> Option<PathBuf> {
        let candidate = self.join(relative).ok()?;
        let real = candidate.canonicalize().ok()?;
        let root = self.root.canonicalize().ok()?;
        (real.starts_with(&root) && real.is_file()).then_some(candidate)
    }

    /// Lock file beside the root, so resetting the tree never touches it.
    pub fn lock_path(&self) -> PathBuf {
        let name = self
            .root
            .file_name()
            .map_or_else(|| "workspace".to_owned(), |n| n.to_string_lossy().into_owned());
        self.root
            .parent()
            .unwrap_or(Path::new("/"))
            .join(format!(".{name}.lock"))
    }
}

/// Advisory lock that keeps two worker processes off one workspace.
pub struct WorkspaceLock {
    lock_file: File,
}

impl WorkspaceLock {
    fn open(lock_path: &Path) -> io::Result<File> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
    }

    pub fn acquire(lock_path: &Path) -> io::Result<Self> {
        let file = Self::open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { lock_file: file })
    }

    pub fn try_acquire(lock_path: &Path) -> io::Result<Option<Self>> {
        let file = Self::open(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_and_recreates() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().join("ws"));
        ws.reset().unwrap();
        fs::write(ws.root().join("stale.txt"), "x").unwrap();
        ws.reset().unwrap();
        assert!(ws.root().is_dir());
        assert!(ws.is_empty());
    }

    #[test]
    fn resolve_file_stays_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().join("ws"));
        ws.reset().unwrap();
        fs::write(ws.root().join("Dockerfile"), "FROM busybox").unwrap();
        fs::write(dir.path().join("outside"), "x").unwrap();

        assert!(ws.resolve_file("Dockerfile").is_some());
        assert!(ws.resolve_file("Dockerfile-abc").is_none());
        assert!(ws.resolve_file("../outside").is_none());
        assert!(ws.resolve_file("/etc/passwd").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().join("ws"));
        ws.reset().unwrap();
        fs::write(dir.path().join("outside"), "x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("outside"), ws.root().join("Dockerfile"))
            .unwrap();
        assert!(ws.resolve_file("Dockerfile").is_none());
    }

    #[test]
    fn lock_path_is_a_sibling() {
        let ws = Workspace::new("/var/lib/gantry/workspace");
        assert_eq!(
            ws.lock_path(),
            PathBuf::from("/var/lib/gantry/.workspace.lock")
        );
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".ws.lock");

        let _lock = WorkspaceLock::acquire(&lock_path).unwrap();
        assert!(WorkspaceLock::try_acquire(&lock_path).unwrap().is_none());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".ws.lock");
        {
            let _lock = WorkspaceLock::acquire(&lock_path).unwrap();
        }
        assert!(WorkspaceLock::try_acquire(&lock_path).unwrap().is_some());
    }
}
