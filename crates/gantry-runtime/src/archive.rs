//! Tar streams exchanged with the engine's copy endpoints.

use std::fs;
use std::io;
use std::path::Path;

/// Pack `source` (file or directory) into a tar archive whose single top-level
/// entry is `name`, mirroring what `docker cp <id>:<path> -` emits.
pub fn pack_path(source: &Path, name: &str) -> Result<Vec<u8>, io::Error> {
    let mut ar = tar::Builder::new(Vec::new());
    ar.follow_symlinks(false);
    let meta = source.symlink_metadata()?;
    if meta.is_dir() {
        ar.append_dir_all(name, source)?;
    } else {
        ar.append_path_with_name(source, name)?;
    }
    ar.into_inner()
}

/// Extract a tar archive into `target_dir`. Entries escaping the target are skipped.
pub fn unpack_archive(data: &[u8], target_dir: &Path) -> Result<Vec<String>, io::Error> {
    fs::create_dir_all(target_dir)?;
    let mut ar = tar::Archive::new(data);
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(true);
    ar.set_unpack_xattrs(false);

    let mut unpacked = Vec::new();
    for entry in ar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        if entry.unpack_in(target_dir)? {
            unpacked.push(path);
        }
    }
    Ok(unpacked)
}

/// Name of the top-level entry in an archive, if it has any entries.
pub fn archive_root(data: &[u8]) -> Result<Option<String>, io::Error> {
    let mut ar = tar::Archive::new(data);
    let first = ar.entries()?.next().transpose()?;
    Ok(first.and_then(|entry| {
        entry.path().ok().and_then(|p| {
            p.components()
                .next()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
        })
    }))
}
