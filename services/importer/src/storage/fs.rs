//! Crash-safe filesystem primitives.
//!
//! Every control file is written to a temp file in the same directory,
//! fsynced, and renamed into place. The `current` pointer is replaced the
//! same way: a temporary symlink is created next to it and renamed over it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{symlink, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Temp path next to `path`, hidden and unique to this process.
fn sibling_temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
}

/// Write `content` to `path` so readers see either the old file or the new one.
pub fn atomic_write(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let temp_path = sibling_temp_path(path);

    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, path)?;
        sync_parent(path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Point the symlink at `link` to `target`, replacing any existing link in one rename.
pub fn atomic_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let temp_link = sibling_temp_path(link);

    match fs::remove_file(&temp_link) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    symlink(target, &temp_link)?;
    if let Err(e) = fs::rename(&temp_link, link) {
        let _ = fs::remove_file(&temp_link);
        return Err(e);
    }

    sync_parent(link)
}

/// Set the modification time of `path` to now.
pub fn touch(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_modified(SystemTime::now())
}

/// Remove a directory tree, treating a missing tree as already removed.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Fsync the directory holding `path` so a completed rename survives a crash.
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}
