//! Composing the tgt-admin target descriptor of a snapshot.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::catalog::{is_safe_component, FileKind, ImageKey};
use crate::storage::fs::atomic_write;
use crate::storage::{StorageError, TARGETS_FILE};

/// Common prefix of every target IQN.
pub const IQN_PREFIX: &str = "iqn.2004-05.com.ubuntu:maas";

/// One block target exposed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TargetEntry {
    pub key: ImageKey,
    pub kind: FileKind,
    /// Absolute path of the backing file.
    pub backing_store: PathBuf,
}

impl TargetEntry {
    pub fn iqn(&self) -> String {
        format!(
            "{}:ephemeral-{}-{}-{}-{}-{}",
            IQN_PREFIX,
            self.key.osystem,
            self.key.arch,
            self.key.subarch,
            self.key.release,
            self.key.label
        )
    }

    fn render(&self, out: &mut String) {
        out.push_str(&format!("<target {}>\n", self.iqn()));
        out.push_str("    readonly 1\n");
        out.push_str("    allow-in-use yes\n");
        out.push_str(&format!(
            "    backing-store \"{}\"\n",
            self.backing_store.display()
        ));
        out.push_str("    driver iscsi\n");
        out.push_str("</target>\n");
    }
}

/// Subdirectories of `dir` usable as image key components, sorted.
fn component_dirs(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_safe_component(&name) || !entry.file_type()?.is_dir() {
            continue;
        }
        dirs.push((name, entry.path()));
    }
    dirs.sort();
    Ok(dirs)
}

/// Find the backing file of every image in `snapshot`, one per image key.
pub fn scan_images(snapshot: &Path) -> Result<Vec<TargetEntry>, StorageError> {
    let io_err = |e: io::Error| StorageError::io(snapshot, e);
    let mut entries = Vec::new();

    for (os, os_dir) in component_dirs(snapshot).map_err(io_err)? {
        for (arch, arch_dir) in component_dirs(&os_dir).map_err(io_err)? {
            for (subarch, sub_dir) in component_dirs(&arch_dir).map_err(io_err)? {
                for (release, rel_dir) in component_dirs(&sub_dir).map_err(io_err)? {
                    for (label, label_dir) in component_dirs(&rel_dir).map_err(io_err)? {
                        let backing = FileKind::backing_stores()
                            .into_iter()
                            .map(|kind| (kind, label_dir.join(kind.file_name())))
                            .find(|(_, path)| path.is_file());

                        if let Some((kind, backing_store)) = backing {
                            entries.push(TargetEntry {
                                key: ImageKey::new(&os, &arch, &subarch, &release, label),
                                kind,
                                backing_store,
                            });
                        }
                    }
                }
            }
        }
    }

    entries.sort();
    Ok(entries)
}

/// Render the descriptor for `entries`.
pub fn render_descriptor(entries: &[TargetEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        entry.render(&mut out);
    }
    out
}

/// Compose the descriptor text for `snapshot`.
pub fn compose_descriptor(snapshot: &Path) -> Result<String, StorageError> {
    Ok(render_descriptor(&scan_images(snapshot)?))
}

/// Write `<snapshot>/maas.tgt` crash-safely. Returns its path.
pub fn write_descriptor(snapshot: &Path) -> Result<PathBuf, StorageError> {
    let entries = scan_images(snapshot)?;
    let path = snapshot.join(TARGETS_FILE);
    atomic_write(&path, render_descriptor(&entries).as_bytes(), 0o644)
        .map_err(|e| StorageError::io(&path, e))?;
    debug!(path = %path.display(), targets = entries.len(), "Wrote target descriptor");
    Ok(path)
}
