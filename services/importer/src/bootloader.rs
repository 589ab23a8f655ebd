//! Boot loader files linked into each snapshot.
//!
//! Loaders land under `<snapshot>/bootloader/<name>/`. A loader that fails
//! to link degrades the snapshot but never aborts a commit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bootres_events::{event_types, ImportEvent};
use tracing::{debug, error};

use crate::catalog::is_safe_component;
use crate::notify::Notifier;

/// Directory inside a snapshot holding boot loaders.
pub const BOOTLOADER_DIR: &str = "bootloader";

/// A boot loader that can place its files in a directory.
pub trait BootLoader: Send + Sync {
    fn name(&self) -> &str;

    /// Place the loader's files in `dest`, which already exists.
    fn link_into(&self, dest: &Path) -> io::Result<()>;
}

/// A loader whose files are the regular files of one directory.
#[derive(Debug, Clone)]
pub struct DirectoryBootLoader {
    name: String,
    source: PathBuf,
}

impl DirectoryBootLoader {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// One loader per subdirectory of `dir`, sorted by name.
    pub fn discover(dir: &Path) -> io::Result<Vec<DirectoryBootLoader>> {
        let mut loaders = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_safe_component(&name) && entry.file_type()?.is_dir() {
                loaders.push(DirectoryBootLoader::new(name, entry.path()));
            }
        }
        loaders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(loaders)
    }
}

impl BootLoader for DirectoryBootLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn link_into(&self, dest: &Path) -> io::Result<()> {
        for entry in fs::read_dir(&self.source)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let target = dest.join(entry.file_name());
            if fs::hard_link(entry.path(), &target).is_err() {
                // Different filesystem or existing file.
                fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }
}

/// Link every loader into `<snapshot>/bootloader/<name>/`.
///
/// Returns the names of the loaders that failed.
pub fn link_bootloaders(
    loaders: &[Box<dyn BootLoader>],
    snapshot: &Path,
    notifier: &Notifier,
) -> Vec<String> {
    let mut failed = Vec::new();

    for loader in loaders {
        let dest = snapshot.join(BOOTLOADER_DIR).join(loader.name());
        let result = fs::create_dir_all(&dest).and_then(|()| loader.link_into(&dest));
        match result {
            Ok(()) => debug!(loader = loader.name(), dest = %dest.display(), "Linked boot loader"),
            Err(e) => {
                error!(loader = loader.name(), error = %e, "Failed to link boot loader");
                notifier.publish(
                    ImportEvent::error(
                        event_types::BOOTLOADER_LINK_FAILED,
                        format!("Failed to link boot loader {}: {}", loader.name(), e),
                    )
                    .with_snapshot(snapshot.display().to_string()),
                );
                failed.push(loader.name().to_string());
            }
        }
    }

    failed
}
