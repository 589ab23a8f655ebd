//! The storage root: `current`, snapshot directories and the cache.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::cache::ContentCache;
use super::fs::{atomic_symlink, remove_tree};
use super::snapshot::{SnapshotStamp, SNAPSHOT_PREFIX};
use super::{IoResultExt, StorageError};

/// Name of the current pointer inside the storage root.
pub const CURRENT_LINK: &str = "current";
/// Name of the shared cache directory inside the storage root.
pub const CACHE_DIR: &str = "cache";
/// Metadata record file inside a snapshot.
pub const META_FILE: &str = "maas.meta";
/// Target descriptor file inside a snapshot.
pub const TARGETS_FILE: &str = "maas.tgt";
/// Advisory lock file inside the storage root.
pub const LOCK_FILE: &str = ".import.lock";

/// Attempts at allocating a fresh staging directory before giving up.
const STAGING_ATTEMPTS: usize = 16;

/// Filesystem location owning all importer state.
#[derive(Debug, Clone)]
pub struct StorageRoot {
    path: PathBuf,
    cache: ContentCache,
}

impl StorageRoot {
    /// Open (creating if needed) the storage root at `path`.
    ///
    /// The path is canonicalized so snapshot paths written into control
    /// files and the current pointer are absolute.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        fs::create_dir_all(path).at(path)?;
        let path = path.canonicalize().at(path)?;

        let cache = ContentCache::new(path.join(CACHE_DIR));
        fs::create_dir_all(cache.dir()).at(cache.dir())?;

        Ok(Self { path, cache })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Path of the current pointer itself (not its target).
    pub fn current_link(&self) -> PathBuf {
        self.path.join(CURRENT_LINK)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.join(LOCK_FILE)
    }

    /// The snapshot `current` resolves to, if any.
    pub fn current_snapshot(&self) -> Result<Option<PathBuf>, StorageError> {
        let link = self.current_link();
        let target = match fs::read_link(&link) {
            Ok(target) => target,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                return Err(StorageError::CurrentNotSymlink(link))
            }
            Err(e) => return Err(StorageError::io(link, e)),
        };

        let target = if target.is_absolute() {
            target
        } else {
            self.path.join(target)
        };

        if !target.is_dir() {
            warn!(
                link = %link.display(),
                target = %target.display(),
                "Current pointer is dangling"
            );
            return Ok(None);
        }
        Ok(Some(target))
    }

    /// Directory name of the active snapshot, if any.
    pub fn current_name(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .current_snapshot()?
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned())))
    }

    /// All snapshot directories, oldest first.
    pub fn snapshots(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.path).at(&self.path)? {
            let entry = entry.at(&self.path)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(SNAPSHOT_PREFIX) {
                continue;
            }
            let file_type = entry.file_type().at(&entry.path())?;
            if file_type.is_dir() {
                snapshots.push(entry.path());
            }
        }
        snapshots.sort();
        Ok(snapshots)
    }

    /// Names of all snapshot directories.
    pub fn snapshot_names(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self
            .snapshots()?
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect())
    }

    /// True if `path` is a snapshot directory directly inside this root.
    pub fn is_snapshot_path(&self, path: &Path) -> bool {
        path.parent() == Some(self.path.as_path())
            && path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(SNAPSHOT_PREFIX))
                .unwrap_or(false)
    }

    /// Create an empty staging directory named after every existing snapshot.
    pub fn create_staging(&self) -> Result<PathBuf, StorageError> {
        for _ in 0..STAGING_ATTEMPTS {
            let newest = self
                .snapshot_names()?
                .iter()
                .filter_map(|n| SnapshotStamp::from_dir_name(n))
                .max();
            let stamp = SnapshotStamp::next_after(SnapshotStamp::now(), newest);
            let staging = self.path.join(stamp.dir_name());

            match fs::create_dir(&staging) {
                Ok(()) => {
                    debug!(staging = %staging.display(), "Allocated staging directory");
                    return Ok(staging);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::io(staging, e)),
            }
        }

        Err(StorageError::io(
            &self.path,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                "could not allocate a unique staging directory",
            ),
        ))
    }

    /// Atomically repoint `current` at `snapshot`.
    pub fn activate(&self, snapshot: &Path) -> Result<(), StorageError> {
        let link = self.current_link();
        atomic_symlink(snapshot, &link).at(&link)?;
        info!(snapshot = %snapshot.display(), "Current pointer updated");
        Ok(())
    }

    /// Delete a snapshot directory. The active snapshot is never deleted.
    ///
    /// A `current` that is not a symlink names no snapshot, so it does not
    /// protect any.
    pub fn remove_snapshot(&self, snapshot: &Path) -> Result<(), StorageError> {
        match self.current_snapshot() {
            Ok(Some(current)) if current.file_name() == snapshot.file_name() => {
                return Err(StorageError::ActiveSnapshot(snapshot.to_path_buf()));
            }
            Ok(_) | Err(StorageError::CurrentNotSymlink(_)) => {}
            Err(e) => return Err(e),
        }
        remove_tree(snapshot).at(snapshot)
    }

    /// Delete snapshot directories that were never activated.
    ///
    /// Names only grow, so anything sorting after the active snapshot was
    /// left behind by an interrupted run. On a cold start every snapshot
    /// directory is leftover staging.
    pub fn cleanup_unactivated(&self) -> Result<Vec<PathBuf>, StorageError> {
        let current = self.current_name()?;
        let leftovers: Vec<PathBuf> = self
            .snapshots()?
            .into_iter()
            .filter(|p| match (&current, p.file_name()) {
                (Some(current), Some(name)) => name.to_string_lossy().as_ref() > current.as_str(),
                _ => true,
            })
            .collect();

        Ok(self.remove_all(leftovers))
    }

    /// Delete snapshot directories not named in `known`, except the active one.
    pub fn discard_new_snapshots(
        &self,
        known: &BTreeSet<String>,
    ) -> Result<Vec<PathBuf>, StorageError> {
        let current = self.current_name()?;
        let fresh: Vec<PathBuf> = self
            .snapshots()?
            .into_iter()
            .filter(|p| {
                let name = p
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                !known.contains(&name) && current.as_deref() != Some(name.as_str())
            })
            .collect();

        Ok(self.remove_all(fresh))
    }

    fn remove_all(&self, paths: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut removed = Vec::with_capacity(paths.len());
        for path in paths {
            match self.remove_snapshot(&path) {
                Ok(()) => {
                    info!(snapshot = %path.display(), "Removed unactivated snapshot");
                    removed.push(path);
                }
                Err(e) => warn!(snapshot = %path.display(), error = %e, "Failed to remove snapshot"),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_root() -> (TempDir, StorageRoot) {
        let dir = TempDir::new().unwrap();
        let root = StorageRoot::open(dir.path().join("boot-resources")).unwrap();
        (dir, root)
    }

    #[test]
    fn test_open_creates_layout() {
        let (_dir, root) = open_root();
        assert!(root.path().is_absolute());
        assert!(root.cache().dir().is_dir());
        assert!(root.current_snapshot().unwrap().is_none());
        assert!(root.snapshots().unwrap().is_empty());
    }

    #[test]
    fn test_staging_names_increase() {
        let (_dir, root) = open_root();
        let first = root.create_staging().unwrap();
        let second = root.create_staging().unwrap();
        let third = root.create_staging().unwrap();

        assert!(first < second && second < third);
        assert!(root.is_snapshot_path(&first));
        assert_eq!(root.snapshots().unwrap(), vec![first, second, third]);
    }

    #[test]
    fn test_activate_and_resolve() {
        let (_dir, root) = open_root();
        let snapshot = root.create_staging().unwrap();

        root.activate(&snapshot).unwrap();

        assert_eq!(root.current_snapshot().unwrap(), Some(snapshot.clone()));
        assert_eq!(
            root.current_name().unwrap().as_deref(),
            snapshot.file_name().and_then(|n| n.to_str())
        );
    }

    #[test]
    fn test_current_not_symlink() {
        let (_dir, root) = open_root();
        fs::create_dir(root.current_link()).unwrap();
        assert!(matches!(
            root.current_snapshot(),
            Err(StorageError::CurrentNotSymlink(_))
        ));
    }

    #[test]
    fn test_remove_snapshot_refuses_current() {
        let (_dir, root) = open_root();
        let snapshot = root.create_staging().unwrap();
        root.activate(&snapshot).unwrap();

        assert!(matches!(
            root.remove_snapshot(&snapshot),
            Err(StorageError::ActiveSnapshot(_))
        ));
        assert!(snapshot.is_dir());
    }

    #[test]
    fn test_cleanup_unactivated_keeps_older_and_current() {
        let (_dir, root) = open_root();
        let old = root.create_staging().unwrap();
        let active = root.create_staging().unwrap();
        let leftover = root.create_staging().unwrap();
        root.activate(&active).unwrap();

        let removed = root.cleanup_unactivated().unwrap();

        assert_eq!(removed, vec![leftover.clone()]);
        assert!(old.is_dir());
        assert!(active.is_dir());
        assert!(!leftover.exists());
    }

    #[test]
    fn test_cleanup_unactivated_cold_start_removes_everything() {
        let (_dir, root) = open_root();
        root.create_staging().unwrap();
        root.create_staging().unwrap();

        assert_eq!(root.cleanup_unactivated().unwrap().len(), 2);
        assert!(root.snapshots().unwrap().is_empty());
    }

    #[test]
    fn test_discard_new_snapshots() {
        let (_dir, root) = open_root();
        let before = root.create_staging().unwrap();
        root.activate(&before).unwrap();
        let known = root.snapshot_names().unwrap();
        let fresh = root.create_staging().unwrap();

        let removed = root.discard_new_snapshots(&known).unwrap();

        assert_eq!(removed, vec![fresh]);
        assert_eq!(root.snapshot_names().unwrap(), known);
    }
}
