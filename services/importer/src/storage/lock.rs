//! Single-writer exclusion for a storage root.
//!
//! The lock is an exclusive, non-blocking `flock(2)` on `<root>/.import.lock`.
//! It is released when the file descriptor is closed, including when the
//! process dies, so a killed run never leaves a stale lock behind.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use super::{StorageError, StorageRoot};

/// Held for the duration of an import run.
#[derive(Debug)]
pub struct ImportLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl ImportLock {
    /// Take the lock or fail immediately with [`StorageError::Locked`].
    pub fn acquire(storage: &StorageRoot) -> Result<Self, StorageError> {
        Self::acquire_path(&storage.lock_path())
    }

    pub fn acquire_path(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| StorageError::io(path, e))?;

        let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => return Err(StorageError::Locked(path.to_path_buf())),
            Err((_, errno)) => return Err(StorageError::io(path, io::Error::from(errno))),
        };

        debug!(path = %path.display(), "Acquired import lock");
        Ok(Self {
            _lock: lock,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = TempDir::new().unwrap();
        let root = StorageRoot::open(dir.path()).unwrap();

        let held = ImportLock::acquire(&root).unwrap();
        assert!(matches!(
            ImportLock::acquire(&root),
            Err(StorageError::Locked(_))
        ));

        drop(held);
        ImportLock::acquire(&root).unwrap();
    }

    #[test]
    fn test_lock_file_survives_release() {
        let dir = TempDir::new().unwrap();
        let root = StorageRoot::open(dir.path()).unwrap();

        let lock = ImportLock::acquire(&root).unwrap();
        assert_eq!(lock.path(), root.lock_path());
        drop(lock);

        assert!(root.lock_path().is_file());
        let again = ImportLock::acquire_path(&root.lock_path()).unwrap();
        assert!(matches!(
            ImportLock::acquire_path(&root.lock_path()),
            Err(StorageError::Locked(_))
        ));
        drop(again);
    }
}
