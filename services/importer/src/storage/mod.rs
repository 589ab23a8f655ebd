//! On-disk state of the importer.
//!
//! This module handles:
//! - The storage root layout (`current`, `snapshot-*`, `cache/`)
//! - Crash-safe control file writes and the atomic `current` swap
//! - Snapshot naming and staging allocation
//! - The shared content-addressed cache
//! - Single-writer locking of a storage root

mod cache;
pub mod fs;
mod lock;
mod root;
mod snapshot;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use cache::{is_valid_digest, CacheEntry, CachePruneReport, ContentCache};
pub use lock::ImportLock;
pub use root::{StorageRoot, CACHE_DIR, CURRENT_LINK, LOCK_FILE, META_FILE, TARGETS_FILE};
pub use snapshot::{SnapshotStamp, SNAPSHOT_PREFIX};

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Storage root {0} is locked by another import")]
    Locked(PathBuf),

    #[error("Current pointer {0} exists but is not a symlink")]
    CurrentNotSymlink(PathBuf),

    #[error("Refusing to remove active snapshot {0}")]
    ActiveSnapshot(PathBuf),

    #[error("Invalid cache digest: {0}")]
    InvalidDigest(String),

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Attach the offending path to an I/O result.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T, StorageError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T, StorageError> {
        self.map_err(|e| StorageError::io(path, e))
    }
}
