//! Content-addressed download cache shared across snapshots.
//!
//! Entries live at `<root>/cache/<sha256-hex>`. A snapshot references an
//! entry by hard-linking it into its own tree, so the reference count of an
//! entry is its link count minus one. Entries with no remaining references
//! are reclaimable.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{IoResultExt, StorageError};

/// Suffix of in-flight downloads inside the cache directory.
const PARTIAL_SUFFIX: &str = ".partial";

/// A cached artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// SHA-256 hex digest of the content.
    pub digest: String,
    /// Path to the cached file.
    pub path: PathBuf,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Hard link count, including the cache's own link.
    pub links: u64,
}

impl CacheEntry {
    /// Number of snapshots referencing this entry.
    pub fn ref_count(&self) -> u64 {
        self.links.saturating_sub(1)
    }
}

/// Result of pruning unreferenced entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePruneReport {
    pub removed: usize,
    pub bytes_freed: u64,
    pub failures: Vec<String>,
}

/// Content-addressed cache manager.
#[derive(Debug, Clone)]
pub struct ContentCache {
    dir: PathBuf,
}

impl ContentCache {
    /// Create a cache rooted at `dir`. The directory is created on demand.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry for `digest`.
    pub fn entry_path(&self, digest: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_digest(digest) {
            return Err(StorageError::InvalidDigest(digest.to_string()));
        }
        Ok(self.dir.join(digest))
    }

    /// Scratch path for an in-flight download of `digest`.
    pub fn partial_path(&self, digest: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_digest(digest) {
            return Err(StorageError::InvalidDigest(digest.to_string()));
        }
        Ok(self
            .dir
            .join(format!(".{}.{}{}", digest, std::process::id(), PARTIAL_SUFFIX)))
    }

    /// Check if an entry exists.
    pub fn contains(&self, digest: &str) -> bool {
        self.entry_path(digest)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Move an already verified file into the cache under `digest`.
    pub fn insert_file(&self, digest: &str, source: &Path) -> Result<PathBuf, StorageError> {
        let dest = self.entry_path(digest)?;
        fs::create_dir_all(&self.dir).at(&self.dir)?;
        fs::rename(source, &dest).at(&dest)?;
        debug!(digest = %digest, "Registered cache entry");
        Ok(dest)
    }

    /// Store `data` under `digest`, verifying the content first.
    pub fn insert_bytes(&self, digest: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        let actual = hex::encode(Sha256::digest(data));
        if actual != digest {
            return Err(StorageError::DigestMismatch {
                expected: digest.to_string(),
                actual,
            });
        }

        let dest = self.entry_path(digest)?;
        if dest.is_file() {
            return Ok(dest);
        }

        let partial = self.partial_path(digest)?;
        fs::create_dir_all(&self.dir).at(&self.dir)?;
        fs::write(&partial, data).at(&partial)?;
        self.insert_file(digest, &partial)
    }

    /// Hard-link the entry for `digest` to `dest`, replacing whatever is there.
    pub fn link_into(&self, digest: &str, dest: &Path) -> Result<(), StorageError> {
        let source = self.entry_path(digest)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        match fs::remove_file(dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(dest, e)),
        }
        fs::hard_link(&source, dest).at(dest)
    }

    /// List all complete entries.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, StorageError> {
        let mut entries = Vec::new();
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };

        for entry in read_dir {
            let entry = entry.at(&self.dir)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_valid_digest(&name) {
                continue;
            }
            let path = entry.path();
            let metadata = entry.metadata().at(&path)?;
            if !metadata.is_file() {
                continue;
            }
            entries.push(CacheEntry {
                digest: name,
                path,
                size_bytes: metadata.len(),
                links: metadata.nlink(),
            });
        }

        entries.sort_by(|a, b| a.digest.cmp(&b.digest));
        Ok(entries)
    }

    /// Remove every entry no snapshot references, plus abandoned partial downloads.
    ///
    /// A failure to remove one entry is recorded and does not stop the others.
    pub fn prune_unreferenced(&self) -> CachePruneReport {
        let mut report = CachePruneReport::default();

        let entries = match self.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list cache entries");
                report.failures.push(e.to_string());
                return report;
            }
        };

        for entry in entries.iter().filter(|e| e.ref_count() == 0) {
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    report.removed += 1;
                    report.bytes_freed += entry.size_bytes;
                    debug!(digest = %entry.digest, size = entry.size_bytes, "Removed unreferenced cache entry");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(digest = %entry.digest, error = %e, "Failed to remove cache entry");
                    report
                        .failures
                        .push(format!("{}: {}", entry.path.display(), e));
                }
            }
        }

        self.remove_partials(&mut report);

        if report.removed > 0 {
            info!(
                removed = report.removed,
                bytes_freed = report.bytes_freed,
                "Pruned unreferenced cache entries"
            );
        }
        report
    }

    fn remove_partials(&self, report: &mut CachePruneReport) {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX) {
                if let Err(e) = fs::remove_file(entry.path()) {
                    report.failures.push(format!("{}: {}", entry.path().display(), e));
                }
            }
        }
    }
}

/// A lowercase SHA-256 hex digest.
pub fn is_valid_digest(digest: &str) -> bool {
    digest.len() == 64
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
