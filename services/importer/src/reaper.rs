//! Removal of superseded snapshots and orphaned cache entries.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::storage::{StorageError, StorageRoot};

/// What a reaper pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub snapshots_removed: Vec<PathBuf>,
    pub cache_entries_removed: usize,
    pub bytes_freed: u64,
    pub failures: Vec<String>,
}

impl ReapReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Prunes everything the active snapshot does not need.
#[derive(Debug)]
pub struct Reaper<'a> {
    storage: &'a StorageRoot,
}

impl<'a> Reaper<'a> {
    pub fn new(storage: &'a StorageRoot) -> Self {
        Self { storage }
    }

    /// Delete every snapshot but the active one, then every unreferenced
    /// cache entry. Snapshots go first so their cache links are released.
    ///
    /// Without an active snapshot no snapshot is deleted.
    pub fn reap(&self) -> Result<ReapReport, StorageError> {
        let mut report = ReapReport::default();

        match self.storage.current_snapshot()? {
            Some(current) => {
                for snapshot in self.storage.snapshots()? {
                    if snapshot.file_name() == current.file_name() {
                        continue;
                    }
                    match self.storage.remove_snapshot(&snapshot) {
                        Ok(()) => {
                            debug!(snapshot = %snapshot.display(), "Removed superseded snapshot");
                            report.snapshots_removed.push(snapshot);
                        }
                        Err(e) => {
                            warn!(snapshot = %snapshot.display(), error = %e, "Failed to remove snapshot");
                            report.failures.push(e.to_string());
                        }
                    }
                }
            }
            None => debug!("No active snapshot, keeping all snapshots"),
        }

        let pruned = self.storage.cache().prune_unreferenced();
        report.cache_entries_removed = pruned.removed;
        report.bytes_freed = pruned.bytes_freed;
        report.failures.extend(pruned.failures);

        info!(
            snapshots_removed = report.snapshots_removed.len(),
            cache_entries_removed = report.cache_entries_removed,
            bytes_freed = report.bytes_freed,
            failures = report.failures.len(),
            "Reaper finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use std::fs;
    use tempfile::TempDir;

    fn digest(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    fn snapshot_with(storage: &StorageRoot, data: &[&[u8]]) -> PathBuf {
        let snapshot = storage.create_staging().unwrap();
        for (i, content) in data.iter().enumerate() {
            let d = digest(content);
            storage.cache().insert_bytes(&d, content).unwrap();
            storage
                .cache()
                .link_into(&d, &snapshot.join(format!("ubuntu/amd64/generic/r{}/stable/squashfs", i)))
                .unwrap();
        }
        snapshot
    }

    #[test]
    fn test_reap_keeps_current_and_its_cache() {
        let dir = TempDir::new().unwrap();
        let storage = StorageRoot::open(dir.path()).unwrap();
        let old = snapshot_with(&storage, &[b"shared", b"old-only"]);
        let current = snapshot_with(&storage, &[b"shared", b"new-only"]);
        storage.activate(&current).unwrap();

        let report = Reaper::new(&storage).reap().unwrap();

        assert_eq!(report.snapshots_removed, vec![old.clone()]);
        assert_eq!(report.cache_entries_removed, 1);
        assert!(report.is_clean());
        assert!(!old.exists());
        assert!(current.is_dir());
        assert!(storage.cache().contains(&digest(b"shared")));
        assert!(storage.cache().contains(&digest(b"new-only")));
        assert!(!storage.cache().contains(&digest(b"old-only")));
        for entry in storage.cache().entries().unwrap() {
            assert!(entry.ref_count() >= 1);
        }
    }

    #[test]
    fn test_reap_is_noop_when_settled() {
        let dir = TempDir::new().unwrap();
        let storage = StorageRoot::open(dir.path()).unwrap();
        let current = snapshot_with(&storage, &[b"a"]);
        storage.activate(&current).unwrap();

        let reaper = Reaper::new(&storage);
        reaper.reap().unwrap();
        assert_eq!(reaper.reap().unwrap(), ReapReport::default());
    }

    #[test]
    fn test_reap_without_current_keeps_snapshots() {
        let dir = TempDir::new().unwrap();
        let storage = StorageRoot::open(dir.path()).unwrap();
        let snapshot = snapshot_with(&storage, &[b"linked"]);
        let orphan = digest(b"orphan");
        storage.cache().insert_bytes(&orphan, b"orphan").unwrap();

        let report = Reaper::new(&storage).reap().unwrap();

        assert!(report.snapshots_removed.is_empty());
        assert!(snapshot.is_dir());
        assert!(!storage.cache().contains(&orphan));
        assert!(storage.cache().contains(&digest(b"linked")));
        assert_eq!(fs::read_dir(storage.cache().dir()).unwrap().count(), 1);
    }
}
