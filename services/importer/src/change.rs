//! Detects whether the active snapshot already holds a candidate catalog.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::storage::{fs::touch, StorageError, StorageRoot, META_FILE};

/// Result of comparing a candidate metadata record with the active snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStatus {
    /// No active snapshot, or it carries no metadata record.
    ColdStart,
    /// The active snapshot holds different content.
    Changed,
    /// The active snapshot already holds exactly this content.
    Unchanged { snapshot: PathBuf },
}

/// Byte-for-byte comparison against the active snapshot's `maas.meta`.
#[derive(Debug)]
pub struct ChangeDetector<'a> {
    storage: &'a StorageRoot,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(storage: &'a StorageRoot) -> Self {
        Self { storage }
    }

    /// Compare `candidate` with the active record without modifying anything.
    pub fn matches_current(&self, candidate: &str) -> Result<ChangeStatus, StorageError> {
        let Some(snapshot) = self.storage.current_snapshot()? else {
            return Ok(ChangeStatus::ColdStart);
        };

        let meta = snapshot.join(META_FILE);
        let stored = match fs::read(&meta) {
            Ok(stored) => stored,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ChangeStatus::ColdStart),
            Err(e) => return Err(StorageError::io(meta, e)),
        };

        if stored == candidate.as_bytes() {
            Ok(ChangeStatus::Unchanged { snapshot })
        } else {
            Ok(ChangeStatus::Changed)
        }
    }

    /// Record that the active record was checked by bumping its mtime.
    pub fn mark_checked(&self) -> Result<(), StorageError> {
        let Some(snapshot) = self.storage.current_snapshot()? else {
            return Ok(());
        };
        let meta = snapshot.join(META_FILE);
        match touch(&meta) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(meta, e)),
        }
    }

    /// Compare and mark checked.
    ///
    /// Any error reading the active snapshot is treated as a change: a
    /// needless import is acceptable, skipping a needed one is not.
    pub fn check(&self, candidate: &str) -> ChangeStatus {
        let status = match self.matches_current(candidate) {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Could not read active metadata record, assuming changed");
                ChangeStatus::Changed
            }
        };

        if status != ChangeStatus::ColdStart {
            if let Err(e) = self.mark_checked() {
                warn!(error = %e, "Failed to touch active metadata record");
            }
        }

        match &status {
            ChangeStatus::Unchanged { snapshot } => {
                info!(snapshot = %snapshot.display(), "Boot images unchanged")
            }
            other => debug!(status = ?other, "Boot images need import"),
        }
        status
    }
}
