//! Turning a populated staging directory into the active snapshot.
//!
//! The committer walks a fixed sequence of stages. Until the current
//! pointer is swapped, any failure discards the staging directory and the
//! cache entries only it referenced, re-registers targets against the
//! untouched active snapshot, and reports the error. After the swap,
//! failures only degrade the run.

use std::fmt;
use std::path::{Path, PathBuf};

use bootres_events::{event_types, ImportEvent};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bootloader::{link_bootloaders, BootLoader};
use crate::notify::Notifier;
use crate::reaper::{ReapReport, Reaper};
use crate::storage::fs::atomic_write;
use crate::storage::{StorageError, StorageRoot, META_FILE};
use crate::targets::{RegistrarOutcome, TargetRegistrar};

/// Progress of a commit, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommitStage {
    Staging,
    MetadataWritten,
    TargetDescriptorWritten,
    BootloaderLinked,
    Activated,
    TargetApplied,
    Reaped,
}

impl fmt::Display for CommitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommitStage::Staging => "staging",
            CommitStage::MetadataWritten => "metadata-written",
            CommitStage::TargetDescriptorWritten => "target-descriptor-written",
            CommitStage::BootloaderLinked => "bootloader-linked",
            CommitStage::Activated => "activated",
            CommitStage::TargetApplied => "target-applied",
            CommitStage::Reaped => "reaped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("{0} is not a staging directory of this storage root")]
    InvalidStaging(PathBuf),

    #[error("Commit failed after reaching {reached}: {source}")]
    Failed {
        reached: CommitStage,
        #[source]
        source: StorageError,
    },
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// The newly active snapshot.
    pub snapshot: PathBuf,
    /// Last stage reached; `Reaped` unless the reaper could not run.
    pub stage: CommitStage,
    pub targets: RegistrarOutcome,
    pub reap: Option<ReapReport>,
    /// Boot loaders that could not be linked.
    pub bootloader_failures: Vec<String>,
}

pub struct SnapshotCommitter<'a> {
    storage: &'a StorageRoot,
    registrar: &'a TargetRegistrar,
    bootloaders: &'a [Box<dyn BootLoader>],
    notifier: &'a Notifier,
}

impl<'a> SnapshotCommitter<'a> {
    pub fn new(
        storage: &'a StorageRoot,
        registrar: &'a TargetRegistrar,
        bootloaders: &'a [Box<dyn BootLoader>],
        notifier: &'a Notifier,
    ) -> Self {
        Self {
            storage,
            registrar,
            bootloaders,
            notifier,
        }
    }

    /// Commit `staging` with `metadata` as its metadata record.
    pub async fn commit(&self, staging: &Path, metadata: &str) -> Result<CommitOutcome, CommitError> {
        if !self.storage.is_snapshot_path(staging) || !staging.is_dir() {
            self.registrar
                .apply(self.active().as_deref(), self.notifier)
                .await;
            return Err(CommitError::InvalidStaging(staging.to_path_buf()));
        }

        let mut reached = CommitStage::Staging;
        let mut bootloader_failures = Vec::new();
        let result = self
            .prepare_and_activate(staging, metadata, &mut reached, &mut bootloader_failures);

        if let Err(source) = result {
            warn!(
                staging = %staging.display(),
                stage = %reached,
                error = %source,
                "Commit failed, rolling back"
            );
            self.rollback(staging).await;
            return Err(CommitError::Failed { reached, source });
        }

        let targets = self.registrar.apply(Some(staging), self.notifier).await;
        reached = CommitStage::TargetApplied;
        debug!(snapshot = %staging.display(), stage = %reached, "Commit stage reached");

        let reap = match Reaper::new(self.storage).reap() {
            Ok(report) => {
                if !report.is_clean() {
                    self.notifier.publish(
                        ImportEvent::warning(
                            event_types::REAPER_FAILED,
                            format!("Reaper could not remove {} item(s)", report.failures.len()),
                        )
                        .with_snapshot(staging.display().to_string()),
                    );
                }
                reached = CommitStage::Reaped;
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "Reaper failed");
                self.notifier.publish(
                    ImportEvent::warning(event_types::REAPER_FAILED, format!("Reaper failed: {}", e))
                        .with_snapshot(staging.display().to_string()),
                );
                None
            }
        };

        info!(snapshot = %staging.display(), stage = %reached, "Snapshot committed");
        Ok(CommitOutcome {
            snapshot: staging.to_path_buf(),
            stage: reached,
            targets,
            reap,
            bootloader_failures,
        })
    }

    fn prepare_and_activate(
        &self,
        staging: &Path,
        metadata: &str,
        reached: &mut CommitStage,
        bootloader_failures: &mut Vec<String>,
    ) -> Result<(), StorageError> {
        let meta = staging.join(META_FILE);
        atomic_write(&meta, metadata.as_bytes(), 0o644).map_err(|e| StorageError::io(&meta, e))?;
        self.advance(reached, CommitStage::MetadataWritten, staging);

        self.registrar.write_descriptor(staging)?;
        self.advance(reached, CommitStage::TargetDescriptorWritten, staging);

        *bootloader_failures = link_bootloaders(self.bootloaders, staging, self.notifier);
        self.advance(reached, CommitStage::BootloaderLinked, staging);

        self.storage.activate(staging)?;
        self.advance(reached, CommitStage::Activated, staging);
        Ok(())
    }

    fn advance(&self, reached: &mut CommitStage, next: CommitStage, staging: &Path) {
        *reached = next;
        debug!(snapshot = %staging.display(), stage = %next, "Commit stage reached");
    }

    fn active(&self) -> Option<PathBuf> {
        match self.storage.current_snapshot() {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "Could not resolve active snapshot");
                None
            }
        }
    }

    /// Discard `staging` and its cache residue, then re-register the active snapshot.
    async fn rollback(&self, staging: &Path) {
        match self.storage.remove_snapshot(staging) {
            Ok(()) => info!(staging = %staging.display(), "Discarded staging directory"),
            Err(StorageError::ActiveSnapshot(_)) => {
                warn!(staging = %staging.display(), "Staging directory became active, keeping it")
            }
            Err(e) => warn!(staging = %staging.display(), error = %e, "Failed to discard staging directory"),
        }
        self.storage.cache().prune_unreferenced();
        self.registrar
            .apply(self.active().as_deref(), self.notifier)
            .await;
    }
}
