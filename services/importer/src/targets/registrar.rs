//! Reconciling the target daemon with a snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bootres_events::{event_types, ImportEvent};
use tracing::{debug, info, warn};

use super::descriptor;
use super::TargetDaemon;
use crate::notify::Notifier;
use crate::storage::{StorageError, TARGETS_FILE};

/// What happened when the registrar ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrarOutcome {
    /// The daemon was updated from the snapshot's descriptor.
    Applied { descriptor: PathBuf },
    /// No snapshot or no descriptor; nothing to reconcile.
    Skipped,
    /// The daemon could not be updated. Never fatal.
    Failed(String),
}

/// Writes target descriptors and applies them to the daemon.
#[derive(Clone)]
pub struct TargetRegistrar {
    daemon: Arc<dyn TargetDaemon>,
}

impl TargetRegistrar {
    pub fn new(daemon: Arc<dyn TargetDaemon>) -> Self {
        Self { daemon }
    }

    /// Compose and crash-safely write `<snapshot>/maas.tgt`.
    pub fn write_descriptor(&self, snapshot: &Path) -> Result<PathBuf, StorageError> {
        descriptor::write_descriptor(snapshot)
    }

    /// Point the daemon at `snapshot`'s descriptor.
    ///
    /// Failures are logged and published as warnings, never returned.
    pub async fn apply(&self, snapshot: Option<&Path>, notifier: &Notifier) -> RegistrarOutcome {
        let Some(snapshot) = snapshot else {
            debug!("No active snapshot, skipping target registration");
            return RegistrarOutcome::Skipped;
        };
        let descriptor = snapshot.join(TARGETS_FILE);
        if !descriptor.is_file() {
            debug!(descriptor = %descriptor.display(), "No target descriptor, skipping target registration");
            return RegistrarOutcome::Skipped;
        }

        let result = async {
            self.daemon.ensure_ready().await?;
            self.daemon.update(&descriptor).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(snapshot = %snapshot.display(), "Boot targets registered");
                RegistrarOutcome::Applied { descriptor }
            }
            Err(e) => {
                warn!(snapshot = %snapshot.display(), error = %e, "Failed to update boot targets");
                notifier.publish(
                    ImportEvent::warning(
                        event_types::TARGETS_UPDATE_FAILED,
                        format!("Failed to update boot targets: {}", e),
                    )
                    .with_snapshot(snapshot.display().to_string()),
                );
                RegistrarOutcome::Failed(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for TargetRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistrar").finish_non_exhaustive()
    }
}
