//! The import run: fetch, detect, download, commit.
//!
//! Every run registers targets exactly once: against the new snapshot on
//! success, or against the untouched active snapshot on the short circuits
//! and after a rollback.

use std::path::PathBuf;
use std::sync::Arc;

use bootres_events::{event_types, ImportEvent};
use tracing::{error, info, warn};

use crate::bootloader::BootLoader;
use crate::catalog::CatalogFetcher;
use crate::change::{ChangeDetector, ChangeStatus};
use crate::commit::{CommitOutcome, SnapshotCommitter};
use crate::config::BootSource;
use crate::download::ResourceDownloader;
use crate::error::ImportError;
use crate::mapping::ProductMapper;
use crate::notify::{EventSink, Notifier};
use crate::retry::{with_retries, RetryPolicy};
use crate::storage::StorageRoot;
use crate::targets::{TargetDaemon, TargetRegistrar};

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// No sources are configured.
    NoSources,
    /// The sources offer no images.
    NothingAvailable,
    /// The active snapshot already holds the catalog's content.
    Unchanged { snapshot: PathBuf },
    /// A new snapshot was committed.
    Imported(CommitOutcome),
}

impl ImportOutcome {
    pub fn summary(&self) -> String {
        match self {
            ImportOutcome::NoSources => "no boot sources configured".to_string(),
            ImportOutcome::NothingAvailable => "no boot images available".to_string(),
            ImportOutcome::Unchanged { snapshot } => {
                format!("boot images unchanged ({})", snapshot.display())
            }
            ImportOutcome::Imported(outcome) => {
                let removed = outcome
                    .reap
                    .as_ref()
                    .map(|r| r.snapshots_removed.len())
                    .unwrap_or(0);
                format!(
                    "imported {} ({} old snapshot(s) removed)",
                    outcome.snapshot.display(),
                    removed
                )
            }
        }
    }
}

/// Orchestrates one import with injected collaborators.
pub struct ImportPipeline {
    fetcher: Arc<dyn CatalogFetcher>,
    mapper: Arc<dyn ProductMapper>,
    downloader: Arc<dyn ResourceDownloader>,
    registrar: TargetRegistrar,
    bootloaders: Vec<Box<dyn BootLoader>>,
    sinks: Vec<Arc<dyn EventSink>>,
    retry: RetryPolicy,
}

impl ImportPipeline {
    pub fn new(
        fetcher: Arc<dyn CatalogFetcher>,
        mapper: Arc<dyn ProductMapper>,
        downloader: Arc<dyn ResourceDownloader>,
        daemon: Arc<dyn TargetDaemon>,
    ) -> Self {
        Self {
            fetcher,
            mapper,
            downloader,
            registrar: TargetRegistrar::new(daemon),
            bootloaders: Vec::new(),
            sinks: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_bootloaders(mut self, bootloaders: Vec<Box<dyn BootLoader>>) -> Self {
        self.bootloaders = bootloaders;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Retry policy for the catalog fetch.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one import against `storage`.
    ///
    /// The caller must hold the storage root's import lock.
    pub async fn run(
        &self,
        storage: &StorageRoot,
        sources: &[BootSource],
    ) -> Result<ImportOutcome, ImportError> {
        let notifier = Notifier::new(self.sinks.clone());
        notifier.publish(ImportEvent::info(
            event_types::IMPORT_STARTED,
            format!("Importing boot images from {} source(s)", sources.len()),
        ));

        match self.run_inner(storage, sources, &notifier).await {
            Ok(outcome) => {
                let mut event = ImportEvent::info(event_types::IMPORT_FINISHED, outcome.summary());
                if let ImportOutcome::Imported(commit) = &outcome {
                    event = event.with_snapshot(commit.snapshot.display().to_string());
                }
                notifier.publish(event);
                Ok(outcome)
            }
            Err(e) => {
                notifier.publish(
                    ImportEvent::error(
                        event_types::IMPORT_FAILED,
                        format!("Boot image import failed: {}", e),
                    )
                    .with_error_kind(e.kind()),
                );
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        storage: &StorageRoot,
        sources: &[BootSource],
        notifier: &Notifier,
    ) -> Result<ImportOutcome, ImportError> {
        let leftovers = storage.cleanup_unactivated()?;
        if !leftovers.is_empty() {
            info!(count = leftovers.len(), "Removed staging left by an interrupted import");
        }
        storage.cache().prune_unreferenced();

        if sources.is_empty() {
            notifier.publish(ImportEvent::warning(
                event_types::IMPORT_NO_SOURCES,
                "Can't import: no boot sources configured",
            ));
            self.apply_active(storage, notifier).await;
            return Ok(ImportOutcome::NoSources);
        }

        let fetcher = &self.fetcher;
        let images = with_retries(&self.retry, "catalog fetch", move || fetcher.fetch(sources)).await?;
        if images.is_empty() {
            notifier.publish(ImportEvent::warning(
                event_types::IMPORT_NOTHING_AVAILABLE,
                "No boot images available in the configured sources",
            ));
            self.apply_active(storage, notifier).await;
            return Ok(ImportOutcome::NothingAvailable);
        }

        let metadata = images.dump_json()?;
        if let ChangeStatus::Unchanged { snapshot } = ChangeDetector::new(storage).check(&metadata) {
            notifier.publish(
                ImportEvent::info(event_types::IMPORT_UNCHANGED, "Boot images are up to date")
                    .with_snapshot(snapshot.display().to_string()),
            );
            self.apply_active(storage, notifier).await;
            return Ok(ImportOutcome::Unchanged { snapshot });
        }

        let mapping = self.mapper.map(&images)?;
        info!(
            images = images.len(),
            files = mapping.files().count(),
            bytes = mapping.total_bytes(),
            "Downloading boot images"
        );

        let known = storage.snapshot_names()?;
        let staging = match self.downloader.download(sources, storage, &mapping).await {
            Ok(staging) => staging,
            Err(e) => {
                error!(error = %e, "Download failed, discarding staged content");
                if let Err(cleanup) = storage.discard_new_snapshots(&known) {
                    warn!(error = %cleanup, "Failed to list snapshots for cleanup");
                }
                storage.cache().prune_unreferenced();
                self.apply_active(storage, notifier).await;
                return Err(e.into());
            }
        };

        let committer = SnapshotCommitter::new(storage, &self.registrar, &self.bootloaders, notifier);
        let outcome = committer.commit(&staging, &metadata).await?;
        Ok(ImportOutcome::Imported(outcome))
    }

    async fn apply_active(&self, storage: &StorageRoot, notifier: &Notifier) {
        let active = match storage.current_snapshot() {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "Could not resolve active snapshot");
                None
            }
        };
        self.registrar.apply(active.as_deref(), notifier).await;
    }
}
