use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bootres_importer::bootloader::BootLoader;
use bootres_importer::catalog::{CatalogError, CatalogFetcher, ImageDescriptionSet};
use bootres_importer::config::BootSource;
use bootres_importer::download::{DownloadError, ResourceDownloader};
use bootres_importer::mapping::ProductMapping;
use bootres_importer::storage::StorageRoot;
use bootres_importer::targets::{TargetDaemon, TargetDaemonError};
use bytes::Bytes;

use crate::fixtures::CatalogFixture;

/// Serves a fixed image set.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    images: Mutex<ImageDescriptionSet>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl StaticCatalog {
    pub fn new(images: ImageDescriptionSet) -> Self {
        Self {
            images: Mutex::new(images),
            ..Default::default()
        }
    }

    /// Replace the served set.
    pub fn serve(&self, images: ImageDescriptionSet) {
        *self.images.lock().unwrap() = images;
    }

    /// Fail the next `n` fetches with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogFetcher for StaticCatalog {
    async fn fetch(&self, _sources: &[BootSource]) -> Result<ImageDescriptionSet, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CatalogError::Status {
                url: "http://images.test/catalog.json".to_string(),
                status: 503,
            });
        }
        Ok(self.images.lock().unwrap().clone())
    }
}

/// Stages fixture bytes through the real cache.
#[derive(Debug, Default)]
pub struct FixtureDownloader {
    blobs: Mutex<HashMap<String, Bytes>>,
    fail_after: Mutex<Option<usize>>,
    calls: AtomicUsize,
}

impl FixtureDownloader {
    pub fn new(fixture: &CatalogFixture) -> Self {
        Self {
            blobs: Mutex::new(fixture.blobs()),
            ..Default::default()
        }
    }

    /// Make the bytes of `fixture` available.
    pub fn add(&self, fixture: &CatalogFixture) {
        self.blobs.lock().unwrap().extend(fixture.blobs());
    }

    /// Fail every download after staging `files` files.
    pub fn fail_after(&self, files: usize) {
        *self.fail_after.lock().unwrap() = Some(files);
    }

    pub fn succeed(&self) {
        *self.fail_after.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceDownloader for FixtureDownloader {
    async fn download(
        &self,
        _sources: &[BootSource],
        storage: &StorageRoot,
        mapping: &ProductMapping,
    ) -> Result<PathBuf, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail_after = *self.fail_after.lock().unwrap();
        let staging = storage.create_staging()?;

        for (staged, file) in mapping.files().enumerate() {
            if fail_after == Some(staged) {
                return Err(DownloadError::Failed(format!(
                    "injected failure after {} file(s)",
                    staged
                )));
            }
            let data = self
                .blobs
                .lock()
                .unwrap()
                .get(&file.sha256)
                .cloned()
                .ok_or_else(|| DownloadError::Failed(format!("no fixture for {}", file.url)))?;
            storage.cache().insert_bytes(&file.sha256, &data)?;
            storage
                .cache()
                .link_into(&file.sha256, &staging.join(&file.relative_path))?;
        }

        if fail_after.is_some_and(|n| n >= mapping.files().count()) {
            return Err(DownloadError::Failed("injected failure after staging".into()));
        }
        Ok(staging)
    }
}

/// Records every descriptor the daemon is asked to load.
#[derive(Debug, Default)]
pub struct RecordingDaemon {
    updates: Mutex<Vec<PathBuf>>,
    unavailable: AtomicBool,
}

impl RecordingDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the daemon never become ready.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn updates(&self) -> Vec<PathBuf> {
        self.updates.lock().unwrap().clone()
    }

    pub fn last_update(&self) -> Option<PathBuf> {
        self.updates.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TargetDaemon for RecordingDaemon {
    async fn ensure_ready(&self) -> Result<(), TargetDaemonError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TargetDaemonError::NotReady {
                service: "tgt".to_string(),
                waited: std::time::Duration::ZERO,
            });
        }
        Ok(())
    }

    async fn update(&self, descriptor: &Path) -> Result<(), TargetDaemonError> {
        self.updates.lock().unwrap().push(descriptor.to_path_buf());
        Ok(())
    }
}

/// A boot loader whose linking always fails.
#[derive(Debug, Clone)]
pub struct FailingBootLoader {
    pub name: String,
}

impl FailingBootLoader {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl BootLoader for FailingBootLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn link_into(&self, _dest: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("boot loader {} has no files", self.name),
        ))
    }
}
