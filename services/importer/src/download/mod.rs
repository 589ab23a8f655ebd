//! Downloading image content into a staging snapshot.

mod http;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::BootSource;
use crate::mapping::ProductMapping;
use crate::retry::Transient;
use crate::storage::{StorageError, StorageRoot};

pub use http::{HttpDownloader, HttpDownloaderConfig};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error downloading {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Download of {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Digest mismatch for {url}: expected {expected}, got {actual}")]
    DigestMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("Size mismatch for {url}: expected {expected} bytes, got {actual}")]
    SizeMismatch { url: String, expected: u64, actual: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Download failed: {0}")]
    Failed(String),
}

impl Transient for DownloadError {
    fn is_transient(&self) -> bool {
        match self {
            DownloadError::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request() || source.is_body()
            }
            DownloadError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Materializes a download plan as a new staging snapshot.
#[async_trait]
pub trait ResourceDownloader: Send + Sync {
    /// Create a staging directory under `storage` holding every file of
    /// `mapping`, and return its path.
    async fn download(
        &self,
        sources: &[BootSource],
        storage: &StorageRoot,
        mapping: &ProductMapping,
    ) -> Result<PathBuf, DownloadError>;
}
