//! HTTP downloader backed by the shared content cache.
//!
//! Each distinct digest is fetched at most once: files already in the
//! cache are reused, the rest are streamed to a partial file, verified
//! against their SHA-256 and size, then renamed into the cache. The staging
//! tree is populated with hard links to cache entries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{DownloadError, ResourceDownloader};
use crate::config::BootSource;
use crate::mapping::{ProductMapping, TargetFile};
use crate::retry::{with_retries, RetryPolicy};
use crate::storage::{ContentCache, StorageError, StorageRoot};

#[derive(Debug, Clone)]
pub struct HttpDownloaderConfig {
    /// Timeout for a single file download.
    pub request_timeout: Duration,
    /// Files fetched concurrently.
    pub max_concurrent: usize,
    /// Retries for each file on transient failures.
    pub retry: RetryPolicy,
}

impl Default for HttpDownloaderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(600),
            max_concurrent: 4,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct HttpDownloader {
    client: Client,
    config: HttpDownloaderConfig,
}

impl HttpDownloader {
    pub fn new(config: HttpDownloaderConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| DownloadError::Http {
                url: String::new(),
                source,
            })?;
        Ok(Self { client, config })
    }

    async fn fetch_with_retries(
        &self,
        cache: &ContentCache,
        file: &TargetFile,
    ) -> Result<u64, DownloadError> {
        with_retries(&self.config.retry, &file.url, move || {
            self.fetch_into_cache(cache, file)
        })
        .await
    }

    /// Ensure the cache holds `file`'s content. Returns bytes transferred.
    async fn fetch_into_cache(
        &self,
        cache: &ContentCache,
        file: &TargetFile,
    ) -> Result<u64, DownloadError> {
        if cache.contains(&file.sha256) {
            debug!(digest = %file.sha256, "Cache hit");
            return Ok(0);
        }

        let partial = cache.partial_path(&file.sha256)?;
        let result = self.stream_to(&partial, file).await;
        match result {
            Ok(size) => {
                cache.insert_file(&file.sha256, &partial)?;
                debug!(url = %file.url, digest = %file.sha256, size, "Downloaded into cache");
                Ok(size)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }

    async fn stream_to(&self, partial: &Path, file: &TargetFile) -> Result<u64, DownloadError> {
        let response = self
            .client
            .get(&file.url)
            .send()
            .await
            .map_err(|source| DownloadError::Http {
                url: file.url.clone(),
                source,
            })?;

        if response.status() != StatusCode::OK {
            return Err(DownloadError::Status {
                url: file.url.clone(),
                status: response.status().as_u16(),
            });
        }

        if let Some(parent) = partial.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        let mut out = tokio::fs::File::create(partial)
            .await
            .map_err(|e| StorageError::io(partial, e))?;

        let mut hasher = Sha256::new();
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| DownloadError::Http {
                url: file.url.clone(),
                source,
            })?;
            hasher.update(&chunk);
            out.write_all(&chunk)
                .await
                .map_err(|e| StorageError::io(partial, e))?;
            written += chunk.len() as u64;
        }
        out.sync_all()
            .await
            .map_err(|e| StorageError::io(partial, e))?;
        drop(out);

        if written != file.size {
            return Err(DownloadError::SizeMismatch {
                url: file.url.clone(),
                expected: file.size,
                actual: written,
            });
        }

        let actual = hex::encode(hasher.finalize());
        if actual != file.sha256 {
            return Err(DownloadError::DigestMismatch {
                url: file.url.clone(),
                expected: file.sha256.clone(),
                actual,
            });
        }

        Ok(written)
    }
}

#[async_trait]
impl ResourceDownloader for HttpDownloader {
    async fn download(
        &self,
        _sources: &[BootSource],
        storage: &StorageRoot,
        mapping: &ProductMapping,
    ) -> Result<PathBuf, DownloadError> {
        let staging = storage.create_staging()?;
        let cache = storage.cache();

        let unique: Vec<TargetFile> = mapping
            .files()
            .map(|f| (f.sha256.as_str(), f))
            .collect::<BTreeMap<&str, &TargetFile>>()
            .into_values()
            .cloned()
            .collect();

        let transferred: Vec<u64> = stream::iter(unique)
            .map(move |file| async move { self.fetch_with_retries(cache, &file).await })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .try_collect()
            .await?;

        for file in mapping.files() {
            cache.link_into(&file.sha256, &staging.join(&file.relative_path))?;
        }

        info!(
            staging = %staging.display(),
            images = mapping.targets.len(),
            files = mapping.files().count(),
            bytes_downloaded = transferred.iter().sum::<u64>(),
            "Staging snapshot populated"
        );
        Ok(staging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FileKind, ImageKey};
    use crate::mapping::ProductTarget;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sha(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    fn target(server: &MockServer, release: &str, data: &[u8]) -> ProductTarget {
        let key = ImageKey::new("ubuntu", "amd64", "generic", release, "stable");
        ProductTarget {
            files: vec![TargetFile {
                kind: FileKind::Squashfs,
                url: format!("{}/{}/squashfs", server.uri(), release),
                sha256: sha(data),
                size: data.len() as u64,
                relative_path: key.relative_dir().join("squashfs"),
            }],
            key,
        }
    }

    fn downloader() -> HttpDownloader {
        HttpDownloader::new(HttpDownloaderConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
            },
            ..HttpDownloaderConfig::default()
        })
        .unwrap()
    }

    fn storage_with(server: &MockServer, data: &[u8]) -> (TempDir, StorageRoot, ProductMapping) {
        let dir = TempDir::new().unwrap();
        let storage = StorageRoot::open(dir.path()).unwrap();
        let mapping = ProductMapping {
            targets: vec![target(server, "jammy", data)],
        };
        (dir, storage, mapping)
    }

    #[tokio::test]
    async fn test_download_populates_staging_and_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jammy/squashfs"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jammy-root".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let storage = StorageRoot::open(dir.path()).unwrap();
        let mapping = ProductMapping {
            targets: vec![target(&server, "jammy", b"jammy-root")],
        };

        let staging = downloader().download(&[], &storage, &mapping).await.unwrap();
        let file = staging.join("ubuntu/amd64/generic/jammy/stable/squashfs");
        assert_eq!(std::fs::read(&file).unwrap(), b"jammy-root");
        assert!(storage.cache().contains(&sha(b"jammy-root")));

        // Second import reuses the cache; the mock expects a single request.
        let again = downloader().download(&[], &storage, &mapping).await.unwrap();
        assert_ne!(again, staging);
        assert!(again.join("ubuntu/amd64/generic/jammy/stable/squashfs").is_file());
        assert_eq!(storage.cache().entries().unwrap()[0].ref_count(), 2);
    }

    #[tokio::test]
    async fn test_digest_mismatch_leaves_no_cache_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered!!".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let storage = StorageRoot::open(dir.path()).unwrap();
        let mapping = ProductMapping {
            targets: vec![target(&server, "jammy", b"jammy-root")],
        };

        let err = downloader()
            .download(&[], &storage, &mapping)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::DigestMismatch { .. }));
        assert!(storage.cache().entries().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(storage.cache().dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_not_found_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let storage = StorageRoot::open(dir.path()).unwrap();
        let mapping = ProductMapping {
            targets: vec![target(&server, "jammy", b"jammy-root")],
        };

        let err = downloader()
            .download(&[], &storage, &mapping)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_unavailable_file_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jammy/squashfs"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jammy/squashfs"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jammy-root".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let (_dir, storage, mapping) = storage_with(&server, b"jammy-root");
        let staging = downloader().download(&[], &storage, &mapping).await.unwrap();

        assert_eq!(
            std::fs::read(staging.join("ubuntu/amd64/generic/jammy/stable/squashfs")).unwrap(),
            b"jammy-root"
        );
    }

    #[tokio::test]
    async fn test_persistent_unavailability_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let (_dir, storage, mapping) = storage_with(&server, b"jammy-root");
        let err = downloader()
            .download(&[], &storage, &mapping)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_digest_mismatch_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered!!".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let (_dir, storage, mapping) = storage_with(&server, b"jammy-root");
        assert!(downloader().download(&[], &storage, &mapping).await.is_err());
    }
}
