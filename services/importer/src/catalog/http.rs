//! Catalog fetcher for JSON catalog documents served over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{
    CatalogError, CatalogFetcher, FileKind, ImageDescription, ImageDescriptionSet, ImageFile,
    ImageKey,
};
use crate::config::BootSource;
use crate::storage::is_valid_digest;

const DEFAULT_SUBARCH: &str = "generic";

/// HTTP fetcher configuration.
#[derive(Debug, Clone)]
pub struct HttpCatalogConfig {
    /// Timeout for fetching one catalog document.
    pub timeout: Duration,
}

impl Default for HttpCatalogConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    products: Vec<CatalogProduct>,
}

#[derive(Debug, Deserialize)]
struct CatalogProduct {
    osystem: String,
    arch: String,
    #[serde(default)]
    subarches: Vec<String>,
    release: String,
    label: String,
    #[serde(default)]
    files: Vec<CatalogFile>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    kind: String,
    path: String,
    sha256: String,
    size: u64,
}

/// Fetches catalogs from each source URL and merges them.
pub struct HttpCatalogFetcher {
    client: Client,
}

impl HttpCatalogFetcher {
    pub fn new(config: HttpCatalogConfig) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| CatalogError::Http {
                url: String::new(),
                source,
            })?;
        Ok(Self { client })
    }

    async fn fetch_document(&self, url: &Url) -> Result<CatalogDocument, CatalogError> {
        debug!(url = %url, "Fetching catalog");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| CatalogError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| CatalogError::Http {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| CatalogError::Parse {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl CatalogFetcher for HttpCatalogFetcher {
    async fn fetch(&self, sources: &[BootSource]) -> Result<ImageDescriptionSet, CatalogError> {
        let mut set = ImageDescriptionSet::new();

        for source in sources {
            let url = Url::parse(&source.url).map_err(|e| CatalogError::InvalidUrl {
                url: source.url.clone(),
                reason: e.to_string(),
            })?;
            if source.keyring.is_some() || source.keyring_data.is_some() {
                debug!(url = %url, "Keyring configured; signature verification is not performed by this fetcher");
            }

            let document = self.fetch_document(&url).await?;
            let added = merge_document(&mut set, source, &url, document)?;
            info!(url = %url, images = added, "Catalog fetched");
        }

        Ok(set)
    }
}

/// Add the selected images of one document, keeping earlier entries.
fn merge_document(
    set: &mut ImageDescriptionSet,
    source: &BootSource,
    url: &Url,
    document: CatalogDocument,
) -> Result<usize, CatalogError> {
    let mut added = 0;

    for product in document.products {
        let files = product_files(url, &product.files)?;
        let subarches = if product.subarches.is_empty() {
            vec![DEFAULT_SUBARCH.to_string()]
        } else {
            product.subarches.clone()
        };

        for subarch in subarches {
            let key = ImageKey::new(
                &product.osystem,
                &product.arch,
                subarch,
                &product.release,
                &product.label,
            );
            key.validate().map_err(|reason| CatalogError::InvalidImage {
                url: url.to_string(),
                reason,
            })?;
            if !source.selects(&key) {
                continue;
            }
            if set.insert(key.clone(), ImageDescription::new(url.as_str(), files.clone())) {
                added += 1;
            } else {
                debug!(image = %key, url = %url, "Image already provided by an earlier source");
            }
        }
    }

    Ok(added)
}

fn product_files(url: &Url, files: &[CatalogFile]) -> Result<Vec<ImageFile>, CatalogError> {
    let mut out = Vec::with_capacity(files.len());
    for file in files {
        let kind = match file.kind.parse::<FileKind>() {
            Ok(kind) => kind,
            Err(_) => {
                warn!(url = %url, kind = %file.kind, "Skipping file of unknown kind");
                continue;
            }
        };
        let sha256 = file.sha256.to_ascii_lowercase();
        if !is_valid_digest(&sha256) {
            return Err(CatalogError::InvalidImage {
                url: url.to_string(),
                reason: format!("file {} has invalid sha256 {:?}", file.path, file.sha256),
            });
        }
        out.push(ImageFile {
            kind,
            path: file.path.clone(),
            sha256,
            size: file.size,
        });
    }
    Ok(out)
}
