//! Upstream image catalogs.
//!
//! A catalog fetcher turns the configured sources into an
//! [`ImageDescriptionSet`]: every image the sources offer (after selection
//! filtering), keyed by (osystem, arch, subarch, release, label). The set's
//! canonical JSON form is the snapshot's metadata record, so it must be
//! deterministic for identical upstream content.

mod http;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BootSource;
use crate::retry::Transient;

pub use http::{HttpCatalogConfig, HttpCatalogFetcher};

/// Errors from catalog retrieval.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Catalog {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Malformed catalog {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid image in catalog {url}: {reason}")]
    InvalidImage { url: String, reason: String },

    #[error("Failed to encode metadata record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Transient for CatalogError {
    fn is_transient(&self) -> bool {
        match self {
            CatalogError::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            CatalogError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Retrieves the images a set of sources offers.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch(&self, sources: &[BootSource]) -> Result<ImageDescriptionSet, CatalogError>;
}

/// Identifying tuple of a boot image.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageKey {
    pub osystem: String,
    pub arch: String,
    pub subarch: String,
    pub release: String,
    pub label: String,
}

impl ImageKey {
    pub fn new(
        osystem: impl Into<String>,
        arch: impl Into<String>,
        subarch: impl Into<String>,
        release: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            osystem: osystem.into(),
            arch: arch.into(),
            subarch: subarch.into(),
            release: release.into(),
            label: label.into(),
        }
    }

    fn components(&self) -> [(&'static str, &str); 5] {
        [
            ("osystem", &self.osystem),
            ("arch", &self.arch),
            ("subarch", &self.subarch),
            ("release", &self.release),
            ("label", &self.label),
        ]
    }

    /// Every component must be usable as a single path segment.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in self.components() {
            if !is_safe_component(value) {
                return Err(format!("{} {:?} is not a valid path component", field, value));
            }
        }
        Ok(())
    }

    /// Directory of this image relative to a snapshot root.
    pub fn relative_dir(&self) -> PathBuf {
        self.components().iter().map(|(_, v)| *v).collect()
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.osystem, self.arch, self.subarch, self.release, self.label
        )
    }
}

/// A single path segment that cannot escape or hide inside a snapshot.
pub(crate) fn is_safe_component(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | ':' | '~'))
}

/// Kind of file an image is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    RootImage,
    Squashfs,
    RootTgz,
    BootKernel,
    BootInitrd,
    BootDtb,
}

impl FileKind {
    pub const ALL: [FileKind; 6] = [
        FileKind::RootImage,
        FileKind::Squashfs,
        FileKind::RootTgz,
        FileKind::BootKernel,
        FileKind::BootInitrd,
        FileKind::BootDtb,
    ];

    /// File name inside the image directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            FileKind::RootImage => "root-image",
            FileKind::Squashfs => "squashfs",
            FileKind::RootTgz => "root-tgz",
            FileKind::BootKernel => "boot-kernel",
            FileKind::BootInitrd => "boot-initrd",
            FileKind::BootDtb => "boot-dtb",
        }
    }

    /// Kinds that can back a network block target, in preference order.
    pub fn backing_stores() -> [FileKind; 2] {
        [FileKind::RootImage, FileKind::Squashfs]
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileKind::ALL
            .into_iter()
            .find(|k| k.file_name() == s)
            .ok_or_else(|| format!("unknown file kind {:?}", s))
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// One downloadable file of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFile {
    pub kind: FileKind,
    /// Location relative to the catalog document.
    pub path: String,
    /// Lowercase SHA-256 hex digest.
    pub sha256: String,
    pub size: u64,
}

/// Everything known about one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescription {
    /// Files sorted by kind.
    pub files: Vec<ImageFile>,
    /// Catalog document URL the file paths are relative to.
    pub base_url: String,
}

impl ImageDescription {
    pub fn new(base_url: impl Into<String>, mut files: Vec<ImageFile>) -> Self {
        files.sort_by_key(|f| f.kind);
        files.dedup_by_key(|f| f.kind);
        Self {
            files,
            base_url: base_url.into(),
        }
    }
}

/// All images offered by the configured sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDescriptionSet {
    images: BTreeMap<ImageKey, ImageDescription>,
}

#[derive(Serialize)]
struct RecordImage<'a> {
    #[serde(flatten)]
    key: &'a ImageKey,
    files: &'a [ImageFile],
}

#[derive(Serialize)]
struct Record<'a> {
    images: Vec<RecordImage<'a>>,
}

impl ImageDescriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Add an image unless one with the same key is already present.
    ///
    /// Returns false when an earlier source already provided the image.
    pub fn insert(&mut self, key: ImageKey, description: ImageDescription) -> bool {
        match self.images.entry(key) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(description);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, key: &ImageKey) -> Option<&ImageDescription> {
        self.images.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ImageKey, &ImageDescription)> {
        self.images.iter()
    }

    /// Canonical metadata record: sorted, compact, ASCII-only JSON.
    pub fn dump_json(&self) -> Result<String, CatalogError> {
        let record = Record {
            images: self
                .images
                .iter()
                .map(|(key, desc)| RecordImage {
                    key,
                    files: &desc.files,
                })
                .collect(),
        };
        let json = serde_json::to_string(&record)?;
        Ok(escape_non_ascii(&json))
    }
}

/// Replace every non-ASCII character with its `\uXXXX` escape.
///
/// Non-ASCII characters can only occur inside JSON strings, where the
/// escape is equivalent.
fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}
