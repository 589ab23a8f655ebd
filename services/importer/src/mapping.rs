//! Mapping of catalog images to the files a snapshot must contain.

use std::path::PathBuf;

use reqwest::Url;
use thiserror::Error;

use crate::catalog::{FileKind, ImageDescriptionSet, ImageKey};

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Cannot resolve {path} against {base}: {reason}")]
    Unresolvable {
        base: String,
        path: String,
        reason: String,
    },
}

/// One file to place in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFile {
    pub kind: FileKind,
    /// Absolute download URL.
    pub url: String,
    pub sha256: String,
    pub size: u64,
    /// Destination relative to the snapshot root.
    pub relative_path: PathBuf,
}

/// Everything the downloader needs for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductTarget {
    pub key: ImageKey,
    pub files: Vec<TargetFile>,
}

/// The full download plan for one import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductMapping {
    pub targets: Vec<ProductTarget>,
}

impl ProductMapping {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Files across all targets.
    pub fn files(&self) -> impl Iterator<Item = &TargetFile> {
        self.targets.iter().flat_map(|t| t.files.iter())
    }

    pub fn total_bytes(&self) -> u64 {
        self.files().map(|f| f.size).sum()
    }
}

/// Turns a description set into a download plan.
pub trait ProductMapper: Send + Sync {
    fn map(&self, images: &ImageDescriptionSet) -> Result<ProductMapping, MappingError>;
}

/// Places every file at `<os>/<arch>/<subarch>/<release>/<label>/<kind>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutMapper;

impl ProductMapper for LayoutMapper {
    fn map(&self, images: &ImageDescriptionSet) -> Result<ProductMapping, MappingError> {
        let mut targets = Vec::with_capacity(images.len());

        for (key, description) in images.iter() {
            let base = Url::parse(&description.base_url).map_err(|e| MappingError::Unresolvable {
                base: description.base_url.clone(),
                path: String::new(),
                reason: e.to_string(),
            })?;
            let dir = key.relative_dir();

            let files = description
                .files
                .iter()
                .map(|file| {
                    let url = base.join(&file.path).map_err(|e| MappingError::Unresolvable {
                        base: description.base_url.clone(),
                        path: file.path.clone(),
                        reason: e.to_string(),
                    })?;
                    Ok(TargetFile {
                        kind: file.kind,
                        url: url.to_string(),
                        sha256: file.sha256.clone(),
                        size: file.size,
                        relative_path: dir.join(file.kind.file_name()),
                    })
                })
                .collect::<Result<Vec<_>, MappingError>>()?;

            targets.push(ProductTarget {
                key: key.clone(),
                files,
            });
        }

        Ok(ProductMapping { targets })
    }
}
