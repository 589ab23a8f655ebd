//! Configuration for the importer.
//!
//! Two inputs configure a run:
//! - The sources file: a YAML list of upstream sources and the image
//!   selections wanted from each. It is required; a missing file is
//!   reported as [`ConfigError::NoConfig`].
//! - Runtime settings ([`ImporterConfig`]): where state lives and how the
//!   target daemon is driven. These come from CLI flags and environment.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::catalog::ImageKey;
use crate::retry::RetryPolicy;
use crate::targets::TgtAdminConfig;

/// Wildcard accepted in every selection field.
pub const WILDCARD: &str = "*";

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No config: sources file {0} does not exist")]
    NoConfig(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid sources file: {0}")]
    Invalid(String),
}

/// An upstream source of boot images.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BootSource {
    /// URL of the source's catalog document.
    pub url: String,

    /// Path to a keyring used by verifying fetchers.
    #[serde(default)]
    pub keyring: Option<PathBuf>,

    /// Inline keyring data used by verifying fetchers.
    #[serde(default)]
    pub keyring_data: Option<String>,

    /// Images wanted from this source. Empty means everything.
    #[serde(default)]
    pub selections: Vec<Selection>,
}

impl BootSource {
    /// A source without keyring or selections.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            keyring: None,
            keyring_data: None,
            selections: Vec::new(),
        }
    }

    /// Whether this source's selections include `key`.
    pub fn selects(&self, key: &ImageKey) -> bool {
        self.selections.is_empty() || self.selections.iter().any(|s| s.matches(key))
    }
}

/// A filter over the images a source offers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Selection {
    #[serde(default = "wildcard")]
    pub os: String,

    #[serde(default = "wildcard")]
    pub release: String,

    #[serde(default)]
    pub arches: Vec<String>,

    #[serde(default)]
    pub subarches: Vec<String>,

    #[serde(default)]
    pub labels: Vec<String>,
}

fn wildcard() -> String {
    WILDCARD.to_string()
}

impl Selection {
    pub fn matches(&self, key: &ImageKey) -> bool {
        field_matches(&self.os, &key.osystem)
            && field_matches(&self.release, &key.release)
            && list_matches(&self.arches, &key.arch)
            && list_matches(&self.subarches, &key.subarch)
            && list_matches(&self.labels, &key.label)
    }
}

fn field_matches(pattern: &str, value: &str) -> bool {
    pattern == WILDCARD || pattern == value
}

fn list_matches(patterns: &[String], value: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| field_matches(p, value))
}

/// Accepted shapes of the sources file.
#[derive(Deserialize)]
#[serde(untagged)]
enum SourcesFile {
    List(Vec<BootSource>),
    Wrapped { sources: Vec<BootSource> },
}

/// Read the sources file at `path`.
pub fn load_sources(path: &Path) -> Result<Vec<BootSource>, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigError::NoConfig(path.to_path_buf()))
        }
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let sources = parse_sources(&raw).map_err(|e| match e {
        ConfigError::Parse { source, .. } => ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;

    debug!(path = %path.display(), count = sources.len(), "Loaded boot sources");
    Ok(sources)
}

/// Parse sources file content.
pub fn parse_sources(raw: &str) -> Result<Vec<BootSource>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let parsed: SourcesFile = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: PathBuf::new(),
        source,
    })?;
    let sources = match parsed {
        SourcesFile::List(sources) => sources,
        SourcesFile::Wrapped { sources } => sources,
    };

    if let Some(source) = sources.iter().find(|s| s.url.trim().is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "source with empty url ({} selections)",
            source.selections.len()
        )));
    }

    Ok(sources)
}

/// Runtime settings for an import run.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    /// Storage root holding `current`, snapshots and the cache.
    pub storage_root: PathBuf,

    /// Target daemon settings.
    pub targets: TgtAdminConfig,

    /// Directory with one subdirectory per boot loader to link into snapshots.
    pub bootloader_dir: Option<PathBuf>,

    /// JSON-lines file receiving import events.
    pub events_file: Option<PathBuf>,

    /// Retry policy for fetching the catalog.
    pub catalog_retry: RetryPolicy,

    /// Retry policy for each downloaded file.
    pub download_retry: RetryPolicy,

    /// Timeout for a single HTTP request.
    pub http_timeout: Duration,

    /// Maximum files downloaded at once.
    pub max_concurrent_downloads: usize,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/var/lib/bootres/boot-resources"),
            targets: TgtAdminConfig::default(),
            bootloader_dir: None,
            events_file: None,
            catalog_retry: RetryPolicy::default(),
            download_retry: RetryPolicy::default(),
            http_timeout: Duration::from_secs(600),
            max_concurrent_downloads: 4,
        }
    }
}
