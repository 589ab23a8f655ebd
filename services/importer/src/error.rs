//! Errors that end an import run.

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::commit::CommitError;
use crate::config::ConfigError;
use crate::download::DownloadError;
use crate::mapping::MappingError;
use crate::storage::StorageError;

/// Process exit codes of `import-boot-images`.
pub mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const IMPORT_FAILED: u8 = 1;
    pub const UNEXPECTED: u8 = 2;
    pub const NO_CONFIG: u8 = 3;
    pub const LOCKED: u8 = 4;
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("No config: sources file {0} does not exist")]
    NoConfig(PathBuf),

    #[error("Another import holds the lock on {0}")]
    Locked(PathBuf),

    #[error("Configuration error: {0}")]
    Config(ConfigError),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Commit failed: {0}")]
    Commit(#[from] CommitError),
}

impl From<ConfigError> for ImportError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::NoConfig(path) => ImportError::NoConfig(path),
            other => ImportError::Config(other),
        }
    }
}

impl From<StorageError> for ImportError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Locked(path) => ImportError::Locked(path),
            other => ImportError::Storage(other),
        }
    }
}

impl ImportError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ImportError::NoConfig(_) => exit_codes::NO_CONFIG,
            ImportError::Locked(_) => exit_codes::LOCKED,
            ImportError::Catalog(_) | ImportError::Download(_) => exit_codes::IMPORT_FAILED,
            ImportError::Config(_)
            | ImportError::Storage(_)
            | ImportError::Mapping(_)
            | ImportError::Commit(_) => exit_codes::UNEXPECTED,
        }
    }

    /// Short machine-friendly name, used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::NoConfig(_) => "no_config",
            ImportError::Locked(_) => "locked",
            ImportError::Config(_) => "config",
            ImportError::Storage(_) => "storage",
            ImportError::Catalog(_) => "catalog",
            ImportError::Mapping(_) => "mapping",
            ImportError::Download(_) => "download",
            ImportError::Commit(_) => "commit",
        }
    }
}
