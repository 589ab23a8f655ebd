//! Event type definitions for import runs.
//!
//! Every event carries the same [`ImportEvent`] payload; the type name tells them apart.

use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    // Run lifecycle
    pub const IMPORT_STARTED: &str = "import.started";
    pub const IMPORT_FINISHED: &str = "import.finished";
    pub const IMPORT_FAILED: &str = "import.failed";

    // Short circuits
    pub const IMPORT_NO_SOURCES: &str = "import.no_sources";
    pub const IMPORT_NOTHING_AVAILABLE: &str = "import.nothing_available";
    pub const IMPORT_UNCHANGED: &str = "import.unchanged";

    // Degraded steps
    pub const BOOTLOADER_LINK_FAILED: &str = "bootloader.link_failed";
    pub const TARGETS_UPDATE_FAILED: &str = "targets.update_failed";
    pub const REAPER_FAILED: &str = "reaper.failed";

    /// Every known event type.
    pub const ALL: &[&str] = &[
        IMPORT_STARTED,
        IMPORT_FINISHED,
        IMPORT_FAILED,
        IMPORT_NO_SOURCES,
        IMPORT_NOTHING_AVAILABLE,
        IMPORT_UNCHANGED,
        BOOTLOADER_LINK_FAILED,
        TARGETS_UPDATE_FAILED,
        REAPER_FAILED,
    ];
}

/// Validate that an event type name is one this crate knows about.
pub fn validate_event_type(event_type: &str) -> Result<(), EventError> {
    if event_types::ALL.contains(&event_type) {
        Ok(())
    } else {
        Err(EventError::UnknownEventType(event_type.to_string()))
    }
}

// =============================================================================
// Shared Types
// =============================================================================

/// How loudly an event should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Payload shared by every import event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEvent {
    /// Event type name (one of [`event_types`]).
    pub event_type: String,

    /// Severity of the event.
    pub severity: Severity,

    /// Human-readable message.
    pub message: String,

    /// Snapshot the event refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,

    /// Failure class of a failed run (`download`, `catalog`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl ImportEvent {
    pub fn new(event_type: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            event_type: event_type.to_string(),
            severity,
            message: message.into(),
            snapshot: None,
            error_kind: None,
        }
    }

    pub fn info(event_type: &str, message: impl Into<String>) -> Self {
        Self::new(event_type, Severity::Info, message)
    }

    pub fn warning(event_type: &str, message: impl Into<String>) -> Self {
        Self::new(event_type, Severity::Warning, message)
    }

    pub fn error(event_type: &str, message: impl Into<String>) -> Self {
        Self::new(event_type, Severity::Error, message)
    }

    /// Attach the snapshot this event refers to.
    pub fn with_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.snapshot = Some(snapshot.into());
        self
    }

    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }
}
