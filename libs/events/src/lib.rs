//! # bootres-events
//!
//! Event type definitions and serialization for boot resource imports.
//!
//! ## Design Principles
//!
//! - Events are immutable records of something an import run observed
//! - Every event belongs to exactly one import run (`run_id`)
//! - Events carry a severity so consumers can surface warnings and errors
//!   without parsing messages
//! - Envelopes carry a schema version for downstream consumers
//!
//! ## Event Envelope
//!
//! All events share a common envelope with:
//! - Identity (`event_id`, `occurred_at`)
//! - Run correlation (`run_id`)
//! - Classification (`event_type`, `event_version`, `severity`)
//!
//! ## Event Types
//!
//! - Run lifecycle (`import.started`, `import.finished`, `import.failed`)
//! - Short circuits (`import.no_sources`, `import.nothing_available`,
//!   `import.unchanged`)
//! - Degraded steps (`bootloader.link_failed`, `targets.update_failed`,
//!   `reaper.failed`)

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
