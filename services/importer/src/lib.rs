//! Boot image snapshot importer.
//!
//! Fetches boot image catalogs from upstream sources, stages changed
//! content as a new immutable snapshot under a storage root, atomically
//! switches the `current` pointer to it, and keeps the tgt daemon serving
//! the active snapshot throughout.
//!
//! ## Storage layout
//!
//! ```text
//! <root>/
//!   current -> <root>/snapshot-20240101-120000-000000
//!   snapshot-20240101-120000-000000/
//!     maas.meta
//!     maas.tgt
//!     bootloader/<loader>/...
//!     <os>/<arch>/<subarch>/<release>/<label>/<file-kind>
//!   cache/<sha256>
//!   .import.lock
//! ```
//!
//! ## Components
//!
//! - [`catalog`]: catalog retrieval and the canonical metadata record
//! - [`mapping`]: catalog images to snapshot file layout
//! - [`download`]: content download into a staging snapshot
//! - [`change`]: change detection against the active snapshot
//! - [`commit`]: staged commit with rollback
//! - [`targets`]: target descriptor and daemon reconciliation
//! - [`reaper`]: pruning of superseded snapshots and cache entries
//! - [`pipeline`]: the orchestrated run

pub mod bootloader;
pub mod catalog;
pub mod change;
pub mod commit;
pub mod config;
pub mod download;
pub mod error;
pub mod mapping;
pub mod notify;
pub mod pipeline;
pub mod reaper;
pub mod retry;
pub mod storage;
pub mod targets;

pub use error::ImportError;
pub use pipeline::{ImportOutcome, ImportPipeline};
