//! # bootres-testing
//!
//! Fixtures and in-memory fakes for the importer's collaborator traits.
//!
//! - [`CatalogFixture`]: builds image description sets together with the
//!   bytes behind every file
//! - [`StaticCatalog`]: a catalog fetcher serving a swappable set, with
//!   optional transient failures
//! - [`FixtureDownloader`]: a downloader that stages fixture bytes through
//!   the real content cache, with an injectable mid-download failure
//! - [`RecordingDaemon`]: a target daemon that records every update
//! - [`FailingBootLoader`]: a boot loader that always fails

mod fakes;
mod fixtures;

pub use fakes::{FailingBootLoader, FixtureDownloader, RecordingDaemon, StaticCatalog};
pub use fixtures::{sha256_hex, CatalogFixture};
