//! End-to-end import runs against in-memory collaborators.


use std::fs;

use bootres_events::{event_types, Severity};
use bootres_importer::commit::CommitStage;
use bootres_importer::storage::{META_FILE, TARGETS_FILE};
use bootres_importer::targets::RegistrarOutcome;
use bootres_importer::{ImportError, ImportOutcome};
use bootres_testing::FailingBootLoader;

use harness::{catalog_b, imported_snapshot, Harness};

#[tokio::test]
async fn test_cold_import_commits_complete_snapshot() {
    let h = Harness::new();

    let outcome = h.run().await.unwrap();
    let snapshot = imported_snapshot(&outcome);

    assert_eq!(h.current(), Some(snapshot.clone()));
    assert!(snapshot.join(META_FILE).is_file());
    let descriptor = fs::read_to_string(snapshot.join(TARGETS_FILE)).unwrap();
    assert!(descriptor.contains("ephemeral-ubuntu-amd64-generic-jammy-stable"));
    assert!(descriptor.contains(
        &snapshot
            .join("ubuntu/amd64/generic/jammy/stable/squashfs")
            .display()
            .to_string()
    ));
    assert_eq!(
        fs::read(snapshot.join("ubuntu/amd64/generic/jammy/stable/boot-kernel")).unwrap(),
        b"jammy-kernel"
    );

    if let ImportOutcome::Imported(commit) = &outcome {
        assert_eq!(commit.stage, CommitStage::Reaped);
        assert!(matches!(commit.targets, RegistrarOutcome::Applied { .. }));
    }
    assert_eq!(h.daemon.updates(), vec![snapshot.join(TARGETS_FILE)]);
}

#[tokio::test]
async fn test_scenario_a_then_a_then_b() {
    let h = Harness::new();

    // Cold import of A.
    let first = imported_snapshot(&h.run().await.unwrap());
    assert_eq!(h.snapshot_names().len(), 1);

    // A again: nothing downloaded, no new snapshot, targets re-applied.
    let again = h.run().await.unwrap();
    assert_eq!(again, ImportOutcome::Unchanged { snapshot: first.clone() });
    assert_eq!(h.current(), Some(first.clone()));
    assert_eq!(h.snapshot_names().len(), 1);
    assert_eq!(h.downloader.calls(), 1);
    assert_eq!(h.daemon.updates().len(), 2);
    assert_eq!(h.daemon.last_update(), Some(first.join(TARGETS_FILE)));

    // B: a second snapshot replaces the first.
    h.serve(&catalog_b());
    let second = imported_snapshot(&h.run().await.unwrap());
    assert_ne!(second, first);
    assert!(second.file_name() > first.file_name());
    assert_eq!(h.current(), Some(second.clone()));
    assert!(!first.exists());
    assert_eq!(h.snapshot_names().len(), 1);
    assert_eq!(h.daemon.last_update(), Some(second.join(TARGETS_FILE)));

    let descriptor = fs::read_to_string(second.join(TARGETS_FILE)).unwrap();
    assert!(descriptor.contains("ephemeral-ubuntu-amd64-generic-noble-stable"));
    assert!(descriptor.contains("root-image"));
    assert!(!descriptor.contains("jammy"));
}

#[tokio::test]
async fn test_scenario_download_failure_keeps_active_snapshot() {
    let mut h = Harness::new();
    let first = imported_snapshot(&h.run().await.unwrap());
    h.run().await.unwrap();

    let snapshots_before = h.snapshot_names();
    let cache_before = h.cache_digests();
    h.drain_events();

    h.serve(&catalog_b());
    h.downloader.fail_after(1);
    let err = h.run().await.unwrap_err();

    assert!(matches!(err, ImportError::Download(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(h.current(), Some(first.clone()));
    assert_eq!(h.snapshot_names(), snapshots_before);
    assert!(h.cache_digests().is_subset(&cache_before));
    assert_eq!(h.daemon.last_update(), Some(first.join(TARGETS_FILE)));

    let events = h.drain_events();
    let failed = events
        .iter()
        .find(|e| e.event_type == event_types::IMPORT_FAILED)
        .unwrap();
    assert_eq!(failed.payload.severity, Severity::Error);
    assert_eq!(failed.payload.error_kind.as_deref(), Some("download"));

    // The same catalog imports once the download succeeds.
    h.downloader.succeed();
    let second = imported_snapshot(&h.run().await.unwrap());
    assert_eq!(h.current(), Some(second));
    assert!(!first.exists());
}

#[tokio::test]
async fn test_download_failure_on_cold_start_leaves_nothing() {
    let h = Harness::new();
    h.downloader.fail_after(1);

    assert!(h.run().await.is_err());
    assert_eq!(h.current(), None);
    assert!(h.snapshot_names().is_empty());
    assert!(h.cache_digests().is_empty());
    assert!(h.daemon.updates().is_empty());
}

#[tokio::test]
async fn test_unchanged_runs_keep_current_pointer() {
    let h = Harness::new();
    let first = imported_snapshot(&h.run().await.unwrap());
    let link_before = fs::read_link(h.storage.current_link()).unwrap();

    for _ in 0..3 {
        assert!(matches!(h.run().await.unwrap(), ImportOutcome::Unchanged { .. }));
    }

    assert_eq!(fs::read_link(h.storage.current_link()).unwrap(), link_before);
    assert_eq!(link_before, first);
    assert_eq!(h.snapshot_names().len(), 1);
}

#[tokio::test]
async fn test_no_sources_applies_targets_to_active_snapshot() {
    let mut h = Harness::new();

    assert_eq!(h.run_without_sources().await.unwrap(), ImportOutcome::NoSources);
    assert!(h.daemon.updates().is_empty());

    let first = imported_snapshot(&h.run().await.unwrap());
    h.drain_events();
    assert_eq!(h.run_without_sources().await.unwrap(), ImportOutcome::NoSources);
    assert_eq!(h.daemon.last_update(), Some(first.join(TARGETS_FILE)));
    assert_eq!(h.catalog.calls(), 1);

    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| e.event_type == event_types::IMPORT_NO_SOURCES
            && e.payload.severity == Severity::Warning));
}

#[tokio::test]
async fn test_empty_catalog_is_nothing_available() {
    let h = Harness::new();
    h.serve(&bootres_testing::CatalogFixture::new());

    assert_eq!(h.run().await.unwrap(), ImportOutcome::NothingAvailable);
    assert!(h.snapshot_names().is_empty());
    assert_eq!(h.downloader.calls(), 0);
}

#[tokio::test]
async fn test_transient_catalog_failures_are_retried() {
    let h = Harness::new();
    h.catalog.fail_next(2);

    imported_snapshot(&h.run().await.unwrap());
    assert_eq!(h.catalog.calls(), 3);
}

#[tokio::test]
async fn test_unreachable_catalog_fails_with_exit_code_1() {
    let h = Harness::new();
    h.catalog.fail_next(10);

    let err = h.run().await.unwrap_err();
    assert!(matches!(err, ImportError::Catalog(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(h.catalog.calls(), 3);
    assert!(h.snapshot_names().is_empty());
}

#[tokio::test]
async fn test_daemon_failure_does_not_fail_import() {
    let mut h = Harness::new();
    h.daemon.set_unavailable(true);

    let outcome = h.run().await.unwrap();
    let snapshot = imported_snapshot(&outcome);
    assert_eq!(h.current(), Some(snapshot));
    if let ImportOutcome::Imported(commit) = &outcome {
        assert!(matches!(commit.targets, RegistrarOutcome::Failed(_)));
    }

    let events = h.drain_events();
    let warning = events
        .iter()
        .find(|e| e.event_type == event_types::TARGETS_UPDATE_FAILED)
        .unwrap();
    assert_eq!(warning.payload.severity, Severity::Warning);
    assert_eq!(events.last().unwrap().event_type, event_types::IMPORT_FINISHED);
}

#[tokio::test]
async fn test_bootloader_failure_is_reported_not_fatal() {
    let mut h = Harness::with_bootloaders(vec![Box::new(FailingBootLoader::new("uefi"))]);

    let outcome = h.run().await.unwrap();
    match &outcome {
        ImportOutcome::Imported(commit) => {
            assert_eq!(commit.bootloader_failures, vec!["uefi".to_string()]);
            assert_eq!(h.current(), Some(commit.snapshot.clone()));
        }
        other => panic!("expected an import, got {:?}", other),
    }

    let events = h.drain_events();
    let failure = events
        .iter()
        .find(|e| e.event_type == event_types::BOOTLOADER_LINK_FAILED)
        .unwrap();
    assert_eq!(failure.payload.severity, Severity::Error);
}

#[tokio::test]
async fn test_events_share_run_id_and_bracket_the_run() {
    let mut h = Harness::new();
    h.run().await.unwrap();

    let events = h.drain_events();
    assert_eq!(events.first().unwrap().event_type, event_types::IMPORT_STARTED);
    assert_eq!(events.last().unwrap().event_type, event_types::IMPORT_FINISHED);
    let run_id = events[0].run_id;
    assert!(events.iter().all(|e| e.run_id == run_id));

    h.run().await.unwrap();
    let second = h.drain_events();
    assert_ne!(second[0].run_id, run_id);
    assert!(second
        .iter()
        .any(|e| e.event_type == event_types::IMPORT_UNCHANGED));
}
