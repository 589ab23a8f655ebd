//! Recovery from runs killed before the current pointer was swapped, and
//! reaper safety.


use std::fs;
use std::os::unix::fs::symlink;

use bootres_importer::reaper::Reaper;
use bootres_importer::storage::{StorageRoot, META_FILE, TARGETS_FILE};
use bootres_importer::ImportOutcome;
use proptest::prelude::*;
use tempfile::TempDir;

use harness::{catalog_b, imported_snapshot, Harness};

/// Leave behind what a run killed mid-commit would: a staging directory
/// with some content linked, a metadata record, and a stray temp link.
fn simulate_killed_run(h: &Harness) -> std::path::PathBuf {
    let staging = h.storage.create_staging().unwrap();
    let digest = bootres_testing::sha256_hex(b"half-downloaded");
    h.storage
        .cache()
        .insert_bytes(&digest, b"half-downloaded")
        .unwrap();
    h.storage
        .cache()
        .link_into(&digest, &staging.join("ubuntu/amd64/generic/noble/stable/squashfs"))
        .unwrap();
    fs::write(staging.join(META_FILE), b"{\"images\":[]}").unwrap();
    staging
}

#[tokio::test]
async fn test_killed_run_never_moves_current() {
    let h = Harness::new();
    let first = imported_snapshot(&h.run().await.unwrap());

    let leftover = simulate_killed_run(&h);
    assert_eq!(h.current(), Some(first.clone()));

    // Re-running with unchanged upstream clears the leftover and keeps current.
    let outcome = h.run().await.unwrap();
    assert_eq!(outcome, ImportOutcome::Unchanged { snapshot: first.clone() });
    assert!(!leftover.exists());
    assert_eq!(h.current(), Some(first.clone()));
    assert_eq!(h.snapshot_names().len(), 1);
    assert!(!h
        .cache_digests()
        .contains(&bootres_testing::sha256_hex(b"half-downloaded")));
}

#[tokio::test]
async fn test_killed_run_then_new_catalog_imports_cleanly() {
    let h = Harness::new();
    let first = imported_snapshot(&h.run().await.unwrap());
    let leftover = simulate_killed_run(&h);

    h.serve(&catalog_b());
    let second = imported_snapshot(&h.run().await.unwrap());

    assert!(!leftover.exists());
    assert!(!first.exists());
    assert_eq!(h.current(), Some(second.clone()));
    assert!(second.join(TARGETS_FILE).is_file());
}

#[tokio::test]
async fn test_killed_cold_start_is_cleaned_up() {
    let h = Harness::new();
    let leftover = simulate_killed_run(&h);
    assert_eq!(h.current(), None);

    let snapshot = imported_snapshot(&h.run().await.unwrap());

    assert!(!leftover.exists());
    assert_eq!(h.current(), Some(snapshot));
    assert_eq!(h.snapshot_names().len(), 1);
}

#[test]
fn test_stray_temp_link_does_not_disturb_current() {
    let dir = TempDir::new().unwrap();
    let storage = StorageRoot::open(dir.path()).unwrap();
    let active = storage.create_staging().unwrap();
    storage.activate(&active).unwrap();

    // A run killed between creating the temp link and renaming it.
    let next = storage.create_staging().unwrap();
    symlink(&next, storage.path().join(format!(".current.tmp-{}", 999_999))).unwrap();

    assert_eq!(storage.current_snapshot().unwrap(), Some(active.clone()));
    storage.activate(&next).unwrap();
    assert_eq!(storage.current_snapshot().unwrap(), Some(next));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_reaper_never_removes_current(count in 1usize..6, pick in 0usize..6) {
        let dir = TempDir::new().unwrap();
        let storage = StorageRoot::open(dir.path()).unwrap();
        let snapshots: Vec<_> = (0..count).map(|_| storage.create_staging().unwrap()).collect();
        let current = snapshots[pick % count].clone();
        storage.activate(&current).unwrap();

        let report = Reaper::new(&storage).reap().unwrap();

        prop_assert!(current.is_dir());
        prop_assert_eq!(storage.current_snapshot().unwrap(), Some(current.clone()));
        prop_assert_eq!(report.snapshots_removed.len(), count - 1);
        prop_assert!(!report.snapshots_removed.contains(&current));
    }
}
