//! Directory watcher behavior over a real plugins directory

mod common;

use common::{RecordingOps, descriptor, write_archive};
use modswap::host::HostState;
use modswap::plugin::fingerprint::hash_file;
use modswap::plugin::{DirectoryWatcher, FingerprintStore, IgnoreSet, ScanConfig};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn seeded(dir: &TempDir) -> Arc<FingerprintStore> {
    let store = Arc::new(FingerprintStore::new());
    store.seed(dir.path()).await.unwrap();
    store
}

#[tokio::test]
async fn test_changed_archive_reloads_exactly_once() {
    let dir = TempDir::new().unwrap();
    write_archive(dir.path(), "chatty-1.0.zip", &descriptor("Chatty", "1.0", "chatty", ""));
    let store = seeded(&dir).await;
    let ops = Arc::new(RecordingOps::with_loaded(&["Chatty"]));
    let watcher = DirectoryWatcher::new(dir.path(), ops.clone(), store.clone(), Arc::new(IgnoreSet::default()));

    assert_eq!(watcher.scan_changed().await, 0);

    let path = write_archive(dir.path(), "chatty-1.0.zip", &descriptor("Chatty", "1.1", "chatty", ""));
    assert_eq!(watcher.scan_changed().await, 1);
    assert_eq!(watcher.scan_changed().await, 0);

    assert_eq!(ops.calls(), vec!["reload Chatty"]);
    assert_eq!(
        store.hash_of("chatty-1.0.zip").await,
        Some(hash_file(&path).unwrap())
    );
}

#[tokio::test]
async fn test_new_archive_is_loaded_once() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir).await;
    let ops = Arc::new(RecordingOps::default());
    let watcher = DirectoryWatcher::new(dir.path(), ops.clone(), store.clone(), Arc::new(IgnoreSet::default()));

    assert_eq!(watcher.scan_new().await, 0);
    write_archive(dir.path(), "Fresh.zip", &descriptor("Fresh", "0.1", "chatty", ""));
    std::fs::write(dir.path().join("notes.txt"), "not an archive").unwrap();

    assert_eq!(watcher.scan_new().await, 1);
    assert_eq!(watcher.scan_new().await, 0);
    assert_eq!(ops.calls(), vec!["load Fresh"]);
    assert!(store.contains("Fresh.zip").await);
    assert!(!store.contains("notes.txt").await);
}

#[tokio::test]
async fn test_new_archive_with_upper_case_extension_is_loaded() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir).await;
    let manager = Arc::new(common::manager(HostState::segmented(), dir.path()));
    let watcher = DirectoryWatcher::new(dir.path(), manager.clone(), store.clone(), Arc::new(IgnoreSet::default()));

    // File name and declared name differ
    write_archive(dir.path(), "Tools.ZIP", &descriptor("Chatty", "1.0", "chatty", ""));
    assert_eq!(watcher.scan_new().await, 1);

    assert!(manager.is_loaded("Chatty").await);
    assert!(store.contains("Tools.ZIP").await);
}

#[tokio::test]
async fn test_removed_archive_unloads_owner() {
    let dir = TempDir::new().unwrap();
    let path = write_archive(dir.path(), "Chatty.zip", &descriptor("Chatty", "1.0", "chatty", ""));
    write_archive(dir.path(), "Orphan.zip", &descriptor("Orphan", "1.0", "chatty", ""));
    let store = seeded(&dir).await;
    let ops = Arc::new(RecordingOps::with_loaded(&["Chatty"]));
    let watcher = DirectoryWatcher::new(dir.path(), ops.clone(), store.clone(), Arc::new(IgnoreSet::default()));

    std::fs::remove_file(&path).unwrap();
    std::fs::remove_file(dir.path().join("Orphan.zip")).unwrap();

    assert_eq!(watcher.scan_removed().await, 1);
    assert_eq!(ops.calls(), vec!["unload Chatty"]);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_ignored_modules_are_left_alone() {
    let dir = TempDir::new().unwrap();
    let path = write_archive(dir.path(), "Chatty.zip", &descriptor("Chatty", "1.0", "chatty", ""));
    let store = seeded(&dir).await;
    let ops = Arc::new(RecordingOps::with_loaded(&["Chatty"]));
    let watcher = DirectoryWatcher::new(
        dir.path(),
        ops.clone(),
        store,
        Arc::new(IgnoreSet::new(["chatty"])),
    );

    write_archive(dir.path(), "Chatty.zip", &descriptor("Chatty", "2.0", "chatty", ""));
    assert_eq!(watcher.scan_changed().await, 0);
    std::fs::remove_file(&path).unwrap();
    assert_eq!(watcher.scan_removed().await, 0);
    assert!(ops.calls().is_empty());
}

#[tokio::test]
async fn test_changed_archive_without_loaded_owner_becomes_new() {
    let dir = TempDir::new().unwrap();
    write_archive(dir.path(), "Chatty.zip", &descriptor("Chatty", "1.0", "chatty", ""));
    let store = seeded(&dir).await;
    let ops = Arc::new(RecordingOps::default());
    let watcher = DirectoryWatcher::new(dir.path(), ops.clone(), store.clone(), Arc::new(IgnoreSet::default()));

    write_archive(dir.path(), "Chatty.zip", &descriptor("Chatty", "1.1", "chatty", ""));
    assert_eq!(watcher.scan_changed().await, 0);
    assert!(!store.contains("Chatty.zip").await);

    assert_eq!(watcher.scan_new().await, 1);
    assert_eq!(ops.calls(), vec!["load Chatty"]);
}

#[tokio::test]
async fn test_started_watcher_picks_up_new_archive() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir).await;
    let ops = Arc::new(RecordingOps::default());
    let mut watcher = DirectoryWatcher::new(dir.path(), ops.clone(), store, Arc::new(IgnoreSet::default()));

    watcher.start(ScanConfig::every(1), ScanConfig::default(), ScanConfig::default());
    assert!(watcher.is_running());

    write_archive(dir.path(), "Fresh.zip", &descriptor("Fresh", "0.1", "chatty", ""));
    tokio::time::sleep(Duration::from_millis(2500)).await;

    watcher.stop();
    assert!(!watcher.is_running());
    assert_eq!(ops.calls(), vec!["load Fresh"]);
}
