//! Progress store persistence and contention

use fieldrec_ag::models::{FileOutcome, FolderProgress};
use fieldrec_ag::services::ProgressStore;
use std::sync::Arc;

#[tokio::test]
async fn every_mutation_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state/progress.json");

    let store = ProgressStore::load(&path).await;
    store.set("siteA", FolderProgress::started(3)).await;
    store.update("siteA", |p| p.record("siteA/a.wav", FileOutcome::Failed)).await;

    let on_disk: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk["siteA"]["total"], 3);
    assert_eq!(on_disk["siteA"]["done"], 1);
    assert_eq!(on_disk["siteA"]["errors"], 1);
    assert_eq!(on_disk["siteA"]["processedFiles"][0], "siteA/a.wav");

    let reloaded = ProgressStore::load(&path).await;
    assert_eq!(reloaded.get("siteA").await, store.get("siteA").await);
}

#[tokio::test]
async fn concurrent_updates_are_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ProgressStore::load(dir.path().join("progress.json")).await);
    store.set("busy", FolderProgress::started(64)).await;

    let mut tasks = Vec::new();
    for i in 0..64 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let outcome = if i % 8 == 0 { FileOutcome::Failed } else { FileOutcome::Generated };
            store.update("busy", |p| p.record(&format!("busy/{i}.wav"), outcome)).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }

    let progress = store.get("busy").await;
    assert_eq!(progress.done, 64);
    assert_eq!(progress.errors, 8);

    let reloaded = ProgressStore::load(dir.path().join("progress.json")).await;
    assert_eq!(reloaded.get("busy").await.done, 64);
}

#[tokio::test]
async fn clear_all_resets_persisted_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.json");
    let store = ProgressStore::load(&path).await;
    store.set("a", FolderProgress::started(1)).await;
    store.set("b", FolderProgress::started(2)).await;

    store.clear_all().await;
    assert!(store.all().await.is_empty());
    assert!(ProgressStore::load(&path).await.all().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn isolated_instances_do_not_share_state() {
    let a = ProgressStore::in_memory();
    let b = ProgressStore::in_memory();
    a.set("site", FolderProgress::started(5)).await;
    assert_eq!(b.get("site").await, FolderProgress::default());
    assert!(a.path().is_none());
}
