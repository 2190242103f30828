#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Wait store persistence and restart recovery.

use chrono::Utc;
use tempfile::TempDir;
use vigil_claw_infra::SqliteWaitStore;

use vigil_claw_engine::{WaitRecord, WaitStatus, WaitStore, WaitTarget};

fn record(id: &str) -> WaitRecord {
    WaitRecord {
        id: id.to_string(),
        task_id: None,
        target: WaitTarget::Window("xterm".to_string()),
        criteria: "prompt returns".to_string(),
        timeout_s: 120,
        poll_interval_s: 2.0,
        status: WaitStatus::Watching,
        detail: String::new(),
        created_at: Utc::now(),
        resolved_at: None,
    }
}

#[tokio::test]
async fn test_create_then_get() {
    let dir = TempDir::new().unwrap();
    let store = SqliteWaitStore::new(dir.path().join("wait.db")).unwrap();

    store.record_created(&record("w1")).await.unwrap();

    let loaded = store.get("w1").await.unwrap().unwrap();
    assert_eq!(loaded.id, "w1");
    assert_eq!(loaded.target, WaitTarget::Window("xterm".to_string()));
    assert_eq!(loaded.criteria, "prompt returns");
    assert_eq!(loaded.timeout_s, 120);
    assert_eq!(loaded.status, WaitStatus::Watching);
    assert!(loaded.resolved_at.is_none());
}

#[tokio::test]
async fn test_get_unknown_is_none() {
    let dir = TempDir::new().unwrap();
    let store = SqliteWaitStore::new(dir.path().join("wait.db")).unwrap();
    assert!(store.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_terminal_commit() {
    let dir = TempDir::new().unwrap();
    let store = SqliteWaitStore::new(dir.path().join("wait.db")).unwrap();

    store.record_created(&record("w1")).await.unwrap();
    store
        .record_terminal("w1", WaitStatus::Resolved, "shell prompt visible", Utc::now())
        .await
        .unwrap();

    let loaded = store.get("w1").await.unwrap().unwrap();
    assert_eq!(loaded.status, WaitStatus::Resolved);
    assert_eq!(loaded.detail, "shell prompt visible");
    assert!(loaded.resolved_at.is_some());
}

#[tokio::test]
async fn test_terminal_commit_for_unknown_id_fails() {
    let dir = TempDir::new().unwrap();
    let store = SqliteWaitStore::new(dir.path().join("wait.db")).unwrap();
    let result = store
        .record_terminal("ghost", WaitStatus::Error, "x", Utc::now())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_recovery_marks_watching_rows() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("wait.db");

    // A previous daemon run left two jobs watching and one resolved.
    {
        let store = SqliteWaitStore::new(&db_path).unwrap();
        store.record_created(&record("w1")).await.unwrap();
        store.record_created(&record("w2")).await.unwrap();
        store.record_created(&record("w3")).await.unwrap();
        store
            .record_terminal("w3", WaitStatus::Resolved, "done", Utc::now())
            .await
            .unwrap();
    }

    // Reopen, as a restarted daemon would.
    let store = SqliteWaitStore::new(&db_path).unwrap();
    let mut orphaned = store.recover_interrupted().await.unwrap();
    orphaned.sort();
    assert_eq!(orphaned, vec!["w1".to_string(), "w2".to_string()]);

    for id in ["w1", "w2"] {
        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WaitStatus::Error);
        assert_eq!(loaded.detail, "daemon restarted while watching");
        assert!(loaded.resolved_at.is_some());
    }
    // The resolved job is untouched.
    let resolved = store.get("w3").await.unwrap().unwrap();
    assert_eq!(resolved.status, WaitStatus::Resolved);
    assert_eq!(resolved.detail, "done");
}

#[tokio::test]
async fn test_recovery_on_clean_store_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = SqliteWaitStore::new(dir.path().join("wait.db")).unwrap();
    assert!(store.recover_interrupted().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_recent() {
    let dir = TempDir::new().unwrap();
    let store = SqliteWaitStore::new(dir.path().join("wait.db")).unwrap();

    for id in ["w1", "w2", "w3"] {
        store.record_created(&record(id)).await.unwrap();
    }

    let listed = store.list_recent(2).unwrap();
    assert_eq!(listed.len(), 2);
}
