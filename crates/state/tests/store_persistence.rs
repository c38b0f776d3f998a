use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use workplan_state::{
    spawn_periodic_flush, FileBackend, LoadReport, StateBackend, StateError, StateMetadata,
    StateUpdate, StoreConfig, TaskStateStore, TaskStatus,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config_in(temp: &TempDir) -> StoreConfig {
    StoreConfig::with_state_file(temp.path().join("state").join("task-state.json"))
}

fn meta(key: &str, value: serde_json::Value) -> StateMetadata {
    let mut metadata = StateMetadata::new();
    metadata.insert(key.to_string(), value);
    metadata
}

#[tokio::test]
async fn completed_task_rejects_further_transitions() {
    init_logging();
    let temp = TempDir::new().expect("tempdir");
    let (store, report) = TaskStateStore::open_file(&config_in(&temp))
        .await
        .expect("open");
    assert_eq!(report, LoadReport::Fresh);

    for status in [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Completed] {
        store
            .set_state("t1", status, StateMetadata::new())
            .await
            .expect("valid transition");
    }

    let err = store
        .set_state("t1", TaskStatus::InProgress, StateMetadata::new())
        .await
        .expect_err("completed is terminal");
    assert!(matches!(
        err,
        StateError::InvalidTransition {
            from: Some(TaskStatus::Completed),
            to: TaskStatus::InProgress,
            ..
        }
    ));
    let record = store.get_state("t1").await.expect("record");
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.previous_status, Some(TaskStatus::InProgress));
}

#[tokio::test]
async fn flushed_state_reloads_identically() {
    init_logging();
    let temp = TempDir::new().expect("tempdir");
    let config = config_in(&temp);
    let (store, _) = TaskStateStore::open_file(&config).await.expect("open");

    store
        .set_state("a", TaskStatus::Pending, meta("files", json!(["src/a.rs"])))
        .await
        .expect("a");
    store
        .set_state("b", TaskStatus::Pending, StateMetadata::new())
        .await
        .expect("b");
    store
        .set_state("b", TaskStatus::InProgress, meta("worker", json!("gen-1")))
        .await
        .expect("b start");
    assert!(store.flush().await.expect("flush"));

    let before = store.get_all_states(None).await;
    drop(store);

    let (reopened, report) = TaskStateStore::open_file(&config).await.expect("reopen");
    assert_eq!(report, LoadReport::Loaded { tasks: 2 });
    assert_eq!(reopened.get_all_states(None).await, before);
    assert!(!reopened.is_dirty());
}

#[tokio::test]
async fn backups_are_capped_at_ten() {
    init_logging();
    let temp = TempDir::new().expect("tempdir");
    let config = config_in(&temp);
    let (store, _) = TaskStateStore::open_file(&config).await.expect("open");

    for i in 0..15 {
        store
            .set_state(&format!("t{i}"), TaskStatus::Pending, StateMetadata::new())
            .await
            .expect("create");
        store.flush().await.expect("flush");
    }

    let backend = FileBackend::from_config(&config);
    // The first flush had nothing to back up.
    assert_eq!(backend.list_backups().expect("list").len(), 10);
}

#[tokio::test]
async fn batch_update_reports_each_item() {
    init_logging();
    let store = TaskStateStore::in_memory();
    store
        .set_state("ok", TaskStatus::Pending, StateMetadata::new())
        .await
        .expect("ok");
    store
        .set_state("done", TaskStatus::Pending, StateMetadata::new())
        .await
        .expect("done");

    let outcomes = store
        .batch_update_states(vec![
            StateUpdate::new("ok", TaskStatus::InProgress),
            StateUpdate::new("done", TaskStatus::Completed),
            StateUpdate::new("fresh", TaskStatus::Pending),
        ])
        .await;

    let summary: Vec<(&str, bool, Option<TaskStatus>)> = outcomes
        .iter()
        .map(|o| (o.task_id.as_str(), o.success, o.status))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("ok", true, Some(TaskStatus::InProgress)),
            ("done", false, Some(TaskStatus::Pending)),
            ("fresh", true, Some(TaskStatus::Pending)),
        ]
    );
    assert!(outcomes[1].error.as_deref().unwrap_or_default().contains("pending -> completed"));
}

#[tokio::test]
async fn corrupt_snapshot_is_restored_from_latest_backup() {
    init_logging();
    let temp = TempDir::new().expect("tempdir");
    let config = config_in(&temp);
    let (store, _) = TaskStateStore::open_file(&config).await.expect("open");

    store
        .set_state("first", TaskStatus::Pending, StateMetadata::new())
        .await
        .expect("first");
    store.flush().await.expect("flush 1");
    store
        .set_state("second", TaskStatus::Pending, StateMetadata::new())
        .await
        .expect("second");
    store.flush().await.expect("flush 2");
    drop(store);

    std::fs::write(&config.state_file, b"{\"version\": \"1.0\", \"states\": ").expect("corrupt");

    let (restored, report) = TaskStateStore::open_file(&config).await.expect("restore");
    match report {
        LoadReport::RestoredFromBackup { tasks, original_error, .. } => {
            assert_eq!(tasks, 1);
            assert!(!original_error.is_empty());
        }
        other => panic!("expected restore, got {other:?}"),
    }
    // The newest backup predates the second flush.
    assert!(restored.get_state("first").await.is_some());
    assert!(restored.get_state("second").await.is_none());

    // The restored snapshot replaced the corrupt file.
    let backend = FileBackend::from_config(&config);
    assert!(backend.load().expect("load").is_some());
}

#[tokio::test]
async fn corrupt_snapshot_without_backup_fails() {
    init_logging();
    let temp = TempDir::new().expect("tempdir");
    let config = config_in(&temp);
    std::fs::create_dir_all(config.state_file.parent().expect("parent")).expect("mkdir");
    std::fs::write(&config.state_file, b"not json").expect("write");

    let err = match TaskStateStore::open_file(&config).await {
        Ok(_) => panic!("corrupt state without backup must fail"),
        Err(err) => err,
    };
    match err {
        StateError::Corrupt { reason, .. } => assert!(reason.contains("no backup available")),
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn reset_backs_up_then_clears() {
    init_logging();
    let temp = TempDir::new().expect("tempdir");
    let config = config_in(&temp);
    let (store, _) = TaskStateStore::open_file(&config).await.expect("open");
    store
        .set_state("t1", TaskStatus::Pending, StateMetadata::new())
        .await
        .expect("t1");
    store.flush().await.expect("flush");

    store.reset().await.expect("reset");

    assert!(store.get_all_states(None).await.is_empty());
    assert!(!store.is_dirty());
    let backend = FileBackend::from_config(&config);
    assert_eq!(backend.list_backups().expect("list").len(), 1);
    let (reopened, _) = TaskStateStore::open_file(&config).await.expect("reopen");
    assert!(reopened.get_all_states(None).await.is_empty());
}

#[tokio::test]
async fn periodic_flush_persists_dirty_store() {
    init_logging();
    let store = Arc::new(TaskStateStore::in_memory());
    let handle = spawn_periodic_flush(Arc::clone(&store), Duration::from_millis(10));

    store
        .set_state("t1", TaskStatus::Pending, StateMetadata::new())
        .await
        .expect("t1");
    for _ in 0..50 {
        if !store.is_dirty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.abort();

    assert!(!store.is_dirty());
    let snapshot = store.backend().load().expect("load").expect("snapshot");
    assert!(snapshot.states.contains_key("t1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_interleave_with_flushes() {
    init_logging();
    let temp = TempDir::new().expect("tempdir");
    let config = config_in(&temp);
    let (store, _) = TaskStateStore::open_file(&config).await.expect("open");
    let store = Arc::new(store);

    let mut writers = Vec::new();
    for worker in 0..8 {
        let store = Arc::clone(&store);
        writers.push(tokio::spawn(async move {
            for i in 0..25 {
                let id = format!("w{worker}-t{i}");
                store
                    .set_state(&id, TaskStatus::Pending, meta("worker", json!(worker)))
                    .await
                    .expect("create");
                store
                    .set_state(&id, TaskStatus::InProgress, StateMetadata::new())
                    .await
                    .expect("dispatch");
            }
        }));
    }
    let flusher = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for _ in 0..20 {
                store.flush().await.expect("flush");
                tokio::task::yield_now().await;
            }
        })
    };

    for writer in writers {
        writer.await.expect("writer");
    }
    flusher.await.expect("flusher");
    store.flush().await.expect("final flush");
    assert!(!store.is_dirty());

    let in_memory = store.get_all_states(None).await;
    assert_eq!(in_memory.len(), 200);
    assert!(in_memory.iter().all(|r| r.status == TaskStatus::InProgress));

    let (reopened, report) = TaskStateStore::open_file(&config).await.expect("reopen");
    assert_eq!(report, LoadReport::Loaded { tasks: 200 });
    assert_eq!(reopened.get_all_states(None).await, in_memory);
}
