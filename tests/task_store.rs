//! Integration tests for the file-backed task store.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tempfile::TempDir;
use toolrelay::store::{NewTask, StoreError, StoreEvent, Task, TaskStatus, TaskStore};

const WHEN: &str = "2026-05-01T08:00:00+02:00";

fn on_disk(store: &TaskStore) -> Vec<Task> {
    let raw = fs::read_to_string(store.path()).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn test_two_stores_on_one_file_lose_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.json");
    // Two independent handles only share the file and its lock.
    let a = Arc::new(TaskStore::new(&path));
    let b = Arc::new(TaskStore::new(&path));

    let writes = (0..40).map(|i| {
        let store = if i % 2 == 0 { Arc::clone(&a) } else { Arc::clone(&b) };
        async move {
            store
                .create(NewTask::new(format!("task {}", i), WHEN))
                .await
                .unwrap()
        }
    });
    let created = join_all(writes).await;

    let tasks = a.list().await.unwrap();
    assert_eq!(tasks.len(), 40);
    let ids: HashSet<_> = tasks.iter().map(|t| t.id.clone()).collect();
    assert_eq!(ids.len(), 40);
    assert!(created.iter().all(|t| ids.contains(&t.id)));
    assert_eq!(on_disk(&b).len(), 40);
}

#[tokio::test]
async fn test_delete_is_idempotent_and_leaves_file_alone() {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::new(dir.path().join("tasks.json"));
    let keep = store.create(NewTask::new("keep", WHEN)).await.unwrap();
    let drop_me = store.create(NewTask::new("drop", WHEN)).await.unwrap();

    assert!(store.delete(&drop_me.id).await.unwrap());
    let after_first = fs::read(store.path()).unwrap();

    assert!(!store.delete(&drop_me.id).await.unwrap());
    assert!(!store.delete("never-existed").await.unwrap());
    assert_eq!(fs::read(store.path()).unwrap(), after_first);

    assert_eq!(on_disk(&store), vec![keep]);
}

#[tokio::test]
async fn test_leftover_temp_file_is_ignored() {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::open(dir.path().join("tasks.json"), 8).await.unwrap();
    let first = store.create(NewTask::new("before crash", WHEN)).await.unwrap();

    // What a writer killed between write and rename leaves behind.
    fs::write(dir.path().join(".tasks.json.deadbeef.tmp"), "[{\"id\": tru").unwrap();

    let tasks = store.list().await.unwrap();
    assert_eq!(tasks, vec![first.clone()]);

    store.create(NewTask::new("after crash", WHEN)).await.unwrap();
    let tasks = on_disk(&store);
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0], first);
}

#[tokio::test]
async fn test_every_snapshot_is_a_complete_array() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TaskStore::new(dir.path().join("tasks.json")));
    store.create(NewTask::new("seed", WHEN)).await.unwrap();

    let path = store.path().to_path_buf();
    let reader = tokio::spawn(async move {
        for _ in 0..200 {
            let raw = tokio::fs::read_to_string(&path).await.unwrap();
            let parsed: Value = serde_json::from_str(&raw).unwrap();
            assert!(parsed.is_array());
            tokio::task::yield_now().await;
        }
    });

    for i in 0..30 {
        let task = store
            .create(NewTask::new(format!("churn {}", i), WHEN))
            .await
            .unwrap();
        store.complete(&task.id).await.unwrap();
    }
    reader.await.unwrap();
}

#[tokio::test]
async fn test_corrupt_file_is_not_overwritten() {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::new(dir.path().join("tasks.json"));
    fs::write(store.path(), "not json").unwrap();

    let err = store.create(NewTask::new("x", WHEN)).await.unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));
    assert_eq!(fs::read_to_string(store.path()).unwrap(), "not json");
}

#[tokio::test]
async fn test_bad_input_is_rejected_before_io() {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::new(dir.path().join("tasks.json"));

    for (text, when) in [("   ", WHEN), ("x", "tomorrow"), ("x", "2026-05-01T08:00:00")] {
        assert!(matches!(
            store.create(NewTask::new(text, when)).await,
            Err(StoreError::Invalid(_))
        ));
    }
    assert!(!store.path().exists());
}

// ── Events ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_events_follow_mutations() {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::new(dir.path().join("tasks.json"));
    let mut events = store.subscribe();

    let task = store.create(NewTask::new("call mom", WHEN)).await.unwrap();
    store.set_status(&task.id, TaskStatus::Done).await.unwrap();
    store.set_status(&task.id, TaskStatus::Pending).await.unwrap();
    store.delete(&task.id).await.unwrap();

    let mut seen = Vec::new();
    while let Some(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.len(), 4);
    assert!(matches!(&seen[0], StoreEvent::TaskAdded(t) if t.id == task.id));
    assert!(matches!(&seen[1], StoreEvent::TaskDone(t) if t.status == TaskStatus::Done));
    assert!(matches!(&seen[2], StoreEvent::TaskUpdated(t) if t.status == TaskStatus::Pending));
    assert_eq!(
        serde_json::to_value(&seen[3]).unwrap(),
        serde_json::json!({"event": "task_deleted", "data": {"id": task.id}})
    );
}

#[tokio::test]
async fn test_slow_subscriber_never_blocks_writers() {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::open(dir.path().join("tasks.json"), 1).await.unwrap();
    let mut slow = store.subscribe();

    for i in 0..5 {
        store
            .create(NewTask::new(format!("t{}", i), WHEN))
            .await
            .unwrap();
    }

    // Only the first event fit in the queue; the rest were dropped for it.
    assert!(matches!(slow.try_recv(), Some(StoreEvent::TaskAdded(t)) if t.text == "t0"));
    assert!(slow.try_recv().is_none());
    assert_eq!(store.list().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_status_events_follow_commit_order() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(TaskStore::open(dir.path().join("tasks.json"), 256).await.unwrap());
    let task = store.create(NewTask::new("toggle", WHEN)).await.unwrap();
    let mut events = store.subscribe();

    let toggles = (0..60).map(|i| {
        let store = Arc::clone(&store);
        let id = task.id.clone();
        let status = if i % 2 == 0 { TaskStatus::Done } else { TaskStatus::Pending };
        async move { store.set_status(&id, status).await.unwrap() }
    });
    join_all(toggles).await;

    let mut statuses = Vec::new();
    while let Some(event) = events.try_recv() {
        match event {
            StoreEvent::TaskDone(t) | StoreEvent::TaskUpdated(t) => statuses.push(t.status),
            other => panic!("unexpected {:?}", other),
        }
    }

    // Every event is a real transition from the one before it.
    let mut previous = TaskStatus::Pending;
    for status in &statuses {
        assert_ne!(*status, previous);
        previous = *status;
    }
    assert_eq!(previous, store.get(&task.id).await.unwrap().status);
}
