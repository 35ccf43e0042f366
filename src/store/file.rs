use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::StoreError;
use super::events::{Broadcaster, StoreEvent, Subscription};
use super::lock::FileLock;
use super::model::{NewTask, Task, TaskStatus};
use crate::fsutil;

/// Task list persisted as one JSON array.
#[derive(Debug)]
pub struct TaskStore {
    path: PathBuf,
    lock_path: PathBuf,
    /// Serialises callers inside this process before they queue on the file lock.
    guard: Mutex<()>,
    events: Broadcaster,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_events(path, Broadcaster::default())
    }

    pub fn with_events(path: impl Into<PathBuf>, events: Broadcaster) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            guard: Mutex::new(()),
            events,
        }
    }

    /// Create the parent directory and an empty task file if missing.
    pub async fn open(path: impl Into<PathBuf>, subscriber_capacity: usize) -> Result<Self, StoreError> {
        let store = Self::with_events(path, Broadcaster::new(subscriber_capacity));
        if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let _guard = store.guard.lock().await;
        let path = store.path.clone();
        let lock_path = store.lock_path.clone();
        let count = tokio::task::spawn_blocking(move || {
            let _lock = FileLock::acquire(&lock_path)?;
            if !path.exists() {
                fsutil::write_atomic(&path, b"[]")?;
            }
            read_tasks(&path).map(|tasks| tasks.len())
        })
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))??;
        drop(_guard);

        info!(path = %store.path.display(), tasks = count, "Task store ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Live listeners, after pruning closed ones.
    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    /// Run `apply` against a fresh read of the file while holding both
    /// locks. The file is rewritten only when `apply` returns an event, and
    /// that event is published before the in-process guard is released, so
    /// listeners see changes in commit order.
    async fn locked<T, F>(&self, apply: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Vec<Task>) -> Result<(T, Option<StoreEvent>), StoreError>
            + Send
            + 'static,
    {
        let _guard = self.guard.lock().await;
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();

        let (out, event) = tokio::task::spawn_blocking(move || {
            let _lock = FileLock::acquire(&lock_path)?;
            let mut tasks = read_tasks(&path)?;
            let (out, event) = apply(&mut tasks)?;
            if event.is_some() {
                write_tasks(&path, &tasks)?;
            }
            Ok::<_, StoreError>((out, event))
        })
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))??;

        if let Some(event) = event {
            debug!(event = event.name(), id = event.task_id(), "Task file updated");
            self.events.publish(&event);
        }
        Ok(out)
    }

    #[instrument(skip(self, new), fields(path = %self.path.display()))]
    pub async fn create(&self, new: NewTask) -> Result<Task, StoreError> {
        let task = new.into_task()?;
        let stored = task.clone();
        self.locked(move |tasks| {
            tasks.push(stored.clone());
            Ok(((), Some(StoreEvent::TaskAdded(stored))))
        })
        .await?;
        Ok(task)
    }

    pub async fn list(&self) -> Result<Vec<Task>, StoreError> {
        self.locked(|tasks| Ok((std::mem::take(tasks), None))).await
    }

    pub async fn get(&self, id: &str) -> Result<Task, StoreError> {
        let id = id.to_string();
        self.locked(move |tasks| {
            tasks
                .iter()
                .find(|t| t.id == id)
                .cloned()
                .map(|t| (t, None))
                .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    /// Change a task's status. Setting the status it already has is a no-op
    /// that neither rewrites the file nor emits an event.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn set_status(&self, id: &str, status: TaskStatus) -> Result<Task, StoreError> {
        let id = id.to_string();
        self.locked(move |tasks| {
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(StoreError::NotFound(id))?;
            if task.status == status {
                return Ok((task.clone(), None));
            }
            task.status = status;
            let event = match status {
                TaskStatus::Done => StoreEvent::TaskDone(task.clone()),
                TaskStatus::Pending => StoreEvent::TaskUpdated(task.clone()),
            };
            Ok((task.clone(), Some(event)))
        })
        .await
    }

    pub async fn complete(&self, id: &str) -> Result<Task, StoreError> {
        self.set_status(id, TaskStatus::Done).await
    }

    /// Remove a task. Deleting an unknown id succeeds and returns `false`.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let target = id.to_string();
        self.locked(move |tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != target);
            if tasks.len() == before {
                return Ok((false, None));
            }
            Ok((true, Some(StoreEvent::TaskDeleted { id: target })))
        })
        .await
    }
}

fn read_tasks(path: &Path) -> Result<Vec<Task>, StoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.display().to_string(),
        reason,
    };
    let tasks: Vec<Task> = serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))?;
    for task in &tasks {
        task.validate()
            .map_err(|e| corrupt(format!("task {}: {}", task.id, e)))?;
    }
    Ok(tasks)
}

fn write_tasks(path: &Path, tasks: &[Task]) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(tasks).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    fsutil::write_atomic(path, &bytes)?;
    Ok(())
}
