//! Store change events and their fan-out to live subscribers.

use std::sync::{Mutex, MutexGuard};

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::model::Task;

/// Queue length per subscriber unless configured otherwise.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Emitted after a mutation has been written to disk.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    TaskAdded(Task),
    /// Status moved to done
    TaskDone(Task),
    /// Any other status change
    TaskUpdated(Task),
    TaskDeleted { id: String },
}

impl StoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskAdded(_) => "task_added",
            Self::TaskDone(_) => "task_done",
            Self::TaskUpdated(_) => "task_updated",
            Self::TaskDeleted { .. } => "task_deleted",
        }
    }

    /// Payload: the record, or `{id}` for deletes.
    pub fn data(&self) -> Value {
        match self {
            Self::TaskAdded(task) | Self::TaskDone(task) | Self::TaskUpdated(task) => {
                serde_json::to_value(task).unwrap_or(Value::Null)
            }
            Self::TaskDeleted { id } => json!({ "id": id }),
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskAdded(task) | Self::TaskDone(task) | Self::TaskUpdated(task) => &task.id,
            Self::TaskDeleted { id } => id,
        }
    }
}

impl Serialize for StoreEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("StoreEvent", 2)?;
        s.serialize_field("event", self.name())?;
        s.serialize_field("data", &self.data())?;
        s.end()
    }
}

/// Receiving end handed to one listener.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<StoreEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StoreEvent> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out with one bounded queue per subscriber.
///
/// Publishing never waits: a subscriber whose queue is full misses that
/// event (it can resync from a snapshot), and subscribers that went away are
/// dropped from the list.
#[derive(Debug)]
pub struct Broadcaster {
    subscribers: Mutex<Vec<mpsc::Sender<StoreEvent>>>,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::Sender<StoreEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lock().push(tx);
        Subscription { rx }
    }

    /// Deliver `event` to every live subscriber; returns how many got it.
    pub fn publish(&self, event: &StoreEvent) -> usize {
        let mut delivered = 0;
        self.lock().retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(
                    event = event.name(),
                    id = event.task_id(),
                    "Subscriber queue full; event dropped"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deleted(id: &str) -> StoreEvent {
        StoreEvent::TaskDeleted { id: id.to_string() }
    }

    #[test]
    fn test_event_wire_shape() {
        let value = serde_json::to_value(deleted("abc")).unwrap();
        assert_eq!(value, json!({"event": "task_deleted", "data": {"id": "abc"}}));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let hub = Broadcaster::new(2);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        assert_eq!(hub.publish(&deleted("1")), 2);
        assert_eq!(fast.recv().await.unwrap().task_id(), "1");
        assert_eq!(hub.publish(&deleted("2")), 2);
        // `slow` now holds two events; the third only reaches `fast`.
        assert_eq!(hub.publish(&deleted("3")), 1);

        assert_eq!(slow.try_recv().unwrap().task_id(), "1");
        assert_eq!(slow.try_recv().unwrap().task_id(), "2");
        assert!(slow.try_recv().is_none());
        assert_eq!(fast.try_recv().unwrap().task_id(), "2");
        assert_eq!(fast.try_recv().unwrap().task_id(), "3");
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let hub = Broadcaster::default();
        let keep = hub.subscribe();
        drop(hub.subscribe());
        assert_eq!(hub.publish(&deleted("x")), 1);
        assert_eq!(hub.subscriber_count(), 1);
        drop(keep);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
