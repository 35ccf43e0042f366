//! File-backed task store shared safely between concurrent callers and
//! processes, plus the scheduler tool server built on it.
//!
//! Every operation takes the in-process mutex, then the cross-process lock
//! on `<file>.lock`, re-reads the JSON file, applies the change and replaces
//! the file atomically. Nothing read from disk is cached between calls.

mod events;
mod file;
mod lock;
mod model;
mod server;

pub use events::{Broadcaster, DEFAULT_SUBSCRIBER_CAPACITY, StoreEvent, Subscription};
pub use file::TaskStore;
pub use lock::FileLock;
pub use model::{NewTask, Task, TaskStatus, parse_instant};
pub use server::{SchedulerServer, SchedulerTool, routes, serve};

use thiserror::Error;

/// Failures of a store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid task: {0}")]
    Invalid(String),

    #[error("task file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("could not lock task file: {0}")]
    Lock(String),

    #[error("task file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Invalid(_) => "invalid_record",
            Self::Corrupt { .. } => "corrupt",
            Self::Lock(_) => "lock",
            Self::Io(_) => "io",
        }
    }

    /// Lock contention and transient I/O may clear up; bad input and a
    /// corrupt file will not.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Lock(_) | Self::Io(_))
    }
}
