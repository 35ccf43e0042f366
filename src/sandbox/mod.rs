//! Path-sandboxed filesystem server.
//!
//! Every path a caller hands in is resolved to a canonical absolute path
//! (symlinks followed, `..` collapsed) and only then compared against the
//! configured [`AllowedRoots`]. The raw string is never trusted.
//!
//! ```ignore
//! let roots = AllowedRoots::prepare(["./workspace"])?;
//! let sandbox = Sandbox::new(roots);
//! let file = sandbox.read_text_file("notes/todo.md", Some(20), None).await?;
//! ```

mod ops;
mod roots;
mod server;

pub use ops::{
    BatchRead, DirEntry, DirectoryListing, EntryKind, FileContent, FileInfo, MoveOutcome,
    PathOutcome, SEARCH_RESULT_LIMIT, Sandbox, SearchResult,
};
pub use roots::{AllowedRoots, canonicalize_lenient, expand_tilde};
pub use server::{SandboxServer, SandboxTool};

use thiserror::Error;

/// Failures of a sandboxed filesystem operation.
///
/// Out-of-root errors carry the caller's raw input only, so a rejection
/// never discloses where a symlink actually pointed.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("access denied: '{0}' is outside the allowed directories")]
    OutsideRoots(String),

    #[error("access denied: no allowed directories are configured")]
    NoRoots,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SandboxError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OutsideRoots(_) | Self::NoRoots => "sandbox_violation",
            Self::NotFound(_) => "not_found",
            Self::NotADirectory(_) => "not_a_directory",
            Self::IsADirectory(_) => "is_a_directory",
            Self::AlreadyExists(_) => "already_exists",
            Self::InvalidArgument(_) => "invalid_arguments",
            Self::Io { .. } => "io",
        }
    }

    /// Map an I/O failure on `raw` (the caller's spelling of the path).
    pub(crate) fn io(raw: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(raw.to_string()),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(raw.to_string()),
            _ => Self::Io {
                path: raw.to_string(),
                source,
            },
        }
    }
}
