//! Error taxonomy shared by the protocol client, the tool servers and the
//! task store.
//!
//! Every error carries a machine-checkable [`McpError::kind`] and a
//! [`McpError::retryable`] flag so callers can tell "try again later"
//! (transport trouble, timeouts) apart from "fix the input first"
//! (sandbox violations, unknown records, malformed arguments).

use serde_json::Value;
use thiserror::Error;

use crate::sandbox::SandboxError;
use crate::store::StoreError;

/// Crate-wide result alias.
pub type Result<T, E = McpError> = std::result::Result<T, E>;

/// JSON-RPC error codes used on the wire.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const SERVER_ERROR: i64 = -32000;
    pub const SANDBOX_VIOLATION: i64 = -32001;
    pub const NOT_INITIALIZED: i64 = -32002;
    pub const NOT_FOUND: i64 = -32004;
}

/// Errors surfaced by the protocol layer and its servers.
#[derive(Debug, Error)]
pub enum McpError {
    // ── Protocol ────────────────────────────────────────────────────────────
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("session is not initialized")]
    NotInitialized,

    #[error("session is unusable after a failed handshake: {0}")]
    SessionUnusable(String),

    #[error("server returned error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    // ── Transport ───────────────────────────────────────────────────────────
    #[error("transport error: {0}")]
    Transport(String),

    #[error("all endpoints failed: {}", .endpoints.join("; "))]
    AllEndpointsFailed { endpoints: Vec<String> },

    #[error("failed to spawn server process: {0}")]
    Spawn(String),

    #[error("process terminated: {0}")]
    ProcessTerminated(String),

    #[error("request '{method}' timed out after {timeout_ms} ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("session closed")]
    Closed,

    // ── Tool dispatch ───────────────────────────────────────────────────────
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("tool server '{0}' is not connected")]
    UnknownServer(String),

    // ── Server-side domains ─────────────────────────────────────────────────
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl McpError {
    /// Stable identifier for the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Decode(_) => "decode",
            Self::HandshakeFailed(_) => "handshake_failed",
            Self::NotInitialized => "not_initialized",
            Self::SessionUnusable(_) => "session_unusable",
            Self::Rpc { .. } => "rpc",
            Self::Transport(_) => "transport",
            Self::AllEndpointsFailed { .. } => "all_endpoints_failed",
            Self::Spawn(_) => "spawn",
            Self::ProcessTerminated(_) => "process_terminated",
            Self::Timeout { .. } => "timeout",
            Self::Closed => "closed",
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::UnknownServer(_) => "unknown_server",
            Self::Sandbox(e) => e.kind(),
            Self::Store(e) => e.kind(),
        }
    }

    /// Whether repeating the same call unchanged may succeed.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::AllEndpointsFailed { .. }
                | Self::ProcessTerminated(_)
                | Self::Timeout { .. }
                | Self::Closed
        ) || matches!(self, Self::Store(e) if e.retryable())
    }

    /// JSON-RPC code used when this error is reported to a remote caller.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Rpc { code, .. } => *code,
            Self::Decode(_) => codes::PARSE_ERROR,
            Self::Protocol(_) => codes::INVALID_REQUEST,
            Self::NotInitialized | Self::SessionUnusable(_) => codes::NOT_INITIALIZED,
            Self::UnknownTool(_) | Self::InvalidArguments(_) => codes::INVALID_PARAMS,
            Self::Sandbox(SandboxError::NotFound(_)) => codes::NOT_FOUND,
            Self::Sandbox(_) => codes::SANDBOX_VIOLATION,
            Self::Store(StoreError::NotFound(_)) => codes::NOT_FOUND,
            Self::Store(StoreError::Invalid(_)) => codes::INVALID_PARAMS,
            _ => codes::SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
