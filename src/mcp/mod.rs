//! Client side of the tool protocol (MCP-compatible JSON-RPC 2.0).
//!
//! This module provides connectivity to tool servers:
//! - Transports over a child process (stdio) or HTTP with event-stream replies
//! - Request correlation with per-call deadlines
//! - Session handshake and lifecycle
//! - Tool discovery and invocation across several named servers
//!
//! # Configuration
//!
//! Servers are configured in `toolrelay.toml`:
//!
//! ```toml
//! [servers.files]
//! transport = "stdio"
//! command = "toolrelay"
//! args = ["sandbox", "/srv/data"]
//!
//! [servers.scheduler]
//! transport = "http"
//! urls = ["http://scheduler:8000/mcp", "http://127.0.0.1:8000/mcp"]
//! timeout_secs = 10
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use toolrelay::mcp::McpManager;
//!
//! let manager = McpManager::new(config.mcp());
//! manager.connect_all().await;
//!
//! let tools = manager.list_all_tools().await;
//! let result = manager
//!     .call_tool_by_name("files.read_text_file", json!({"path": "notes.md"}))
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod correlator;
pub mod manager;
pub mod message;
pub mod session;
pub mod sse;
pub mod tools;
pub mod transport;

pub use client::McpClient;
pub use config::{McpConfig, McpServerConfig, TransportConfig};
pub use correlator::Correlator;
pub use manager::{McpManager, McpServerStatus, McpStatus};
pub use message::{Message, PROTOCOL_VERSION, RequestId, RpcError};
pub use session::{Handshake, Session, SessionState, SessionTimeouts};
pub use tools::{McpContent, McpTool, McpToolCall, McpToolResult, ToolDescriptor};
pub use transport::{HttpTransport, Inbound, StdioConfig, StdioTransport, Transport};
