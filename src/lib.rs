//! Tool-invocation protocol plumbing.
//!
//! - [`mcp`]: client side; transports, correlation, sessions, tool calls
//! - [`server`]: serving any [`server::ToolServer`] over stdio or HTTP
//! - [`sandbox`]: filesystem tools confined to a set of allowed roots
//! - [`store`]: file-backed task list with locking and change events

pub mod config;
pub mod error;
pub mod fsutil;
pub mod logging;
pub mod mcp;
pub mod sandbox;
pub mod server;
pub mod store;

pub use error::{McpError, Result};
pub use mcp::{McpClient, McpManager};
