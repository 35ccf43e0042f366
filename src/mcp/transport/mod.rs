//! Byte-level carriers for protocol messages.
//!
//! A transport only moves [`Message`]s. Outbound traffic goes through
//! [`Transport::send`]; inbound traffic (replies, server notifications and
//! the final close) is pushed into the [`Inbound`] channel returned by the
//! transport's constructor, which the correlator drains.

pub mod http;
pub mod stdio;

use async_trait::async_trait;

use super::message::Message;
use crate::error::Result;

pub use http::HttpTransport;
pub use stdio::{StdioConfig, StdioTransport};

/// Bound of the inbound queue between a transport and its correlator.
pub const INBOUND_CAPACITY: usize = 256;

/// What a transport hands to the correlator.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Message),
    /// The peer is gone; nothing more will arrive.
    Closed(String),
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver one message to the peer.
    async fn send(&self, message: Message) -> Result<()>;

    /// Release the underlying channel. Must not block indefinitely and must
    /// be safe to call more than once.
    async fn close(&self) -> Result<()>;

    /// Short human-readable label for logs.
    fn describe(&self) -> String;

    /// Session token negotiated by the transport, if any.
    fn session_token(&self) -> Option<String> {
        None
    }
}
