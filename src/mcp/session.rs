//! Handshake and lifecycle of one connection to a tool server.

use std::sync::{RwLock, RwLockReadGuard};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::correlator::Correlator;
use super::message::{Implementation, InitializeParams, InitializeResult, PROTOCOL_VERSION};
use crate::error::{McpError, Result};

/// Deadlines applied by a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Any request after the handshake
    pub request: Duration,
    /// The `initialize` exchange
    pub startup: Duration,
    /// The best-effort `shutdown` request on close
    pub shutdown: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            startup: Duration::from_secs(30),
            shutdown: Duration::from_secs(2),
        }
    }
}

/// What the server told us during the handshake. Fixed for the life of the
/// session.
#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    pub protocol_version: String,
    pub capabilities: Value,
    pub server_info: Implementation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Active(Handshake),
    /// Handshake failed; the session is never retried.
    Failed(String),
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Active(_) => "active",
            Self::Failed(_) => "failed",
            Self::Closed => "closed",
        }
    }
}

pub struct Session {
    correlator: Correlator,
    client_info: Implementation,
    timeouts: SessionTimeouts,
    state: RwLock<SessionState>,
    /// Held for the whole handshake so concurrent callers wait for one.
    gate: Mutex<()>,
}

impl Session {
    pub fn new(correlator: Correlator, client_info: Implementation, timeouts: SessionTimeouts) -> Self {
        Self {
            correlator,
            client_info,
            timeouts,
            state: RwLock::new(SessionState::Uninitialized),
            gate: Mutex::new(()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    pub fn state(&self) -> SessionState {
        self.read_state().clone()
    }

    pub fn handshake(&self) -> Option<Handshake> {
        match &*self.read_state() {
            SessionState::Active(handshake) => Some(handshake.clone()),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.read_state(), SessionState::Active(_))
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        self.timeouts
    }

    /// HTTP session id or child pid, whichever the transport has.
    pub fn transport_token(&self) -> Option<String> {
        self.correlator.transport().session_token()
    }

    /// `Some` when the state already decides the outcome of `initialize`.
    fn settled(&self) -> Option<Result<Handshake>> {
        match &*self.read_state() {
            SessionState::Active(handshake) => Some(Ok(handshake.clone())),
            SessionState::Failed(reason) => Some(Err(McpError::SessionUnusable(reason.clone()))),
            SessionState::Closed => Some(Err(McpError::Closed)),
            SessionState::Uninitialized | SessionState::Initializing => None,
        }
    }

    /// Run the handshake once. Later and concurrent calls get the same
    /// outcome without talking to the server again.
    #[instrument(skip(self), fields(transport = %self.correlator.transport().describe()))]
    pub async fn initialize(&self) -> Result<Handshake> {
        if let Some(outcome) = self.settled() {
            return outcome;
        }
        let _gate = self.gate.lock().await;
        if let Some(outcome) = self.settled() {
            return outcome;
        }

        self.set_state(SessionState::Initializing);
        match self.perform_handshake().await {
            Ok(handshake) => {
                info!(
                    server = %handshake.server_info.name,
                    version = %handshake.server_info.version,
                    protocol = %handshake.protocol_version,
                    "Session established"
                );
                self.set_state(SessionState::Active(handshake.clone()));
                Ok(handshake)
            }
            Err(e) => {
                warn!(error = %e, "Handshake failed");
                let reason = e.to_string();
                self.set_state(SessionState::Failed(reason.clone()));
                Err(McpError::HandshakeFailed(reason))
            }
        }
    }

    async fn perform_handshake(&self) -> Result<Handshake> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: self.client_info.clone(),
        };
        let reply = self
            .correlator
            .call("initialize", Some(serde_json::to_value(params)?), self.timeouts.startup)
            .await?;
        let result: InitializeResult = serde_json::from_value(reply)
            .map_err(|e| McpError::Protocol(format!("bad initialize result: {}", e)))?;

        if result.protocol_version != PROTOCOL_VERSION {
            debug!(
                offered = PROTOCOL_VERSION,
                accepted = %result.protocol_version,
                "Server negotiated a different protocol version"
            );
        }

        self.correlator
            .notify("notifications/initialized", None)
            .await?;

        Ok(Handshake {
            protocol_version: result.protocol_version,
            capabilities: result.capabilities,
            server_info: result.server_info,
        })
    }

    fn ensure_active(&self) -> Result<()> {
        match &*self.read_state() {
            SessionState::Active(_) => Ok(()),
            SessionState::Failed(reason) => Err(McpError::SessionUnusable(reason.clone())),
            SessionState::Closed => Err(McpError::Closed),
            SessionState::Uninitialized | SessionState::Initializing => Err(McpError::NotInitialized),
        }
    }

    /// Send a request on an established session.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.ensure_active()?;
        self.correlator
            .call(method, params, self.timeouts.request)
            .await
    }

    /// Ask the server to shut down, then close the transport. Bounded by the
    /// shutdown timeout plus the transport's own grace period.
    pub async fn close(&self) -> Result<()> {
        let previous = std::mem::replace(
            &mut *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()),
            SessionState::Closed,
        );
        if previous == SessionState::Closed {
            return Ok(());
        }

        if matches!(previous, SessionState::Active(_)) {
            if let Err(e) = self
                .correlator
                .call("shutdown", None, self.timeouts.shutdown)
                .await
            {
                debug!(error = %e, "Shutdown request not acknowledged");
            }
        }
        self.correlator.close().await
    }
}
