//! Tool invocation facade over one session.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, instrument, warn};

use super::config::{McpServerConfig, TransportConfig};
use super::correlator::Correlator;
use super::message::{CallToolParams, Implementation};
use super::session::{Handshake, Session, SessionTimeouts};
use super::tools::{ListToolsResult, McpTool, McpToolResult};
use super::transport::{HttpTransport, Inbound, StdioTransport, Transport};
use crate::error::{McpError, Result};

/// Upper bound on `tools/list` pages followed in one refresh.
const MAX_TOOL_PAGES: usize = 64;

/// A named connection to one tool server.
///
/// The handshake runs on first use; [`McpClient::connect`] only makes it
/// explicit and fills the tool cache.
pub struct McpClient {
    /// Server name for identification
    name: String,

    /// How to open a fresh session; `None` for injected transports
    config: Option<McpServerConfig>,

    timeouts: SessionTimeouts,

    session: Mutex<Option<Arc<Session>>>,

    /// Cached tools from this server
    tools: RwLock<Vec<McpTool>>,
}

impl McpClient {
    /// Create a new client (not yet connected).
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self {
            name: name.into(),
            timeouts: config.timeouts(),
            config: Some(config),
            session: Mutex::new(None),
            tools: RwLock::new(Vec::new()),
        }
    }

    /// Client over an already-open transport.
    pub fn with_transport(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<Inbound>,
        timeouts: SessionTimeouts,
    ) -> Self {
        let session = Session::new(
            Correlator::new(transport, inbound),
            Implementation::this_crate(),
            timeouts,
        );
        Self {
            name: name.into(),
            config: None,
            timeouts,
            session: Mutex::new(Some(Arc::new(session))),
            tools: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, config: &McpServerConfig) -> Result<Session> {
        let (transport, inbound): (Arc<dyn Transport>, _) = match &config.transport {
            TransportConfig::Stdio { .. } => {
                let launch = config
                    .stdio_config()
                    .ok_or_else(|| McpError::Spawn("not a stdio server".to_string()))?;
                let (transport, inbound) = StdioTransport::spawn(launch)?;
                (Arc::new(transport), inbound)
            }
            TransportConfig::Http { urls } => {
                let (transport, inbound) = HttpTransport::new(urls, self.timeouts.request)?;
                (Arc::new(transport), inbound)
            }
        };
        Ok(Session::new(
            Correlator::new(transport, inbound),
            Implementation::this_crate(),
            self.timeouts,
        ))
    }

    /// The current session, opened and initialized if needed.
    async fn session(&self) -> Result<Arc<Session>> {
        let session = {
            let mut slot = self.session.lock().await;
            match slot.as_ref() {
                Some(session) => Arc::clone(session),
                None => {
                    let config = self.config.as_ref().ok_or(McpError::Closed)?;
                    debug!(server = %self.name, transport = config.transport.kind(), "Opening session");
                    let session = Arc::new(self.open(config)?);
                    *slot = Some(Arc::clone(&session));
                    session
                }
            }
        };
        session.initialize().await?;
        Ok(session)
    }

    /// Open the session, run the handshake and load the tool list.
    #[instrument(skip(self), fields(server = %self.name))]
    pub async fn connect(&self) -> Result<Handshake> {
        info!("Connecting to tool server");
        let session = match self.session().await {
            Ok(session) => session,
            Err(e) => {
                // A failed session is never reused; drop it so a later
                // connect starts from scratch.
                if let Some(session) = self.session.lock().await.take() {
                    let _ = session.close().await;
                }
                return Err(e);
            }
        };

        self.refresh_tools().await?;
        let handshake = session.handshake().ok_or(McpError::NotInitialized)?;
        info!(tools = self.tools.read().await.len(), "Tool server connected");
        Ok(handshake)
    }

    /// Check if connected.
    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|session| session.is_active())
    }

    pub async fn handshake(&self) -> Option<Handshake> {
        self.session.lock().await.as_ref()?.handshake()
    }

    /// HTTP session id or child pid of the live session.
    pub async fn transport_token(&self) -> Option<String> {
        self.session.lock().await.as_ref()?.transport_token()
    }

    /// Close the session; the next call opens a new one.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await?;
            info!(server = %self.name, "Tool server disconnected");
        }
        Ok(())
    }

    /// Fetch every page of `tools/list`.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let session = self.session().await?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult = serde_json::from_value(session.request("tools/list", params).await?)
                .map_err(|e| McpError::Protocol(format!("bad tools/list result: {}", e)))?;
            tools.extend(
                page.tools
                    .into_iter()
                    .map(|descriptor| McpTool::from_descriptor(&self.name, descriptor)),
            );
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        warn!(server = %self.name, pages = MAX_TOOL_PAGES, "tools/list kept paginating; truncating");
        Ok(tools)
    }

    /// Refresh the list of available tools.
    pub async fn refresh_tools(&self) -> Result<Vec<McpTool>> {
        let tools = self.list_tools().await?;
        debug!(server = %self.name, count = tools.len(), "Refreshed tools");
        *self.tools.write().await = tools.clone();
        Ok(tools)
    }

    /// Get cached tools.
    pub async fn get_tools(&self) -> Vec<McpTool> {
        self.tools.read().await.clone()
    }

    /// Call a tool on this server.
    ///
    /// Tool-level failures come back as `Ok` with `is_error` set; `Err`
    /// means the call itself did not complete.
    #[instrument(skip(self, arguments), fields(server = %self.name))]
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<McpToolResult> {
        let arguments = match arguments {
            Value::Object(_) => Some(arguments),
            Value::Null => None,
            other => {
                return Err(McpError::InvalidArguments(format!(
                    "arguments must be an object, got {}",
                    other
                )));
            }
        };

        let session = self.session().await?;
        let params = CallToolParams {
            name: tool_name.to_string(),
            arguments,
        };
        let value = session
            .request("tools/call", Some(serde_json::to_value(params)?))
            .await?;
        let result = McpToolResult::from_value(value)?;
        if result.is_error {
            debug!(kind = result.error_kind().unwrap_or("unknown"), "Tool reported an error");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::correlator::tests::MockTransport;
    use crate::mcp::message::{Message, PROTOCOL_VERSION};
    use crate::server::{ToolServer, handle_message, tests::EchoServer};
    use std::time::Duration;

    /// Client wired to an in-process [`EchoServer`].
    fn echo_client() -> McpClient {
        let (outbox, mut sent) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let server = EchoServer;
            while let Some(message) = sent.recv().await {
                if let Some(reply) = handle_message(&server, message).await {
                    if inbound_tx.send(Inbound::Message(reply)).await.is_err() {
                        break;
                    }
                }
            }
        });
        let timeouts = SessionTimeouts {
            request: Duration::from_secs(5),
            startup: Duration::from_secs(5),
            shutdown: Duration::from_millis(200),
        };
        McpClient::with_transport("echo", Arc::new(MockTransport::new(outbox)), inbound_rx, timeouts)
    }

    #[tokio::test]
    async fn test_connect_lists_tools() {
        let client = echo_client();
        let handshake = client.connect().await.unwrap();
        assert_eq!(handshake.protocol_version, PROTOCOL_VERSION);
        assert!(client.is_connected().await);

        let tools = client.get_tools().await;
        assert_eq!(tools.len(), EchoServer.tools().len());
        assert!(tools.iter().all(|t| t.server_name == "echo"));
    }

    #[tokio::test]
    async fn test_call_tool_runs_handshake_implicitly() {
        let client = echo_client();
        let result = client
            .call_tool("echo", json!({"text": "hello"}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.to_text().contains("hello"));
    }

    #[tokio::test]
    async fn test_non_object_arguments_are_rejected_locally() {
        let client = echo_client();
        assert!(matches!(
            client.call_tool("echo", json!([1, 2])).await,
            Err(McpError::InvalidArguments(_))
        ));
        // Nothing was sent, so no session was started.
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_disconnected_injected_client_stays_closed() {
        let client = echo_client();
        client.connect().await.unwrap();
        client.disconnect().await.unwrap();
        assert!(!client.is_connected().await);
        assert!(matches!(client.list_tools().await, Err(McpError::Closed)));
    }
}
