//! Several named tool servers behind one set of qualified tool names.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::client::McpClient;
use super::config::{McpConfig, McpServerConfig};
use super::tools::{McpTool, McpToolCall, McpToolResult};
use crate::error::{McpError, Result};

/// Manages multiple server connections.
pub struct McpManager {
    /// Connected clients by server name
    clients: RwLock<HashMap<String, Arc<McpClient>>>,

    config: McpConfig,
}

impl McpManager {
    pub fn new(config: McpConfig) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Connect to all enabled servers. Failures are logged and skipped;
    /// returns how many connected.
    pub async fn connect_all(&self) -> usize {
        let mut connected = 0;
        for (name, server_config) in self.config.enabled_servers() {
            match self.connect(name, server_config).await {
                Ok(()) => connected += 1,
                Err(e) => warn!(server = %name, error = %e, "Failed to connect to tool server"),
            }
        }
        connected
    }

    /// Connect to a specific server.
    pub async fn connect(&self, name: &str, config: &McpServerConfig) -> Result<()> {
        let client = McpClient::new(name, config.clone());
        client.connect().await?;
        self.add_client(client).await;
        Ok(())
    }

    /// Register an already-built client, replacing any with the same name.
    pub async fn add_client(&self, client: McpClient) {
        let name = client.name().to_string();
        let previous = self
            .clients
            .write()
            .await
            .insert(name.clone(), Arc::new(client));
        if let Some(previous) = previous {
            if let Err(e) = previous.disconnect().await {
                warn!(server = %name, error = %e, "Error closing replaced tool server");
            }
        }
        info!(server = %name, "Tool server added to manager");
    }

    /// Disconnect from all servers.
    pub async fn disconnect_all(&self) {
        let clients: Vec<_> = self.clients.write().await.drain().collect();
        for (name, client) in clients {
            if let Err(e) = client.disconnect().await {
                warn!(server = %name, error = %e, "Error disconnecting tool server");
            }
        }
    }

    /// Disconnect from a specific server.
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        let client = self.clients.write().await.remove(name);
        match client {
            Some(client) => client.disconnect().await,
            None => Ok(()),
        }
    }

    /// Names of connected servers, sorted.
    pub async fn list_servers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.clients.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn client(&self, name: &str) -> Result<Arc<McpClient>> {
        self.clients
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))
    }

    async fn snapshot(&self) -> Vec<Arc<McpClient>> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Cached tools of every connected server.
    pub async fn list_all_tools(&self) -> Vec<McpTool> {
        let mut all_tools = Vec::new();
        for client in self.snapshot().await {
            all_tools.extend(client.get_tools().await);
        }
        all_tools.sort_by_key(McpTool::qualified_name);
        all_tools
    }

    pub async fn list_tools(&self, server_name: &str) -> Result<Vec<McpTool>> {
        Ok(self.client(server_name).await?.get_tools().await)
    }

    pub async fn refresh_all_tools(&self) {
        for client in self.snapshot().await {
            if let Err(e) = client.refresh_tools().await {
                warn!(server = %client.name(), error = %e, "Failed to refresh tools");
            }
        }
    }

    /// Call a tool by its qualified name, e.g. `files.read_text_file`.
    pub async fn call_tool_by_name(&self, qualified_name: &str, arguments: Value) -> Result<McpToolResult> {
        let call = McpToolCall::from_qualified_name(qualified_name, arguments)
            .ok_or_else(|| McpError::UnknownTool(qualified_name.to_string()))?;
        self.call_tool(&call).await
    }

    pub async fn call_tool(&self, call: &McpToolCall) -> Result<McpToolResult> {
        let client = self.client(&call.server_name).await?;
        client
            .call_tool(&call.tool_name, call.arguments.clone())
            .await
    }

    pub async fn status(&self) -> McpStatus {
        let mut servers = Vec::new();
        for client in self.snapshot().await {
            servers.push(McpServerStatus {
                name: client.name().to_string(),
                connected: client.is_connected().await,
                tool_count: client.get_tools().await.len(),
            });
        }
        servers.sort_by(|a, b| a.name.cmp(&b.name));

        McpStatus {
            enabled: self.config.has_servers(),
            servers,
        }
    }
}

#[derive(Debug, Clone)]
pub struct McpStatus {
    pub enabled: bool,
    pub servers: Vec<McpServerStatus>,
}

#[derive(Debug, Clone)]
pub struct McpServerStatus {
    pub name: String,
    pub connected: bool,
    pub tool_count: usize,
}
