//! Tool server connection settings.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::session::SessionTimeouts;
use super::transport::StdioConfig;

/// How to reach a server. Each transport has its own settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Spawn a child process and talk over its stdin/stdout.
    Stdio {
        /// Command to run (e.g. "toolrelay", "uvx", "/path/to/binary")
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    /// POST to the first endpoint that answers.
    Http { urls: Vec<String> },
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
        }
    }
}

/// Configuration for one tool server connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(flatten)]
    pub transport: TransportConfig,

    /// Whether this server is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Timeout for tool calls in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Timeout for the handshake in seconds
    #[serde(default = "default_timeout")]
    pub startup_timeout_secs: u64,

    /// How long to wait for a clean exit before killing
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    2
}

impl McpServerConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            enabled: true,
            timeout_secs: default_timeout(),
            startup_timeout_secs: default_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }

    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(TransportConfig::Stdio {
            command: command.into(),
            args,
            env: HashMap::new(),
            cwd: None,
        })
    }

    pub fn http(urls: Vec<String>) -> Self {
        Self::new(TransportConfig::Http { urls })
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            request: Duration::from_secs(self.timeout_secs),
            startup: Duration::from_secs(self.startup_timeout_secs),
            shutdown: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    /// Launch settings, for stdio servers.
    pub fn stdio_config(&self) -> Option<StdioConfig> {
        match &self.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let mut config = StdioConfig::new(command.as_str())
                    .args(args.iter().map(String::as_str))
                    .shutdown_grace(Duration::from_secs(self.shutdown_timeout_secs));
                config.env = env.clone();
                config.cwd = cwd.clone();
                Some(config)
            }
            TransportConfig::Http { .. } => None,
        }
    }
}

/// Named server connections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

impl McpConfig {
    /// Get enabled servers only
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &McpServerConfig)> {
        self.servers.iter().filter(|(_, cfg)| cfg.enabled)
    }

    pub fn has_servers(&self) -> bool {
        !self.servers.is_empty()
    }
}
