use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::mcp::{McpConfig, McpServerConfig};
use crate::store::DEFAULT_SUBSCRIBER_CAPACITY;

/// File name looked up when no `--config` is given.
pub const CONFIG_FILE: &str = "toolrelay.toml";

/// Everything `toolrelay.toml` can hold. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Tool servers the client side connects to
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Allowed roots; the first one is where relative paths land
    #[serde(default)]
    pub roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_tasks_file")]
    pub tasks_file: PathBuf,
    /// Queue length per `/sse` listener
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_tasks_file() -> PathBuf {
    PathBuf::from("data").join("tasks.json")
}

fn default_subscriber_capacity() -> usize {
    DEFAULT_SUBSCRIBER_CAPACITY
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            tasks_file: default_tasks_file(),
            subscriber_capacity: default_subscriber_capacity(),
        }
    }
}

impl Config {
    /// Load from `path`, or from `./toolrelay.toml` then
    /// `~/.config/toolrelay/toolrelay.toml`. No file at all means defaults;
    /// an explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_paths().into_iter().find(|p| p.is_file()),
        };

        match config_path {
            Some(p) => {
                let content = std::fs::read_to_string(&p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Invalid config file {}", p.display()))
            }
            None => Ok(Config::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("toolrelay").join(CONFIG_FILE));
        }
        paths
    }

    /// The server table in the shape [`crate::mcp::McpManager`] takes.
    pub fn mcp(&self) -> McpConfig {
        McpConfig {
            servers: self.servers.clone(),
        }
    }
}
