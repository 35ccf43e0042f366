//! Child process speaking newline-delimited JSON over stdin/stdout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use super::{INBOUND_CAPACITY, Inbound, Transport};
use crate::error::{McpError, Result};
use crate::mcp::message::Message;

/// Grace period between closing stdin and killing the child.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How to launch the server process.
#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub shutdown_grace: Duration,
}

impl StdioConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

pub struct StdioTransport {
    label: String,
    pid: Option<u32>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    grace: Duration,
}

impl StdioTransport {
    /// Start the child and its reader tasks.
    pub fn spawn(config: StdioConfig) -> Result<(Self, mpsc::Receiver<Inbound>)> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::Spawn(format!("{}: {}", config.command, e)))?;
        let pid = child.id();
        let label = match pid {
            Some(pid) => format!("stdio:{}[{}]", config.command, pid),
            None => format!("stdio:{}", config.command),
        };

        let missing = |stream: &str| McpError::Spawn(format!("{}: no {} pipe", config.command, stream));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        tokio::spawn(read_stdout(label.clone(), stdout, tx));
        tokio::spawn(drain_stderr(label.clone(), stderr));

        info!(transport = %label, args = ?config.args, "Spawned tool server");
        Ok((
            Self {
                label,
                pid,
                stdin: Mutex::new(Some(stdin)),
                child: Mutex::new(Some(child)),
                grace: config.shutdown_grace,
            },
            rx,
        ))
    }
}

/// Forward each JSON line from the child's stdout. Ends with `Closed`.
async fn read_stdout<R>(label: String, stdout: R, tx: mpsc::Sender<Inbound>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Message>(line) {
                    Ok(message) => {
                        if tx.send(Inbound::Message(message)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => debug!(transport = %label, error = %e, line, "Skipping non-protocol stdout line"),
                }
            }
            Ok(None) => break "process terminated".to_string(),
            Err(e) => break format!("stdout read failed: {}", e),
        }
    };
    debug!(transport = %label, %reason, "Stdout closed");
    let _ = tx.send(Inbound::Closed(reason)).await;
}

async fn drain_stderr<R>(label: String, stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(transport = %label, "stderr: {}", line);
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: Message) -> Result<()> {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(McpError::Closed)?;
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        written.map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => McpError::ProcessTerminated(e.to_string()),
            _ => McpError::Transport(e.to_string()),
        })
    }

    async fn close(&self) -> Result<()> {
        // Dropping stdin is the polite stop signal.
        drop(self.stdin.lock().await.take());

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(transport = %self.label, %status, "Tool server exited");
            }
            Ok(Err(e)) => {
                warn!(transport = %self.label, error = %e, "Waiting for tool server failed");
            }
            Err(_) => {
                warn!(
                    transport = %self.label,
                    grace_ms = self.grace.as_millis() as u64,
                    "Tool server ignored shutdown; killing"
                );
                child
                    .kill()
                    .await
                    .map_err(|e| McpError::Transport(format!("kill failed: {}", e)))?;
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn session_token(&self) -> Option<String> {
        self.pid.map(|pid| format!("pid:{}", pid))
    }
}
