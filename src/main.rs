use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use toolrelay::config::Config;
use toolrelay::logging::{self, LogConfig};
use toolrelay::mcp::{McpClient, McpServerConfig};
use toolrelay::sandbox::{AllowedRoots, Sandbox, SandboxServer};
use toolrelay::server::stdio::serve_stdio;
use toolrelay::store::{self, TaskStore};
use tracing::info;

// ── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "toolrelay",
    version,
    about = "Tool protocol client, sandboxed filesystem server and task scheduler server"
)]
struct Cli {
    /// Config file (default: ./toolrelay.toml, then the user config dir)
    #[arg(long, short, global = true, env = "TOOLRELAY_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Debug logging for toolrelay itself
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the sandboxed filesystem tools on stdin/stdout
    Sandbox {
        /// Allowed directories; the first is used for relative paths.
        /// Missing ones are created. Falls back to `[sandbox] roots`.
        #[arg(value_name = "ROOT")]
        roots: Vec<PathBuf>,
    },
    /// Serve the task scheduler over HTTP
    Scheduler {
        #[arg(long, env = "TOOLRELAY_LISTEN", value_name = "ADDR")]
        listen: Option<SocketAddr>,
        #[arg(long, env = "TASKS_FILE", value_name = "PATH")]
        tasks_file: Option<PathBuf>,
    },
    /// List the tools a server offers
    Tools {
        #[command(flatten)]
        target: TargetArgs,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Call one tool and print its result
    Call {
        #[command(flatten)]
        target: TargetArgs,
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,
        /// Print the raw result as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Which server to talk to: a configured name, HTTP endpoints or a command.
#[derive(Debug, clap::Args)]
struct TargetArgs {
    /// Server name from the config file
    #[arg(long, short, value_name = "NAME")]
    server: Option<String>,
    /// HTTP endpoint; repeat for failover candidates
    #[arg(long = "url", value_name = "URL", conflicts_with_all = ["server", "command"])]
    urls: Vec<String>,
    /// Spawn this command and speak over its stdio
    #[arg(long, value_name = "CMD", conflicts_with = "server")]
    command: Option<String>,
    /// Argument for --command; repeatable
    #[arg(long = "arg", value_name = "ARG", requires = "command", allow_hyphen_values = true)]
    command_args: Vec<String>,
    /// Per-call timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

impl TargetArgs {
    fn resolve(&self, config: &Config) -> Result<(String, McpServerConfig)> {
        let (name, mut server) = if !self.urls.is_empty() {
            ("http".to_string(), McpServerConfig::http(self.urls.clone()))
        } else if let Some(ref command) = self.command {
            (
                "stdio".to_string(),
                McpServerConfig::stdio(command.clone(), self.command_args.clone()),
            )
        } else if let Some(ref name) = self.server {
            let server = config
                .servers
                .get(name)
                .cloned()
                .with_context(|| format!("No server named '{}' in config", name))?;
            (name.clone(), server)
        } else {
            let mut enabled: Vec<_> = config
                .mcp()
                .enabled_servers()
                .map(|(n, s)| (n.clone(), s.clone()))
                .collect();
            match enabled.len() {
                1 => enabled.remove(0),
                0 => bail!("No server given: use --server, --url or --command"),
                _ => bail!("Several servers configured; pick one with --server"),
            }
        };
        if let Some(secs) = self.timeout {
            server.timeout_secs = secs;
        }
        Ok((name, server))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env();
    if cli.verbose {
        log_config = log_config.verbose();
    }
    if matches!(cli.command, Commands::Sandbox { .. }) {
        // stdout carries the protocol.
        log_config = log_config.for_stdio_server();
    }
    logging::init(log_config);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Sandbox { roots } => run_sandbox(&config, roots).await,
        Commands::Scheduler { listen, tasks_file } => run_scheduler(&config, listen, tasks_file).await,
        Commands::Tools { target, json } => run_tools(&config, &target, json).await,
        Commands::Call {
            target,
            tool,
            args,
            json,
        } => run_call(&config, &target, &tool, &args, json).await,
    }
}

// ── Servers ─────────────────────────────────────────────────────────────────

async fn run_sandbox(config: &Config, roots: Vec<PathBuf>) -> Result<()> {
    let roots = if roots.is_empty() {
        config.sandbox.roots.clone()
    } else {
        roots
    };
    if roots.is_empty() {
        bail!("At least one allowed directory is required");
    }

    let roots = AllowedRoots::prepare(&roots).context("Failed to prepare allowed directories")?;
    for root in roots.roots() {
        info!(root = %root.display(), "Allowed directory");
    }

    let server = Arc::new(SandboxServer::new(Sandbox::new(roots)));
    serve_stdio(server).await.context("stdio serve loop failed")?;
    Ok(())
}

async fn run_scheduler(
    config: &Config,
    listen: Option<SocketAddr>,
    tasks_file: Option<PathBuf>,
) -> Result<()> {
    let listen = listen.unwrap_or(config.scheduler.listen);
    let tasks_file = tasks_file.unwrap_or_else(|| config.scheduler.tasks_file.clone());

    let task_store = TaskStore::open(&tasks_file, config.scheduler.subscriber_capacity)
        .await
        .with_context(|| format!("Failed to open task file {}", tasks_file.display()))?;
    let (addr, server) = store::serve(Arc::new(task_store), listen)?;
    println!("Scheduler listening on http://{}", addr);

    tokio::select! {
        _ = server => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down scheduler");
        }
    }
    Ok(())
}

// ── Client commands ─────────────────────────────────────────────────────────

async fn connect(config: &Config, target: &TargetArgs) -> Result<McpClient> {
    let (name, server) = target.resolve(config)?;
    let client = McpClient::new(name.as_str(), server);
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to '{}'", name))?;
    Ok(client)
}

async fn run_tools(config: &Config, target: &TargetArgs, json: bool) -> Result<()> {
    let client = connect(config, target).await?;
    let tools = client.get_tools().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
    } else {
        for tool in &tools {
            println!("{:<28} {}", tool.name, tool.description.as_deref().unwrap_or(""));
        }
    }

    client.disconnect().await?;
    Ok(())
}

async fn run_call(config: &Config, target: &TargetArgs, tool: &str, args: &str, json: bool) -> Result<()> {
    let arguments: Value = serde_json::from_str(args).context("--args must be JSON")?;
    let client = connect(config, target).await?;
    let outcome = client.call_tool(tool, arguments).await;
    client.disconnect().await?;

    let result = outcome?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.to_text());
    }
    if result.is_error {
        bail!(
            "Tool '{}' failed ({})",
            tool,
            result.error_kind().unwrap_or("unknown")
        );
    }
    Ok(())
}
