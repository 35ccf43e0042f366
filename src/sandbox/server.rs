//! Tool-server face of the sandbox.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use tracing::instrument;

use super::ops::Sandbox;
use crate::error::{McpError, Result};
use crate::mcp::message::Implementation;
use crate::mcp::tools::ToolDescriptor;
use crate::server::{ToolParam, ToolServer, input_schema, parse_args, to_output};

/// Every tool the sandbox server answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum SandboxTool {
    ReadTextFile,
    ReadMultipleFiles,
    WriteFile,
    CreateDirectory,
    ListDirectory,
    MoveFile,
    SearchFiles,
    GetFileInfo,
    ListAllowedDirectories,
}

impl SandboxTool {
    pub fn name(self) -> &'static str {
        self.into()
    }

    fn description(self) -> &'static str {
        match self {
            Self::ReadTextFile => {
                "Read a UTF-8 text file. `head` returns only the first N lines, `tail` only \
                 the last N; head wins if both are given."
            }
            Self::ReadMultipleFiles => {
                "Read several files at once. Each path reports its own content or error."
            }
            Self::WriteFile => "Create or overwrite a file. Parent directories are created.",
            Self::CreateDirectory => "Create a directory and any missing parents.",
            Self::ListDirectory => "List the entries of a directory.",
            Self::MoveFile => "Move or rename a file or directory. Fails if the destination exists.",
            Self::SearchFiles => {
                "Recursively find paths containing `pattern` (case-insensitive), skipping \
                 anything matching `exclude_patterns` globs."
            }
            Self::GetFileInfo => "Size, timestamps, type and permissions of a path.",
            Self::ListAllowedDirectories => "The directories this server may access.",
        }
    }

    fn params(self) -> Vec<ToolParam> {
        const PATH: ToolParam = ToolParam::required("path", "string", "Path inside an allowed directory.");
        match self {
            Self::ReadTextFile => vec![
                PATH,
                ToolParam::optional("head", "integer", "Only the first N lines."),
                ToolParam::optional("tail", "integer", "Only the last N lines."),
            ],
            Self::ReadMultipleFiles => vec![ToolParam::required("paths", "array", "Paths to read.")],
            Self::WriteFile => vec![
                PATH,
                ToolParam::required("content", "string", "Full file content."),
            ],
            Self::CreateDirectory | Self::GetFileInfo => vec![PATH],
            Self::ListDirectory => vec![ToolParam::optional(
                "path",
                "string",
                "Directory to list. Defaults to the primary allowed directory.",
            )],
            Self::MoveFile => vec![
                ToolParam::required("source", "string", "Existing path."),
                ToolParam::required("destination", "string", "New path; must not exist."),
            ],
            Self::SearchFiles => vec![
                ToolParam::required("path", "string", "Directory to search from."),
                ToolParam::required("pattern", "string", "Substring to look for."),
                ToolParam::optional("exclude_patterns", "array", "Glob patterns to skip."),
            ],
            Self::ListAllowedDirectories => Vec::new(),
        }
    }

    pub fn descriptor(self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            input_schema: input_schema(&self.params()),
        }
    }
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct OptionalPathArgs {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
    #[serde(default)]
    head: Option<usize>,
    #[serde(default)]
    tail: Option<usize>,
}

#[derive(Deserialize)]
struct ReadManyArgs {
    paths: Vec<String>,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct MoveArgs {
    source: String,
    destination: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    path: String,
    pattern: String,
    #[serde(default)]
    exclude_patterns: Vec<String>,
}

/// Serves a [`Sandbox`] over the tool protocol.
#[derive(Debug, Clone)]
pub struct SandboxServer {
    sandbox: Sandbox,
}

impl SandboxServer {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }
}

#[async_trait]
impl ToolServer for SandboxServer {
    fn info(&self) -> Implementation {
        Implementation::new("toolrelay-sandbox", env!("CARGO_PKG_VERSION"))
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        SandboxTool::iter().map(SandboxTool::descriptor).collect()
    }

    #[instrument(skip(self, arguments))]
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let tool: SandboxTool = name
            .parse()
            .map_err(|_| McpError::UnknownTool(name.to_string()))?;
        let sandbox = &self.sandbox;

        match tool {
            SandboxTool::ReadTextFile => {
                let args: ReadArgs = parse_args(name, arguments)?;
                to_output(&sandbox.read_text_file(&args.path, args.head, args.tail).await?)
            }
            SandboxTool::ReadMultipleFiles => {
                let args: ReadManyArgs = parse_args(name, arguments)?;
                let files = sandbox.read_multiple_files(&args.paths).await;
                Ok(json!({ "files": to_output(&files)? }))
            }
            SandboxTool::WriteFile => {
                let args: WriteArgs = parse_args(name, arguments)?;
                to_output(&sandbox.write_file(&args.path, &args.content).await?)
            }
            SandboxTool::CreateDirectory => {
                let args: PathArgs = parse_args(name, arguments)?;
                to_output(&sandbox.create_directory(&args.path).await?)
            }
            SandboxTool::ListDirectory => {
                let args: OptionalPathArgs = parse_args(name, arguments)?;
                let path = args.path.unwrap_or_default();
                to_output(&sandbox.list_directory(&path).await?)
            }
            SandboxTool::MoveFile => {
                let args: MoveArgs = parse_args(name, arguments)?;
                to_output(&sandbox.move_file(&args.source, &args.destination).await?)
            }
            SandboxTool::SearchFiles => {
                let args: SearchArgs = parse_args(name, arguments)?;
                to_output(
                    &sandbox
                        .search_files(&args.path, &args.pattern, &args.exclude_patterns)
                        .await?,
                )
            }
            SandboxTool::GetFileInfo => {
                let args: PathArgs = parse_args(name, arguments)?;
                to_output(&sandbox.get_file_info(&args.path).await?)
            }
            SandboxTool::ListAllowedDirectories => Ok(json!({
                "directories": sandbox.list_allowed_directories()
            })),
        }
    }
}
