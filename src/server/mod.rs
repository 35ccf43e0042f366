//! Server side of the protocol: a [`ToolServer`] trait plus the dispatcher
//! and surfaces (stdio, HTTP) that expose any implementation of it.

pub mod http;
pub mod stdio;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{McpError, Result, codes};
use crate::mcp::message::{
    CallToolParams, Implementation, InitializeResult, Message, PROTOCOL_VERSION, Request,
    RequestId, RpcError,
};
use crate::mcp::tools::{ListToolsResult, McpToolResult, ToolDescriptor};

/// A set of named tools reachable over the protocol.
#[async_trait]
pub trait ToolServer: Send + Sync + 'static {
    fn info(&self) -> Implementation;

    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Run one tool. [`McpError::UnknownTool`] and
    /// [`McpError::InvalidArguments`] become protocol errors; every other
    /// error is reported as an `isError` result.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;
}

// ── Argument schemas ────────────────────────────────────────────────────────

/// One parameter of a tool's input schema.
#[derive(Debug, Clone, Copy)]
pub struct ToolParam {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON Schema type: "string", "integer", "array", ...
    pub param_type: &'static str,
    pub required: bool,
}

impl ToolParam {
    pub const fn required(name: &'static str, param_type: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            param_type,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, param_type: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            param_type,
            required: false,
        }
    }
}

/// Build an object schema from parameter definitions.
pub fn input_schema(params: &[ToolParam]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for p in params {
        let mut prop = serde_json::Map::new();
        prop.insert("type".into(), json!(p.param_type));
        prop.insert("description".into(), json!(p.description));
        if p.param_type == "array" {
            prop.insert("items".into(), json!({"type": "string"}));
        }
        properties.insert(p.name.to_string(), Value::Object(prop));
        if p.required {
            required.push(json!(p.name));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Decode tool arguments into a typed struct. A missing or null argument
/// object is treated as `{}`.
pub fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    let arguments = match arguments {
        Value::Null => json!({}),
        Value::Object(_) => arguments,
        other => {
            return Err(McpError::InvalidArguments(format!(
                "{}: arguments must be an object, got {}",
                tool, other
            )));
        }
    };
    serde_json::from_value(arguments)
        .map_err(|e| McpError::InvalidArguments(format!("{}: {}", tool, e)))
}

/// Serialize a tool's typed output.
pub fn to_output<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| McpError::Protocol(format!("encode result: {}", e)))
}

// ── Dispatch ────────────────────────────────────────────────────────────────

/// Handle one raw line or body. Unparseable input yields a parse-error
/// response with a null id.
pub async fn handle_raw<S: ToolServer + ?Sized>(server: &S, raw: &str) -> Option<Message> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Unparseable request");
            return Some(Message::error_response(
                None,
                RpcError::new(codes::PARSE_ERROR, format!("parse error: {}", e)),
            ));
        }
    };

    let fallback_id = value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());

    match Message::from_value(value) {
        Ok(message) => handle_message(server, message).await,
        Err(e) => Some(Message::error_response(
            fallback_id,
            RpcError::new(codes::INVALID_REQUEST, e.to_string()),
        )),
    }
}

/// Handle a decoded message; returns the response for requests only.
pub async fn handle_message<S: ToolServer + ?Sized>(server: &S, message: Message) -> Option<Message> {
    match message {
        Message::Request(request) => {
            let id = request.id.clone();
            Some(match dispatch(server, request).await {
                Ok(result) => Message::response(id, result),
                Err(error) => Message::error_response(Some(id), error),
            })
        }
        Message::Notification(note) => {
            debug!(method = %note.method, "Notification received");
            None
        }
        Message::Response(response) => {
            debug!(id = ?response.id, "Ignoring response sent to a server");
            None
        }
    }
}

async fn dispatch<S: ToolServer + ?Sized>(
    server: &S,
    request: Request,
) -> std::result::Result<Value, RpcError> {
    debug!(method = %request.method, id = %request.id, "Dispatching request");
    match request.method.as_str() {
        "initialize" => {
            let result = InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: json!({ "tools": { "listChanged": false } }),
                server_info: server.info(),
            };
            serde_json::to_value(result)
                .map_err(|e| RpcError::new(codes::INTERNAL_ERROR, e.to_string()))
        }
        "ping" | "shutdown" => Ok(json!({})),
        "tools/list" => serde_json::to_value(ListToolsResult {
            tools: server.tools(),
            next_cursor: None,
        })
        .map_err(|e| RpcError::new(codes::INTERNAL_ERROR, e.to_string())),
        "tools/call" => {
            let params: CallToolParams = request
                .params
                .ok_or_else(|| RpcError::new(codes::INVALID_PARAMS, "missing params"))
                .and_then(|p| {
                    serde_json::from_value(p)
                        .map_err(|e| RpcError::new(codes::INVALID_PARAMS, e.to_string()))
                })?;
            let arguments = params.arguments.unwrap_or(Value::Null);

            let result = match server.call_tool(&params.name, arguments).await {
                Ok(value) => McpToolResult::structured(value),
                Err(e @ (McpError::UnknownTool(_) | McpError::InvalidArguments(_))) => {
                    return Err(RpcError::from(&e));
                }
                Err(e) => {
                    warn!(tool = %params.name, error = %e, kind = e.kind(), "Tool call failed");
                    McpToolResult::failure(&e)
                }
            };
            serde_json::to_value(result)
                .map_err(|e| RpcError::new(codes::INTERNAL_ERROR, e.to_string()))
        }
        other => Err(RpcError::new(
            codes::METHOD_NOT_FOUND,
            format!("method not found: {}", other),
        )),
    }
}
