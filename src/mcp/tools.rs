//! Tool descriptors and call results as they appear on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::McpError;

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// `tools/list` result payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// A tool together with the configured server that provides it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub server_name: String,
}

impl McpTool {
    pub fn from_descriptor(server_name: &str, descriptor: ToolDescriptor) -> Self {
        Self {
            name: descriptor.name,
            description: descriptor.description,
            input_schema: descriptor.input_schema,
            server_name: server_name.to_string(),
        }
    }

    /// Name qualified by its server, e.g. `sandbox.read_text_file`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.server_name, self.name)
    }
}

/// A call addressed by qualified name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolCall {
    pub server_name: String,
    pub tool_name: String,
    pub arguments: Value,
}

impl McpToolCall {
    /// Split `server.tool`. Tool names may themselves contain dots.
    pub fn from_qualified_name(qualified: &str, arguments: Value) -> Option<Self> {
        let (server, tool) = qualified.split_once('.')?;
        if server.is_empty() || tool.is_empty() {
            return None;
        }
        Some(Self {
            server_name: server.to_string(),
            tool_name: tool.to_string(),
            arguments,
        })
    }
}

/// One content item of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: EmbeddedResource,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Result of `tools/call`.
///
/// `is_error` marks a tool-level failure (the call reached the tool and the
/// tool said no), as opposed to a protocol error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl McpToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text {
                text: content.into(),
            }],
            structured_content: None,
            is_error: false,
        }
    }

    /// Successful result carrying `value` both as text and structured.
    pub fn structured(value: Value) -> Self {
        let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        let structured = match value {
            Value::Object(_) => value,
            other => json!({ "result": other }),
        };
        Self {
            content: vec![McpContent::Text { text }],
            structured_content: Some(structured),
            is_error: false,
        }
    }

    /// Tool-level failure with the error kind kept machine-readable.
    pub fn failure(err: &McpError) -> Self {
        let message = err.to_string();
        Self {
            content: vec![McpContent::Text {
                text: format!("Error: {}", message),
            }],
            structured_content: Some(json!({
                "error": { "kind": err.kind(), "message": message }
            })),
            is_error: true,
        }
    }

    /// Kind recorded by [`McpToolResult::failure`], if any.
    pub fn error_kind(&self) -> Option<&str> {
        if !self.is_error {
            return None;
        }
        self.structured_content
            .as_ref()?
            .get("error")?
            .get("kind")?
            .as_str()
    }

    /// Decode a `tools/call` result payload.
    pub fn from_value(value: Value) -> Result<Self, McpError> {
        if !value.is_object() {
            return Err(McpError::Decode(format!(
                "tool result must be an object, got {}",
                value
            )));
        }
        serde_json::from_value(value).map_err(|e| McpError::Decode(format!("tool result: {}", e)))
    }

    /// All text content joined by newlines; non-text items are summarised.
    pub fn to_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                McpContent::Text { text } => text.clone(),
                McpContent::Image { mime_type, .. } => format!("[Image: {}]", mime_type),
                McpContent::Audio { data, mime_type } => {
                    format!("[Audio: {} bytes, {}]", data.len(), mime_type)
                }
                McpContent::Resource { resource } => resource
                    .text
                    .clone()
                    .unwrap_or_else(|| format!("[Resource: {}]", resource.uri)),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
