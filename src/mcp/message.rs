//! JSON-RPC 2.0 wire messages.
//!
//! A [`Message`] is exactly one of request, notification or response. The
//! decode step is exhaustive: a document that fits none of those shapes is a
//! [`McpError::Decode`], never a best guess.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::{McpError, Result};

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision spoken by both the client and the bundled servers.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// HTTP header carrying the session id issued on `initialize`.
pub const SESSION_HEADER: &str = "mcp-session-id";

pub const PROTOCOL_HEADER: &str = "mcp-protocol-version";

/// Correlation id linking a request to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// Error object carried by an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&McpError> for RpcError {
    fn from(err: &McpError) -> Self {
        Self::new(err.rpc_code(), err.to_string())
            .with_data(serde_json::json!({ "kind": err.kind() }))
    }
}

impl From<RpcError> for McpError {
    fn from(err: RpcError) -> Self {
        McpError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` only for errors the peer could not attribute (e.g. parse errors).
    pub id: Option<RequestId>,
    pub outcome: std::result::Result<Value, RpcError>,
}

/// One document on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

/// Flat shape used only for (de)serialization.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    /// `Some(Value::Null)` for `"result": null`; `None` only when absent.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// Keeps an explicit `null` distinct from a missing field.
fn present<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Message {
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(Request {
            id,
            method: method.into(),
            params,
        })
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    pub fn response(id: RequestId, result: Value) -> Self {
        Self::Response(Response {
            id: Some(id),
            outcome: Ok(result),
        })
    }

    pub fn error_response(id: Option<RequestId>, error: RpcError) -> Self {
        Self::Response(Response {
            id,
            outcome: Err(error),
        })
    }

    /// The correlation id, if this message carries one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => r.id.as_ref(),
            Self::Notification(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// Decode an already-parsed JSON document.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawMessage =
            serde_json::from_value(value).map_err(|e| McpError::Decode(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn from_raw(raw: RawMessage) -> Result<Self> {
        if let Some(version) = raw.jsonrpc.as_deref() {
            if version != JSONRPC_VERSION {
                return Err(McpError::Decode(format!(
                    "unsupported jsonrpc version '{}'",
                    version
                )));
            }
        }

        // Some servers pair an error with `"result": null`.
        let result = match (raw.result, &raw.error) {
            (Some(Value::Null), Some(_)) => None,
            (result, _) => result,
        };

        match (raw.method, result, raw.error) {
            (Some(method), None, None) => Ok(match raw.id {
                Some(id) => Self::Request(Request {
                    id,
                    method,
                    params: raw.params,
                }),
                None => Self::Notification(Notification {
                    method,
                    params: raw.params,
                }),
            }),
            (Some(_), _, _) => Err(McpError::Decode(
                "message has both a method and a result/error".to_string(),
            )),
            (None, Some(_), Some(_)) => Err(McpError::Decode(
                "response has both a result and an error".to_string(),
            )),
            (None, Some(result), None) => match raw.id {
                Some(id) => Ok(Self::response(id, result)),
                None => Err(McpError::Decode("success response without an id".to_string())),
            },
            (None, None, Some(error)) => Ok(Self::error_response(raw.id, error)),
            (None, None, None) => Err(McpError::Decode(
                "message is neither a request, a notification nor a response".to_string(),
            )),
        }
    }

    fn to_raw(&self) -> RawMessage {
        let mut raw = RawMessage {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            ..Default::default()
        };
        match self {
            Self::Request(r) => {
                raw.id = Some(r.id.clone());
                raw.method = Some(r.method.clone());
                raw.params = r.params.clone();
            }
            Self::Notification(n) => {
                raw.method = Some(n.method.clone());
                raw.params = n.params.clone();
            }
            Self::Response(r) => {
                raw.id = r.id.clone();
                match &r.outcome {
                    Ok(result) => raw.result = Some(result.clone()),
                    Err(error) => raw.error = Some(error.clone()),
                }
            }
        }
        raw
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let raw = self.to_raw();
        // Error responses that could not be attributed carry an explicit null id.
        if let Self::Response(Response { id: None, .. }) = self {
            let mut value = serde_json::to_value(&raw).map_err(serde::ser::Error::custom)?;
            value["id"] = Value::Null;
            return value.serialize(serializer);
        }
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawMessage::deserialize(deserializer)?;
        Self::from_raw(raw).map_err(serde::de::Error::custom)
    }
}

// ── Handshake payloads ──────────────────────────────────────────────────────

/// Name/version pair identifying a client or server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Identity of this crate.
    pub fn this_crate() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub client_info: Implementation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: Implementation,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_request_and_notification() {
        let req: Message =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).unwrap();
        assert_eq!(req.id(), Some(&RequestId::Number(7)));
        assert_eq!(req.method(), Some("tools/list"));

        let note: Message =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(matches!(note, Message::Notification(_)));
        assert_eq!(note.id(), None);
    }

    #[test]
    fn test_decode_error_response_with_null_id() {
        let msg: Message = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"bad json"}}"#,
        )
        .unwrap();
        match msg {
            Message::Response(Response { id: None, outcome: Err(e) }) => {
                assert_eq!(e.code, -32700);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unrecognised_shapes_are_rejected() {
        assert!(Message::from_value(json!({"jsonrpc": "2.0", "id": 1})).is_err());
        assert!(
            Message::from_value(json!({"id": 1, "result": {}, "error": {"code": 1, "message": "x"}}))
                .is_err()
        );
        assert!(Message::from_value(json!({"id": 1, "method": "x", "result": {}})).is_err());
        assert!(Message::from_value(json!({"jsonrpc": "1.0", "id": 1, "result": {}})).is_err());
        assert!(Message::from_value(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_serialize_always_tags_version() {
        let msg = Message::request(RequestId::Number(1), "ping", None);
        let value = msg.to_value();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 1);
        assert!(value.get("params").is_none());

        let err = Message::error_response(None, RpcError::new(-32700, "parse"));
        assert!(err.to_value()["id"].is_null());
    }

    #[test]
    fn test_null_and_falsy_results_are_responses() {
        for result in [Value::Null, json!(false), json!(0), json!("")] {
            let msg =
                Message::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": result.clone()}))
                    .unwrap();
            assert_eq!(msg, Message::response(RequestId::Number(1), result));
        }

        let line =
            serde_json::to_string(&Message::response(RequestId::Number(2), Value::Null)).unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","id":2,"result":null}"#);
        assert_eq!(
            serde_json::from_str::<Message>(&line).unwrap(),
            Message::response(RequestId::Number(2), Value::Null)
        );
    }

    #[test]
    fn test_error_with_null_result_is_an_error() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0", "id": 3, "result": null,
            "error": {"code": -32601, "message": "no such method"}
        }))
        .unwrap();
        assert!(matches!(msg, Message::Response(Response { outcome: Err(_), .. })));
    }

    #[test]
    fn test_string_ids_survive() {
        let msg = Message::from_value(json!({"id": "abc", "result": {"ok": true}})).unwrap();
        assert_eq!(msg.id(), Some(&RequestId::String("abc".into())));
    }
}
