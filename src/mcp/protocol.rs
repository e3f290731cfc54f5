//! Wire envelopes for MCP over JSON-RPC 2.0.
//!
//! Incoming traffic is decoded by [`parse_message`] (or [`parse_value`] when
//! the body was already decoded) into an [`IncomingMessage`]: anything with an
//! `id` member is a request and gets exactly one [`JsonRpcReply`], anything
//! without one is a notification and gets nothing back. Ids are integers or
//! strings; `null` ids are rejected as malformed requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mcp::error::McpError;

/// Value of the `jsonrpc` member on every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision offered when the client asks for one we don't know.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Revisions echoed back unchanged during `initialize`.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[MCP_PROTOCOL_VERSION, "2024-11-05"];

/// Reported as `serverInfo.name` and as the logger of pushed log messages.
pub const SERVER_NAME: &str = "picnic-mcp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => n.fmt(f),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Request methods routed by the dispatcher. Anything else is answered with
/// `-32601`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    Ping,
    ListTools,
    CallTool,
    ListPrompts,
    GetPrompt,
    ListResources,
    ReadResource,
}

const METHOD_NAMES: [(Method, &str); 8] = [
    (Method::Initialize, "initialize"),
    (Method::Ping, "ping"),
    (Method::ListTools, "tools/list"),
    (Method::CallTool, "tools/call"),
    (Method::ListPrompts, "prompts/list"),
    (Method::GetPrompt, "prompts/get"),
    (Method::ListResources, "resources/list"),
    (Method::ReadResource, "resources/read"),
];

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        METHOD_NAMES
            .iter()
            .find_map(|&(method, name)| (method == self).then_some(name))
            .unwrap_or_default()
    }
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        METHOD_NAMES
            .iter()
            .find_map(|&(method, name)| (name == s).then_some(method))
            .ok_or(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A server-initiated notification, delivered over an HTTP session's event
/// stream.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OutgoingNotification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }

    /// `notifications/message` carrying `data` at the given syslog-style level.
    #[must_use]
    pub fn log_message(level: &str, data: Value) -> Self {
        Self::new(
            "notifications/message",
            Some(json!({ "level": level, "logger": SERVER_NAME, "data": data })),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    #[must_use]
    pub const fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// Reserved JSON-RPC error codes used by the envelope layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
}

impl ErrorCode {
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// The `error` member of an error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    fn plain(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }
}

/// An error reply. `id` is omitted when the request could not be identified.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    #[must_use]
    pub const fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }

    /// Renders a normalised error; stacks are only attached in debug builds.
    #[must_use]
    pub fn from_mcp(id: Option<RequestId>, error: &McpError) -> Self {
        Self::new(id, error.to_wire_format(cfg!(debug_assertions)))
    }

    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::plain(ErrorCode::ParseError, "Parse error"))
    }

    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::plain(ErrorCode::InvalidRequest, "Invalid Request"),
        )
    }

    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::plain(ErrorCode::MethodNotFound, format!("Method not found: {method}")),
        )
    }
}

/// The single reply owed to a request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcReply {
    Success(JsonRpcResponse),
    Error(JsonRpcError),
}

impl JsonRpcReply {
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl From<JsonRpcResponse> for JsonRpcReply {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Success(response)
    }
}

impl From<JsonRpcError> for JsonRpcReply {
    fn from(error: JsonRpcError) -> Self {
        Self::Error(error)
    }
}

#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Request(req) => &req.method,
            Self::Notification(notif) => &notif.method,
        }
    }

    #[must_use]
    pub fn is_initialize(&self) -> bool {
        matches!(self, Self::Request(req) if req.method == Method::Initialize.as_str())
    }
}

/// Decodes one line or body of text.
///
/// # Errors
///
/// `-32700` when the text is not JSON, otherwise see [`parse_value`].
pub fn parse_message(text: &str) -> Result<IncomingMessage, JsonRpcError> {
    let value = serde_json::from_str(text).map_err(|_| JsonRpcError::parse_error())?;
    parse_value(value)
}

/// Classifies a decoded JSON value.
///
/// # Errors
///
/// `-32600` for non-objects, a missing or wrong `jsonrpc` member, an empty
/// method, or members of the wrong type. The request id is echoed when it
/// could be read.
pub fn parse_value(value: Value) -> Result<IncomingMessage, JsonRpcError> {
    let Some(obj) = value.as_object() else {
        return Err(JsonRpcError::invalid_request(None));
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(JsonRpcError::invalid_request(None));
    }

    if !obj.contains_key("id") {
        return serde_json::from_value(value)
            .map(IncomingMessage::Notification)
            .map_err(|_| JsonRpcError::invalid_request(None));
    }

    let req: JsonRpcRequest =
        serde_json::from_value(value).map_err(|_| JsonRpcError::invalid_request(None))?;
    if req.method.is_empty() {
        return Err(JsonRpcError::invalid_request(Some(req.id)));
    }
    Ok(IncomingMessage::Request(req))
}
