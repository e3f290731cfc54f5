//! Transport-agnostic request dispatch.
//!
//! A [`Dispatcher`] owns the MCP lifecycle of one client connection and maps
//! each method of the fixed [`Method`] table onto the shared [`Registries`].
//! The stdio server owns a single dispatcher; the HTTP transport creates one
//! per session.
//!
//! Tool failures never leave `tools/call` as protocol errors: they are
//! returned as results with `isError: true`. Every other method reports
//! failures as JSON-RPC errors built from the normalised [`McpError`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mcp::error::{log_error, with_timeout, ErrorKind, McpError, McpResult};
use crate::mcp::protocol::{
    IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcReply, JsonRpcRequest,
    JsonRpcResponse, Method, MCP_PROTOCOL_VERSION, SERVER_NAME, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::registry::tools::ToolCallResult;
use crate::mcp::registry::Registries;

/// Per-method execution time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTimeouts {
    /// `tools/call`.
    pub tool: Duration,
    /// `prompts/get`.
    pub prompt: Duration,
    /// `resources/read`.
    pub resource: Duration,
}

impl Default for DispatchTimeouts {
    fn default() -> Self {
        Self {
            tool: Duration::from_secs(60),
            prompt: Duration::from_secs(30),
            resource: Duration::from_secs(30),
        }
    }
}

/// Lifecycle state of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Only `initialize` is accepted.
    AwaitingInit,
    /// `initialize` answered; `notifications/initialized` not seen yet.
    Initialising,
    Running,
}

/// `capabilities` in the `initialize` result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerCapabilities {
    pub tools: ListChanged,
    pub prompts: ListChanged,
    pub resources: ListChanged,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListChanged {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// `serverInfo` in the `initialize` result.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// `initialize` params. Unknown members are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// Binds the MCP methods to the registries for one connection.
pub struct Dispatcher {
    registries: Registries,
    timeouts: DispatchTimeouts,
    state: Mutex<SessionState>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registries: Registries, timeouts: DispatchTimeouts) -> Self {
        Self {
            registries,
            timeouts,
            state: Mutex::new(SessionState::AwaitingInit),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    #[must_use]
    pub const fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Handles one parsed message. Notifications produce no reply.
    pub async fn handle_message(&self, msg: IncomingMessage) -> Option<JsonRpcReply> {
        match msg {
            IncomingMessage::Request(req) => Some(self.handle_request(req).await),
            IncomingMessage::Notification(notif) => {
                self.handle_notification(&notif);
                None
            }
        }
    }

    /// Handles a request and builds its reply.
    pub async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcReply {
        let JsonRpcRequest {
            id, method, params, ..
        } = req;

        let Ok(parsed) = method.parse::<Method>() else {
            tracing::debug!(method = %method, "unknown method");
            return JsonRpcError::method_not_found(id, &method).into();
        };

        match self.route(parsed, params).await {
            Ok(result) => JsonRpcResponse::success(id, result).into(),
            Err(err) => JsonRpcError::from_mcp(Some(id), &err).into(),
        }
    }

    fn handle_notification(&self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => {
                let mut state = self.state.lock();
                if *state == SessionState::Initialising {
                    *state = SessionState::Running;
                    tracing::debug!("client initialised");
                }
            }
            "notifications/cancelled" => {
                // In-flight work is never cancelled, only its reply is abandoned.
                tracing::debug!(params = ?notif.params, "client cancelled a request");
            }
            other => tracing::debug!(method = other, "ignoring notification"),
        }
    }

    async fn route(&self, method: Method, params: Option<Value>) -> McpResult<Value> {
        match method {
            Method::Initialize => return self.initialize(params),
            Method::Ping => return Ok(json!({})),
            _ => self.require_initialised()?,
        }

        match method {
            Method::ListTools => list_result("tools", self.registries.tools.list()),
            Method::ListPrompts => list_result("prompts", self.registries.prompts.list()),
            Method::ListResources => list_result("resources", self.registries.resources.list()),
            Method::CallTool => {
                let result = self.call_tool(params.unwrap_or(Value::Null)).await;
                serde_json::to_value(result).map_err(|e| {
                    McpError::internal(format!("Failed to serialise tool result: {e}"))
                })
            }
            Method::GetPrompt => self.get_prompt(params.unwrap_or(Value::Null)).await,
            Method::ReadResource => self.read_resource(params.unwrap_or(Value::Null)).await,
            Method::Initialize | Method::Ping => Ok(json!({})),
        }
    }

    fn require_initialised(&self) -> McpResult<()> {
        if *self.state.lock() == SessionState::AwaitingInit {
            return Err(McpError::invalid_request("Server not initialised"));
        }
        Ok(())
    }

    fn initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::invalid_request(format!("Invalid initialize params: {e}")))?
            .ok_or_else(|| McpError::invalid_request("Missing initialize params"))?;

        {
            let mut state = self.state.lock();
            if *state != SessionState::AwaitingInit {
                return Err(McpError::invalid_request("Server already initialised"));
            }
            *state = SessionState::Initialising;
        }

        let version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version.as_str()
        } else {
            MCP_PROTOCOL_VERSION
        };
        tracing::info!(
            client = params.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            requested = %params.protocol_version,
            negotiated = version,
            "initialising session"
        );

        Ok(json!({
            "protocolVersion": version,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": ServerInfo::default(),
        }))
    }

    /// Runs `tools/call`. Always yields a tool result, failures included.
    pub async fn call_tool(&self, params: Value) -> ToolCallResult {
        let Some(name) = params
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            let error = McpError::new(
                ErrorKind::ToolValidationFailed,
                "Tool name is required and must be a non-empty string",
            );
            log_error(&error, Some("tools/call"));
            return ToolCallResult::error(error.message());
        };
        let arguments = arguments_of(&params);

        let tools = Arc::clone(&self.registries.tools);
        let tool_name = name.clone();
        let message = format!(
            "Tool '{name}' timed out after {}ms",
            self.timeouts.tool.as_millis()
        );
        let outcome = with_timeout(
            async move { tools.execute(&tool_name, arguments).await },
            self.timeouts.tool,
            Some(message.as_str()),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(err) => {
                log_error(&err, Some(&name));
                ToolCallResult::error(err.message())
            }
        }
    }

    async fn get_prompt(&self, params: Value) -> McpResult<Value> {
        let Some(name) = params
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            let error = McpError::new(
                ErrorKind::PromptValidationFailed,
                "Prompt name is required and must be a non-empty string",
            );
            log_error(&error, Some("prompts/get"));
            return Err(error);
        };
        let arguments = arguments_of(&params);

        let prompts = Arc::clone(&self.registries.prompts);
        let prompt_name = name.clone();
        let message = format!(
            "Prompt '{name}' timed out after {}ms",
            self.timeouts.prompt.as_millis()
        );
        let result = with_timeout(
            async move { prompts.execute_prompt(&prompt_name, arguments).await },
            self.timeouts.prompt,
            Some(message.as_str()),
        )
        .await
        .map_err(|err| {
            log_error(&err, Some(&name));
            err
        })?;

        serde_json::to_value(result).map_err(|e| {
            let error = McpError::new(
                ErrorKind::PromptExecutionFailed,
                format!("Failed to serialise prompt: {e}"),
            )
            .with_detail("promptName", json!(name));
            log_error(&error, Some(&name));
            error
        })
    }

    async fn read_resource(&self, params: Value) -> McpResult<Value> {
        let Some(uri) = params.get("uri").and_then(Value::as_str).map(str::to_string) else {
            let error = McpError::new(
                ErrorKind::ResourceValidationFailed,
                "Resource URI is required and must be a string",
            );
            log_error(&error, Some("resources/read"));
            return Err(error);
        };
        let arguments = arguments_of(&params);

        let resources = Arc::clone(&self.registries.resources);
        let resource_uri = uri.clone();
        let message = format!(
            "Resource '{uri}' timed out after {}ms",
            self.timeouts.resource.as_millis()
        );
        let result = with_timeout(
            async move { resources.read_resource(&resource_uri, arguments).await },
            self.timeouts.resource,
            Some(message.as_str()),
        )
        .await
        .map_err(|err| {
            log_error(&err, Some(&uri));
            err
        })?;

        serde_json::to_value(result).map_err(|e| {
            let error = McpError::new(
                ErrorKind::ResourceReadFailed,
                format!("Failed to serialise resource: {e}"),
            )
            .with_detail("uri", json!(uri));
            log_error(&error, Some(&uri));
            error
        })
    }
}

fn arguments_of(params: &Value) -> Value {
    params
        .get("arguments")
        .filter(|args| !args.is_null())
        .cloned()
        .unwrap_or_else(|| json!({}))
}

fn list_result<T: Serialize>(subsystem: &str, items: Vec<T>) -> McpResult<Value> {
    let items = serde_json::to_value(items).map_err(|e| {
        let error = McpError::internal(format!("Failed to list {subsystem}: {e}"))
            .with_detail("subsystem", json!(subsystem));
        log_error(&error, Some(subsystem));
        error
    })?;
    let mut result = serde_json::Map::new();
    result.insert(subsystem.to_string(), items);
    Ok(Value::Object(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{parse_message, RequestId};
    use crate::mcp::registry::{Prompt, Resource, Tool};
    use crate::mcp::registry::prompts::PromptMessage;
    use crate::mcp::schema::{Field, Schema};

    fn registries() -> Registries {
        let registries = Registries::new();
        registries.tools.register(Tool::new(
            "echo",
            "Echo a message",
            Schema::object([Field::required("message", Schema::string())]),
            |input| async move { Ok(input["message"].clone()) },
        ));
        registries.tools.register(Tool::new(
            "slow",
            "Sleeps for a long time",
            Schema::empty_object(),
            |_| async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok(json!("done"))
            },
        ));
        registries.prompts.register(Prompt::new(
            "hello",
            "Greets",
            Schema::empty_object(),
            |_| async { Ok(vec![PromptMessage::user("hello")]) },
        ));
        registries.resources.register(Resource::new(
            "picnic://cart",
            "Cart",
            "Cart contents",
            |_, _| async { Ok(json!({"items": []})) },
        ));
        registries
    }

    async fn initialised() -> Dispatcher {
        let dispatcher = Dispatcher::new(registries(), DispatchTimeouts::default());
        let reply = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"test"}}}"#,
        )
        .await;
        assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");
        dispatcher
    }

    async fn send(dispatcher: &Dispatcher, line: &str) -> Value {
        let msg = parse_message(line).unwrap();
        let reply = dispatcher.handle_message(msg).await.unwrap();
        serde_json::to_value(reply).unwrap()
    }

    #[tokio::test]
    async fn initialize_advertises_all_capabilities() {
        let dispatcher = Dispatcher::new(registries(), DispatchTimeouts::default());
        let reply = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"1999-01-01"}}"#,
        )
        .await;
        assert_eq!(reply["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert!(reply["result"]["capabilities"]["prompts"].is_object());
        assert_eq!(reply["result"]["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(dispatcher.state(), SessionState::Initialising);
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let dispatcher = initialised().await;
        let reply = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":2,"method":"initialize","params":{"protocolVersion":"2025-03-26"}}"#,
        )
        .await;
        assert_eq!(reply["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn requests_before_initialize_are_rejected() {
        let dispatcher = Dispatcher::new(registries(), DispatchTimeouts::default());
        let reply = send(&dispatcher, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
        assert_eq!(reply["error"]["code"], -32600);
        let reply = send(&dispatcher, r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).await;
        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn initialized_notification_completes_the_handshake() {
        let dispatcher = initialised().await;
        let msg = parse_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(dispatcher.handle_message(msg).await.is_none());
        assert_eq!(dispatcher.state(), SessionState::Running);
    }

    #[tokio::test]
    async fn unknown_method() {
        let dispatcher = initialised().await;
        let reply = send(&dispatcher, r#"{"jsonrpc":"2.0","id":"x","method":"tools/delete"}"#).await;
        assert_eq!(reply["id"], "x");
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn lists_every_registry() {
        let dispatcher = initialised().await;
        let tools = send(&dispatcher, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
        assert_eq!(tools["result"]["tools"].as_array().unwrap().len(), 2);
        let prompts = send(&dispatcher, r#"{"jsonrpc":"2.0","id":2,"method":"prompts/list"}"#).await;
        assert_eq!(prompts["result"]["prompts"][0]["name"], "hello");
        let resources =
            send(&dispatcher, r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#).await;
        assert_eq!(resources["result"]["resources"][0]["uri"], "picnic://cart");
        assert_eq!(resources["result"]["resources"][0]["mimeType"], "application/json");
    }

    #[tokio::test]
    async fn call_tool_success() {
        let dispatcher = initialised().await;
        let reply = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#,
        )
        .await;
        assert_eq!(reply["id"], 1);
        assert_eq!(
            reply["result"],
            json!({"content": [{"type": "text", "text": "hi"}]})
        );
    }

    #[tokio::test]
    async fn call_tool_without_name_is_an_error_payload() {
        let dispatcher = initialised().await;
        let result = dispatcher.call_tool(json!({"arguments": {}})).await;
        assert!(result.is_error);
        assert!(result.first_text().unwrap().contains("Tool name is required"));

        let result = dispatcher.call_tool(json!({"name": ""})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn call_tool_unknown_is_an_error_payload() {
        let dispatcher = initialised().await;
        let reply = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"nope"}}"#,
        )
        .await;
        assert!(reply.get("error").is_none());
        assert_eq!(reply["result"]["isError"], true);
        assert_eq!(reply["result"]["content"][0]["text"], "Tool not found: nope");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tools_time_out_as_error_payloads() {
        let dispatcher = initialised().await;
        let result = dispatcher.call_tool(json!({"name": "slow"})).await;
        assert!(result.is_error);
        assert_eq!(
            result.first_text(),
            Some("Tool 'slow' timed out after 60000ms")
        );
    }

    #[tokio::test]
    async fn get_prompt_requires_a_name() {
        let dispatcher = initialised().await;
        let reply = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":1,"method":"prompts/get","params":{"name":""}}"#,
        )
        .await;
        assert_eq!(reply["error"]["code"], -32600);
        assert_eq!(reply["error"]["data"]["errorKind"], "PROMPT_VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn get_prompt_renders_messages() {
        let dispatcher = initialised().await;
        let reply = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":1,"method":"prompts/get","params":{"name":"hello"}}"#,
        )
        .await;
        assert_eq!(reply["result"]["messages"][0]["role"], "user");
        assert_eq!(reply["result"]["messages"][0]["content"]["text"], "hello");
    }

    #[tokio::test]
    async fn get_unknown_prompt_is_a_protocol_error() {
        let dispatcher = initialised().await;
        let reply = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":1,"method":"prompts/get","params":{"name":"nope"}}"#,
        )
        .await;
        assert_eq!(reply["error"]["code"], -32601);
        assert_eq!(reply["error"]["data"]["details"]["promptName"], "nope");
    }

    #[tokio::test]
    async fn read_resource_requires_a_string_uri() {
        let dispatcher = initialised().await;
        let reply = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":5}}"#,
        )
        .await;
        assert_eq!(reply["error"]["data"]["errorKind"], "RESOURCE_VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn read_resource_returns_contents() {
        let dispatcher = initialised().await;
        let reply = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":"picnic://cart"}}"#,
        )
        .await;
        assert_eq!(reply["result"]["contents"][0]["uri"], "picnic://cart");
    }

    #[tokio::test]
    async fn request_ids_are_echoed() {
        let dispatcher = initialised().await;
        let reply = dispatcher
            .handle_request(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: RequestId::String("abc".to_string()),
                method: "ping".to_string(),
                params: None,
            })
            .await;
        assert!(!reply.is_error());
        assert_eq!(serde_json::to_value(reply).unwrap()["id"], "abc");
    }
}
