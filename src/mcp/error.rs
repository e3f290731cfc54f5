//! Normalised error taxonomy for the MCP gateway.
//!
//! Every error that crosses a transport boundary is an [`McpError`]: a fixed
//! [`ErrorKind`], a human-readable message, optional structured details and a
//! UTC timestamp. The HTTP status and JSON-RPC code are derived from the kind,
//! so two errors of the same kind always translate identically.
//!
//! # JSON-RPC code mapping
//!
//! | Kind family                        | Code     |
//! |------------------------------------|----------|
//! | validation / invalid request       | `-32600` |
//! | not found                          | `-32601` |
//! | execution failed                   | `-32602` |
//! | timeout / rate limited             | `-32000` |
//! | everything else                    | `-32603` |

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::mcp::protocol::JsonRpcErrorData;

/// Result alias used throughout the MCP layer.
pub type McpResult<T> = Result<T, McpError>;

/// The subsystem an [`ErrorKind`] originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorGroup {
    /// Connection, session and rate limiting failures.
    Transport,
    /// Tool registry failures.
    Tool,
    /// Prompt registry failures.
    Prompt,
    /// Resource registry failures.
    Resource,
    /// Server lifecycle failures.
    Server,
    /// Request-level and internal failures.
    Generic,
}

/// Closed set of error kinds with stable string codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Transport
    TransportConnectionFailed,
    TransportTimeout,
    TransportInvalidSession,
    TransportRateLimited,
    TransportClosed,

    // Tools
    ToolNotFound,
    ToolValidationFailed,
    ToolExecutionFailed,
    ToolTimeout,

    // Prompts
    PromptNotFound,
    PromptValidationFailed,
    PromptExecutionFailed,

    // Resources
    ResourceNotFound,
    ResourceValidationFailed,
    ResourceAccessDenied,
    ResourceUnavailable,
    ResourceReadFailed,

    // Server
    ServerInitializationFailed,
    ServerShutdownFailed,
    ServerOverloaded,
    SessionLimitExceeded,

    // Generic
    InvalidRequest,
    MethodNotFound,
    PayloadTooLarge,
    RequestTimeout,
    InternalError,
    ConfigurationError,
}

impl ErrorKind {
    /// Returns the stable code for this kind, e.g. `TOOL_NOT_FOUND`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransportConnectionFailed => "TRANSPORT_CONNECTION_FAILED",
            Self::TransportTimeout => "TRANSPORT_TIMEOUT",
            Self::TransportInvalidSession => "TRANSPORT_INVALID_SESSION",
            Self::TransportRateLimited => "TRANSPORT_RATE_LIMITED",
            Self::TransportClosed => "TRANSPORT_CLOSED",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::ToolValidationFailed => "TOOL_VALIDATION_FAILED",
            Self::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            Self::ToolTimeout => "TOOL_TIMEOUT",
            Self::PromptNotFound => "PROMPT_NOT_FOUND",
            Self::PromptValidationFailed => "PROMPT_VALIDATION_FAILED",
            Self::PromptExecutionFailed => "PROMPT_EXECUTION_FAILED",
            Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Self::ResourceValidationFailed => "RESOURCE_VALIDATION_FAILED",
            Self::ResourceAccessDenied => "RESOURCE_ACCESS_DENIED",
            Self::ResourceUnavailable => "RESOURCE_UNAVAILABLE",
            Self::ResourceReadFailed => "RESOURCE_READ_FAILED",
            Self::ServerInitializationFailed => "SERVER_INITIALIZATION_FAILED",
            Self::ServerShutdownFailed => "SERVER_SHUTDOWN_FAILED",
            Self::ServerOverloaded => "SERVER_OVERLOADED",
            Self::SessionLimitExceeded => "SESSION_LIMIT_EXCEEDED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
        }
    }

    /// Returns the subsystem this kind belongs to.
    #[must_use]
    pub const fn group(self) -> ErrorGroup {
        match self {
            Self::TransportConnectionFailed
            | Self::TransportTimeout
            | Self::TransportInvalidSession
            | Self::TransportRateLimited
            | Self::TransportClosed => ErrorGroup::Transport,
            Self::ToolNotFound
            | Self::ToolValidationFailed
            | Self::ToolExecutionFailed
            | Self::ToolTimeout => ErrorGroup::Tool,
            Self::PromptNotFound | Self::PromptValidationFailed | Self::PromptExecutionFailed => {
                ErrorGroup::Prompt
            }
            Self::ResourceNotFound
            | Self::ResourceValidationFailed
            | Self::ResourceAccessDenied
            | Self::ResourceUnavailable
            | Self::ResourceReadFailed => ErrorGroup::Resource,
            Self::ServerInitializationFailed
            | Self::ServerShutdownFailed
            | Self::ServerOverloaded
            | Self::SessionLimitExceeded => ErrorGroup::Server,
            Self::InvalidRequest
            | Self::MethodNotFound
            | Self::PayloadTooLarge
            | Self::RequestTimeout
            | Self::InternalError
            | Self::ConfigurationError => ErrorGroup::Generic,
        }
    }

    /// Default HTTP status for this kind.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self.group() {
            ErrorGroup::Transport => match self {
                Self::TransportRateLimited => 429,
                Self::TransportInvalidSession => 400,
                Self::TransportTimeout => 408,
                _ => 500,
            },
            ErrorGroup::Tool => match self {
                Self::ToolNotFound => 404,
                Self::ToolValidationFailed => 400,
                Self::ToolTimeout => 408,
                _ => 500,
            },
            ErrorGroup::Prompt => match self {
                Self::PromptNotFound => 404,
                Self::PromptValidationFailed => 400,
                _ => 500,
            },
            ErrorGroup::Resource => match self {
                Self::ResourceNotFound => 404,
                Self::ResourceValidationFailed => 400,
                Self::ResourceAccessDenied => 403,
                Self::ResourceUnavailable => 503,
                _ => 500,
            },
            ErrorGroup::Server => match self {
                Self::ServerOverloaded | Self::SessionLimitExceeded => 503,
                _ => 500,
            },
            ErrorGroup::Generic => match self {
                Self::InvalidRequest => 400,
                Self::MethodNotFound => 404,
                Self::PayloadTooLarge => 413,
                Self::RequestTimeout => 408,
                _ => 500,
            },
        }
    }

    /// JSON-RPC error code for this kind.
    #[must_use]
    pub const fn json_rpc_code(self) -> i32 {
        match self {
            Self::ToolValidationFailed
            | Self::PromptValidationFailed
            | Self::ResourceValidationFailed
            | Self::InvalidRequest
            | Self::TransportInvalidSession => -32600,
            Self::ToolNotFound
            | Self::PromptNotFound
            | Self::ResourceNotFound
            | Self::MethodNotFound => -32601,
            Self::ToolExecutionFailed | Self::PromptExecutionFailed | Self::ResourceReadFailed => {
                -32602
            }
            Self::ToolTimeout
            | Self::TransportTimeout
            | Self::RequestTimeout
            | Self::TransportRateLimited => -32000,
            _ => -32603,
        }
    }

    /// Whether this kind describes a timeout.
    #[must_use]
    pub const fn is_timeout(self) -> bool {
        matches!(
            self,
            Self::ToolTimeout | Self::TransportTimeout | Self::RequestTimeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalised error shape used at every boundary.
///
/// Immutable once constructed; the builder-style `with_*` methods consume and
/// return a new value.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct McpError {
    kind: ErrorKind,
    message: String,
    details: Option<Map<String, Value>>,
    timestamp: DateTime<Utc>,
    cause: Option<String>,
}

impl McpError {
    /// Creates a new error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
            cause: None,
        }
    }

    /// Attaches structured details. Non-object values are stored under `value`.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(match details {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        });
        self
    }

    /// Adds a single detail entry, keeping existing ones.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Records the full cause chain of the error being wrapped.
    #[must_use]
    pub fn with_cause(mut self, cause: &anyhow::Error) -> Self {
        self.cause = Some(format!("{cause:?}"));
        self
    }

    /// Internal error with a message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    /// Invalid request with a message.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// The error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured details, if any.
    #[must_use]
    pub const fn details(&self) -> Option<&Map<String, Value>> {
        self.details.as_ref()
    }

    /// When the error was created.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// HTTP status derived from the kind.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    /// JSON-RPC code derived from the kind.
    #[must_use]
    pub const fn json_rpc_code(&self) -> i32 {
        self.kind.json_rpc_code()
    }

    /// Converts a handler error into a normalised error.
    ///
    /// An error that already is an [`McpError`] is returned unchanged; anything
    /// else becomes `kind` with the original message and cause chain.
    #[must_use]
    pub fn normalize(err: anyhow::Error, kind: ErrorKind) -> Self {
        match err.downcast::<Self>() {
            Ok(normalized) => normalized,
            Err(raw) => Self::new(kind, raw.to_string()).with_cause(&raw),
        }
    }

    /// Produces the JSON-RPC error object for this error.
    ///
    /// `data` carries `errorKind`, `details` and `timestamp`; the cause chain
    /// is included under `stack` only when `include_stack` is set.
    #[must_use]
    pub fn to_wire_format(&self, include_stack: bool) -> JsonRpcErrorData {
        let mut data = json!({
            "errorKind": self.kind.as_str(),
            "details": self.details.clone().map_or(Value::Null, Value::Object),
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        if include_stack {
            if let (Some(cause), Some(obj)) = (&self.cause, data.as_object_mut()) {
                obj.insert("stack".to_string(), Value::String(cause.clone()));
            }
        }
        JsonRpcErrorData {
            code: self.json_rpc_code(),
            message: self.message.clone(),
            data: Some(data),
        }
    }
}

/// Returns the normalised error inside `err`, if it is one.
#[must_use]
pub fn as_normalized(err: &anyhow::Error) -> Option<&McpError> {
    err.downcast_ref::<McpError>()
}

/// Logs an error once, at a level chosen by its class. Never fails.
pub fn log_error(error: &McpError, context: Option<&str>) {
    let context = context.unwrap_or("-");
    let kind = error.kind().as_str();
    match error.http_status() {
        status if status >= 500 => tracing::error!(
            kind,
            context,
            status,
            details = ?error.details(),
            "{}",
            error.message()
        ),
        408 | 429 => tracing::warn!(kind, context, "{}", error.message()),
        _ => tracing::debug!(kind, context, "{}", error.message()),
    }
}

/// Races `future` against a timer.
///
/// The future is spawned onto the runtime so that losing the race abandons the
/// wait without cancelling the work: it keeps running to completion in the
/// background and any side effects it has still happen.
///
/// # Errors
///
/// Returns `RequestTimeout` (HTTP 408) if the timer fires first, the future's
/// own error if it fails, or `InternalError` if the spawned task panics.
pub async fn with_timeout<T, F>(future: F, duration: Duration, message: Option<&str>) -> McpResult<T>
where
    F: Future<Output = McpResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::spawn(future);
    tokio::select! {
        joined = &mut task => match joined {
            Ok(result) => result,
            Err(e) => Err(McpError::internal(format!("operation aborted: {e}"))),
        },
        () = tokio::time::sleep(duration) => {
            let message = message.map_or_else(
                || format!("Operation timed out after {}ms", duration.as_millis()),
                str::to_string,
            );
            Err(McpError::new(ErrorKind::RequestTimeout, message)
                .with_detail("timeoutMs", json!(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))))
        }
    }
}
