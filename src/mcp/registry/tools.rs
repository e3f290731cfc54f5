//! Tool registry: named async operations with validated input.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};

use super::{Registry, RegistryEntry};
use crate::mcp::error::{as_normalized, log_error, ErrorKind, McpError, McpResult};
use crate::mcp::schema::{describe_violations, Schema};

/// Boxed async tool handler.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Registry of tools keyed by name.
pub type ToolRegistry = Registry<Tool>;

/// A registered tool.
pub struct Tool {
    name: String,
    description: String,
    input_schema: Schema,
    output_schema: Option<Schema>,
    handler: ToolHandler,
}

impl Tool {
    /// Creates a tool from a name, description, input schema and async handler.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Schema,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
            handler: Arc::new(move |input| handler(input).boxed()),
        }
    }

    /// Declares a schema the handler's result must satisfy.
    #[must_use]
    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Public metadata for `tools/list`.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: Some(self.description.clone()).filter(|d| !d.is_empty()),
            input_schema: self.input_schema.to_json_schema(),
        }
    }
}

impl RegistryEntry for Tool {
    fn key(&self) -> &str {
        &self.name
    }
}

/// One entry of `tools/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rendered from the tool's [`Schema`].
    pub input_schema: Value,
}

/// A content block of a `tools/call` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    /// Set for failures reported in-band.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires fn(&T) -> bool
const fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolCallResult {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A single text block with `isError: true`.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Text of the first content block.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|ToolContent::Text { text }| text.as_str())
    }
}

/// A pre-formatted tool failure.
///
/// Handlers return this (through `anyhow`) when they want full control over
/// the error payload the client sees; it is passed through untouched.
#[derive(Debug, Clone)]
pub struct ToolFailure(pub ToolCallResult);

impl ToolFailure {
    /// A failure with a single text block.
    #[must_use]
    pub fn text(message: impl Into<String>) -> Self {
        Self(ToolCallResult::error(message))
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.first_text().unwrap_or("tool failure"))
    }
}

impl std::error::Error for ToolFailure {}

/// Formats a handler result as a single text block.
///
/// Strings are used verbatim, objects and arrays are pretty-printed, and other
/// values use their plain string form.
#[must_use]
pub fn format_tool_result(value: &Value) -> ToolCallResult {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        Value::Number(n) if n.is_f64() => n.as_f64().map_or_else(|| n.to_string(), |f| f.to_string()),
        other => other.to_string(),
    };
    ToolCallResult::text(text)
}

impl Registry<Tool> {
    /// Public metadata for every registered tool.
    #[must_use]
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.entries().iter().map(|tool| tool.definition()).collect()
    }

    /// Validates `input`, runs the named tool and formats its result.
    ///
    /// A [`ToolFailure`] raised by the handler is returned as an `Ok` error
    /// payload.
    ///
    /// # Errors
    ///
    /// - `ToolNotFound` if no tool has this name
    /// - `ToolValidationFailed` if `input` violates the input schema
    /// - the handler's own [`McpError`], unchanged
    /// - `ToolExecutionFailed` for any other handler error or invalid output
    pub async fn execute(&self, name: &str, input: Value) -> McpResult<ToolCallResult> {
        let Some(tool) = self.get(name) else {
            return Err(
                McpError::new(ErrorKind::ToolNotFound, format!("Tool not found: {name}"))
                    .with_details(json!({
                        "toolName": name,
                        "availableTools": self.keys(),
                    })),
            );
        };

        let validated = tool.input_schema.validate(&input).map_err(|violations| {
            McpError::new(
                ErrorKind::ToolValidationFailed,
                format!(
                    "Invalid input for tool '{name}': {}",
                    describe_violations(&violations)
                ),
            )
            .with_details(json!({
                "toolName": name,
                "input": input,
                "validationErrors": violations,
            }))
        })?;

        let output = match (tool.handler)(validated.clone()).await {
            Ok(output) => output,
            Err(err) => {
                if let Some(failure) = err.downcast_ref::<ToolFailure>() {
                    tracing::debug!(tool = name, "tool returned a formatted failure");
                    return Ok(failure.0.clone());
                }
                if let Some(normalized) = as_normalized(&err) {
                    log_error(normalized, Some(name));
                    return Err(normalized.clone());
                }
                let wrapped = McpError::new(
                    ErrorKind::ToolExecutionFailed,
                    format!("Tool execution failed: {err:#}"),
                )
                .with_details(json!({ "toolName": name, "input": validated }))
                .with_cause(&err);
                log_error(&wrapped, Some(name));
                return Err(wrapped);
            }
        };

        if let Some(schema) = &tool.output_schema {
            if let Err(violations) = schema.validate(&output) {
                let error = McpError::new(
                    ErrorKind::ToolExecutionFailed,
                    format!(
                        "Tool '{name}' produced invalid output: {}",
                        describe_violations(&violations)
                    ),
                )
                .with_details(json!({ "toolName": name, "validationErrors": violations }));
                log_error(&error, Some(name));
                return Err(error);
            }
        }

        Ok(format_tool_result(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::schema::Field;

    fn echo_tool() -> Tool {
        Tool::new(
            "echo",
            "Echo a message",
            Schema::object([Field::required("message", Schema::string())]),
            |input| async move { Ok(input["message"].clone()) },
        )
    }

    fn div_tool() -> Tool {
        Tool::new(
            "div",
            "Divide a by b",
            Schema::object([
                Field::required("a", Schema::number()),
                Field::required("b", Schema::number()),
            ]),
            |input| async move {
                let a = input["a"].as_f64().unwrap_or_default();
                let b = input["b"].as_f64().unwrap_or_default();
                if b == 0.0 {
                    anyhow::bail!("Division by zero");
                }
                Ok(json!(a / b))
            },
        )
    }

    #[tokio::test]
    async fn echo_returns_text_verbatim() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool());
        let result = registry.execute("echo", json!({"message": "hi"})).await.unwrap();
        assert_eq!(result, ToolCallResult::text("hi"));
    }

    #[tokio::test]
    async fn div_formats_integral_floats_plainly() {
        let registry = ToolRegistry::new();
        registry.register(div_tool());
        let result = registry.execute("div", json!({"a": 4, "b": 2})).await.unwrap();
        assert_eq!(result.first_text(), Some("2"));
    }

    #[tokio::test]
    async fn div_by_zero_is_wrapped_as_execution_failure() {
        let registry = ToolRegistry::new();
        registry.register(div_tool());
        let err = registry.execute("div", json!({"a": 4, "b": 0})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecutionFailed);
        assert!(err.message().contains("Division by zero"));
        assert_eq!(err.details().unwrap()["input"], json!({"a": 4, "b": 0}));
    }

    #[tokio::test]
    async fn unknown_tool_lists_known_names() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool());
        let err = registry.execute("nope", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolNotFound);
        assert_eq!(err.details().unwrap()["availableTools"], json!(["echo"]));
    }

    #[tokio::test]
    async fn validation_lists_every_violation() {
        let registry = ToolRegistry::new();
        registry.register(div_tool());
        let err = registry.execute("div", json!({"a": "x"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolValidationFailed);
        let violations = err.details().unwrap()["validationErrors"].as_array().unwrap();
        assert_eq!(violations.len(), 2);
        assert!(err.message().contains("a: Expected number"));
        assert!(err.message().contains("b: Required"));
    }

    #[tokio::test]
    async fn normalised_handler_errors_pass_through() {
        let registry = ToolRegistry::new();
        registry.register(Tool::new("guarded", "", Schema::empty_object(), |_| async {
            Err(McpError::new(ErrorKind::ResourceAccessDenied, "not allowed").into())
        }));
        let err = registry.execute("guarded", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceAccessDenied);
    }

    #[tokio::test]
    async fn formatted_failures_become_error_payloads() {
        let registry = ToolRegistry::new();
        registry.register(Tool::new("picky", "", Schema::empty_object(), |_| async {
            Err(ToolFailure::text("Cart is locked").into())
        }));
        let result = registry.execute("picky", json!({})).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("Cart is locked"));
    }

    #[tokio::test]
    async fn output_schema_violations_are_execution_failures() {
        let registry = ToolRegistry::new();
        registry.register(
            Tool::new("count", "", Schema::empty_object(), |_| async { Ok(json!("three")) })
                .with_output_schema(Schema::integer()),
        );
        let err = registry.execute("count", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecutionFailed);
        assert!(err.message().contains("invalid output"));
    }

    #[test]
    fn objects_are_pretty_printed() {
        let result = format_tool_result(&json!({"a": 1}));
        assert_eq!(result.first_text(), Some("{\n  \"a\": 1\n}"));
        assert_eq!(format_tool_result(&json!(true)).first_text(), Some("true"));
        assert_eq!(format_tool_result(&json!(null)).first_text(), Some("null"));
        assert_eq!(format_tool_result(&json!(0.5)).first_text(), Some("0.5"));
    }

    #[test]
    fn list_exports_json_schema() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool());
        let tools = registry.list();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].input_schema["required"], json!(["message"]));
    }
}
