//! Prompt registry: parameterised message templates.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};

use super::{Registry, RegistryEntry};
use crate::mcp::error::{as_normalized, log_error, ErrorKind, McpError, McpResult};
use crate::mcp::schema::{describe_violations, Schema};

/// Boxed async prompt handler.
pub type PromptHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Vec<PromptMessage>>> + Send + Sync>;

/// Registry of prompts keyed by name.
pub type PromptRegistry = Registry<Prompt>;

/// Speaker of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Content of a prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptContent {
    Text { text: String },
}

/// One message of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: PromptContent,
}

impl PromptMessage {
    /// A user message with text content.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: PromptContent::Text { text: text.into() },
        }
    }

    /// An assistant message with text content.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: PromptContent::Text { text: text.into() },
        }
    }
}

/// A declared prompt argument, derived from the argument schema.
#[derive(Debug, Clone, Serialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

/// Public metadata for `prompts/list`.
#[derive(Debug, Clone, Serialize)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
}

/// Result of `prompts/get`.
#[derive(Debug, Clone, Serialize)]
pub struct PromptResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

/// A registered prompt.
pub struct Prompt {
    name: String,
    description: String,
    arguments: Schema,
    handler: PromptHandler,
}

impl Prompt {
    /// Creates a prompt. `arguments` must be an object schema.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        arguments: Schema,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<PromptMessage>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            arguments,
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }

    /// Prompt name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Public metadata for `prompts/list`.
    #[must_use]
    pub fn definition(&self) -> PromptDefinition {
        PromptDefinition {
            name: self.name.clone(),
            description: Some(self.description.clone()).filter(|d| !d.is_empty()),
            arguments: self
                .arguments
                .fields()
                .map(|field| PromptArgument {
                    name: field.name().to_string(),
                    description: field.schema().description().map(str::to_string),
                    required: field.is_required(),
                })
                .collect(),
        }
    }
}

impl RegistryEntry for Prompt {
    fn key(&self) -> &str {
        &self.name
    }
}

impl Registry<Prompt> {
    /// Public metadata for every registered prompt.
    #[must_use]
    pub fn list(&self) -> Vec<PromptDefinition> {
        self.entries().iter().map(|prompt| prompt.definition()).collect()
    }

    /// Validates `args` and renders the named prompt.
    ///
    /// # Errors
    ///
    /// `PromptNotFound`, `PromptValidationFailed`, the handler's own
    /// [`McpError`], or `PromptExecutionFailed` for any other handler error.
    pub async fn execute_prompt(&self, name: &str, args: Value) -> McpResult<PromptResult> {
        let Some(prompt) = self.get(name) else {
            return Err(
                McpError::new(ErrorKind::PromptNotFound, format!("Prompt not found: {name}"))
                    .with_detail("promptName", json!(name)),
            );
        };

        let validated = prompt.arguments.validate(&args).map_err(|violations| {
            McpError::new(
                ErrorKind::PromptValidationFailed,
                format!(
                    "Invalid arguments for prompt '{name}': {}",
                    describe_violations(&violations)
                ),
            )
            .with_details(json!({
                "promptName": name,
                "input": args,
                "validationErrors": violations,
            }))
        })?;

        match (prompt.handler)(validated.clone()).await {
            Ok(messages) => Ok(PromptResult {
                description: Some(prompt.description.clone()).filter(|d| !d.is_empty()),
                messages,
            }),
            Err(err) => {
                if let Some(normalized) = as_normalized(&err) {
                    return Err(normalized.clone());
                }
                let wrapped = McpError::new(
                    ErrorKind::PromptExecutionFailed,
                    format!("Prompt execution failed: {err:#}"),
                )
                .with_details(json!({ "promptName": name, "input": validated }))
                .with_cause(&err);
                log_error(&wrapped, Some(name));
                Err(wrapped)
            }
        }
    }
}
