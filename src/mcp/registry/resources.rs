//! Resource registry: URI-addressed read-only data.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};

use super::{Registry, RegistryEntry};
use crate::mcp::error::{as_normalized, log_error, ErrorKind, McpError, McpResult};
use crate::mcp::schema::{describe_violations, Schema};

/// Boxed async resource reader. Receives the URI and the validated arguments.
pub type ResourceHandler =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Registry of resources keyed by URI.
pub type ResourceRegistry = Registry<Resource>;

/// A registered resource.
pub struct Resource {
    uri: String,
    name: String,
    description: String,
    mime_type: String,
    arguments: Schema,
    handler: ResourceHandler,
}

impl Resource {
    /// Creates a JSON resource that takes no arguments.
    pub fn new<F, Fut>(
        uri: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: description.into(),
            mime_type: "application/json".to_string(),
            arguments: Schema::empty_object(),
            handler: Arc::new(move |uri, args| handler(uri, args).boxed()),
        }
    }

    /// Overrides the advertised MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Declares the arguments a read accepts.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Schema) -> Self {
        self.arguments = arguments;
        self
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Public metadata for `resources/list`.
    #[must_use]
    pub fn definition(&self) -> ResourceDefinition {
        ResourceDefinition {
            uri: self.uri.clone(),
            name: self.name.clone(),
            description: Some(self.description.clone()).filter(|d| !d.is_empty()),
            mime_type: self.mime_type.clone(),
        }
    }
}

impl RegistryEntry for Resource {
    fn key(&self) -> &str {
        &self.uri
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub mime_type: String,
}

/// One block of resource content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

impl Registry<Resource> {
    /// Public metadata for every registered resource.
    #[must_use]
    pub fn list(&self) -> Vec<ResourceDefinition> {
        self.entries().iter().map(|r| r.definition()).collect()
    }

    /// Validates `args` and reads the resource at `uri`.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound`, `ResourceValidationFailed`, the handler's own
    /// [`McpError`] (e.g. `ResourceAccessDenied`), or `ResourceReadFailed`.
    pub async fn read_resource(&self, uri: &str, args: Value) -> McpResult<ReadResourceResult> {
        let Some(resource) = self.get(uri) else {
            return Err(
                McpError::new(ErrorKind::ResourceNotFound, format!("Resource not found: {uri}"))
                    .with_detail("uri", json!(uri)),
            );
        };

        let validated = resource.arguments.validate(&args).map_err(|violations| {
            McpError::new(
                ErrorKind::ResourceValidationFailed,
                format!(
                    "Invalid arguments for resource '{uri}': {}",
                    describe_violations(&violations)
                ),
            )
            .with_details(json!({
                "uri": uri,
                "input": args,
                "validationErrors": violations,
            }))
        })?;

        let value = match (resource.handler)(uri.to_string(), validated.clone()).await {
            Ok(value) => value,
            Err(err) => {
                if let Some(normalized) = as_normalized(&err) {
                    return Err(normalized.clone());
                }
                let wrapped = McpError::new(
                    ErrorKind::ResourceReadFailed,
                    format!("Failed to read resource: {err:#}"),
                )
                .with_details(json!({ "uri": uri, "input": validated }))
                .with_cause(&err);
                log_error(&wrapped, Some(uri));
                return Err(wrapped);
            }
        };

        let text = match value {
            Value::String(s) => s,
            other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
        };
        Ok(ReadResourceResult {
            contents: vec![ResourceContents {
                uri: uri.to_string(),
                mime_type: resource.mime_type.clone(),
                text,
            }],
        })
    }
}
