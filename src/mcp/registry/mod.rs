//! Schema-validated registries for tools, prompts and resources.
//!
//! A [`Registry`] is an insertion-ordered map of named entries behind a
//! read-write lock. It is built once at start-up, shared behind an `Arc` by
//! every session, and holds no per-session state. Registering a name that
//! already exists replaces the previous entry in place.
//!
//! The entry-specific operations (`execute`, `execute_prompt`,
//! `read_resource`) live in the [`tools`], [`prompts`] and [`resources`]
//! modules. Each one follows the same pipeline: look up, validate the raw
//! input against the entry's [`Schema`](crate::mcp::schema::Schema), invoke
//! the handler, and normalise every failure into an
//! [`McpError`](crate::mcp::error::McpError).

pub mod prompts;
pub mod resources;
pub mod tools;

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

pub use prompts::{Prompt, PromptRegistry};
pub use resources::{Resource, ResourceRegistry};
pub use tools::{Tool, ToolRegistry};

/// An entry that can be stored in a [`Registry`].
pub trait RegistryEntry: Send + Sync + 'static {
    /// The unique lookup key (tool name, prompt name or resource URI).
    fn key(&self) -> &str;
}

/// Named entries in insertion order.
pub struct Registry<E> {
    entries: RwLock<IndexMap<String, Arc<E>>>,
}

impl<E: RegistryEntry> Registry<E> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Stores `entry` under its key, replacing any entry with the same key.
    pub fn register(&self, entry: E) {
        let key = entry.key().to_string();
        let replaced = self.entries.write().insert(key.clone(), Arc::new(entry));
        if replaced.is_some() {
            tracing::debug!(key, "replaced existing registry entry");
        }
    }

    /// Looks up an entry by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<E>> {
        self.entries.read().get(key).cloned()
    }

    /// Snapshot of all entries. Callers must not rely on the order.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<E>> {
        self.entries.read().values().cloned().collect()
    }

    /// Keys of all registered entries.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<E: RegistryEntry> Default for Registry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three registries a dispatcher serves from.
#[derive(Clone, Default)]
pub struct Registries {
    /// Tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Prompt registry.
    pub prompts: Arc<PromptRegistry>,
    /// Resource registry.
    pub resources: Arc<ResourceRegistry>,
}

impl Registries {
    /// Creates three empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
