//! Picnic grocery collaborators.
//!
//! The [`GroceryApi`] trait is the only thing the tools, prompts and
//! resources know about the upstream service; [`PicnicClient`] implements it
//! over HTTP.

pub mod client;
pub mod prompts;
pub mod resources;
pub mod tools;

use std::sync::Arc;

pub use client::{GroceryApi, PicnicClient};

use crate::mcp::registry::Registries;

/// Registers every tool, prompt and resource backed by `api`.
pub fn register_all(registries: &Registries, api: &Arc<dyn GroceryApi>) {
    tools::register_tools(&registries.tools, api);
    prompts::register_prompts(&registries.prompts);
    resources::register_resources(&registries.resources, api);
    tracing::debug!(
        tools = registries.tools.len(),
        prompts = registries.prompts.len(),
        resources = registries.resources.len(),
        "registered Picnic collaborators"
    );
}
