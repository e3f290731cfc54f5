//! picnic-mcp: MCP gateway for the Picnic grocery delivery service
//!
//! Exposes grocery operations (search, cart, delivery slots, orders) as MCP
//! tools, prompts and resources for AI assistants, over stdio or a
//! session-based HTTP transport.
//!
//! # Architecture
//!
//! The gateway core is transport agnostic:
//!
//! - **Registries**: schema-validated tools, prompts and resources
//! - **Dispatcher**: the MCP methods mapped onto the registries
//! - **Transports**: stdio (one client) or HTTP (sessions, rate limiting)
//!
//! The Picnic-specific handlers plug into the registries and are opaque to
//! the core.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Configuration error types
//! - [`mcp`]: MCP protocol, registries and transports
//! - [`picnic`]: Upstream client and grocery collaborators

pub mod config;
pub mod error;
pub mod mcp;
pub mod picnic;
