//! Model Context Protocol (MCP) gateway.
//!
//! Exposes grocery operations as tools, prompts and resources to AI clients
//! over JSON-RPC 2.0, either on stdio or on a session-based HTTP transport.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Transports                           │
//! │   ┌──────────────┐                  ┌──────────────────────┐  │
//! │   │ stdio server │                  │ HTTP (sessions, rate │  │
//! │   │  (1 client)  │                  │  limit, timeouts)    │  │
//! │   └──────┬───────┘                  └──────────┬───────────┘  │
//! │          │          one per connection         │              │
//! │          ▼                                     ▼              │
//! │   ┌──────────────────────────────────────────────────────┐    │
//! │   │                     Dispatcher                       │    │
//! │   └──────────────────────────┬───────────────────────────┘    │
//! │                              ▼                                │
//! │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐        │
//! │   │    Tools     │  │   Prompts    │  │  Resources   │ shared │
//! │   └──────────────┘  └──────────────┘  └──────────────┘        │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every failure that leaves this module is an [`McpError`].
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2025-03-26 and accepts
//! 2024-11-05.

pub mod dispatcher;
pub mod error;
pub mod http;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod schema;
pub mod server;
pub mod transport;

pub use dispatcher::{DispatchTimeouts, Dispatcher};
pub use error::{ErrorKind, McpError, McpResult};
pub use http::{HttpServer, HttpSettings};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use rate_limit::{RateLimitSettings, RateLimiter};
pub use registry::Registries;
pub use schema::{Field, Schema};
pub use server::McpServer;
pub use transport::StdioTransport;
