//! Startup failures: loading, overriding and validating [`Config`].
//!
//! Anything that goes wrong once the server is running is an
//! [`McpError`](crate::mcp::error::McpError) instead. None of these messages
//! echo the Picnic auth token.
//!
//! [`Config`]: crate::config::Config

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("no configuration file at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("cannot read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON or an unknown key.
    #[error("{} is not a valid configuration: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An environment variable that cannot be converted to the setting's type.
    #[error("{variable}={value:?} is not {expected}")]
    Override {
        variable: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
