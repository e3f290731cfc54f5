//! Where settings come from.
//!
//! Precedence, lowest first: built-in defaults, the JSON file, environment
//! variables, then CLI flags (applied by the binary). With no explicit path
//! the file is `~/.picnic-mcp/config.json` (`%USERPROFILE%` on Windows) and
//! may be absent.

mod settings;

pub use settings::{
    Config, DispatchConfig, HttpConfig, LoggingConfig, PicnicConfig, RateLimitConfig,
    SUPPORTED_COUNTRIES,
};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".picnic-mcp"))
}

#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|dir| dir.join("config.json"))
}

/// Resolves the file (if any), layers the environment on top and validates.
///
/// # Errors
///
/// Any [`ConfigError`]; a missing file is only an error when `path` was given.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let file = match path {
        Some(explicit) => Some(explicit.to_path_buf()),
        None => default_config_path().filter(|p| p.is_file()),
    };
    let mut config = file.as_deref().map_or_else(|| Ok(Config::default()), read_config)?;

    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Parses one file as-is: no environment, no validation.
///
/// # Errors
///
/// [`ConfigError::NotFound`], [`ConfigError::Read`] or [`ConfigError::Parse`].
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let owned = || path.to_path_buf();
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound { path: owned() }
        } else {
            ConfigError::Read { path: owned(), source }
        }
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: owned(), source })
}
