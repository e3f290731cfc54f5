//! The shape of `config.json`.
//!
//! Every field has a default, so `{}` is a complete file. Unknown keys are
//! rejected at every level to catch typos early.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::dispatcher::DispatchTimeouts;
use crate::mcp::http::{HttpSettings, SessionSettings};
use crate::mcp::rate_limit::RateLimitSettings;

/// Country codes the upstream storefront serves.
pub const SUPPORTED_COUNTRIES: &[&str] = &["NL", "DE", "BE"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    // Editor hints, accepted and discarded.
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Upstream grocery API settings.
    #[serde(default)]
    pub picnic: PicnicConfig,

    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Rate limiting for the HTTP transport.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-method dispatch timeouts.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Checks cross-field constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let country = self.picnic.country_code.to_uppercase();
        if !SUPPORTED_COUNTRIES.contains(&country.as_str()) {
            return Err(invalid(format!(
                "Unsupported country code '{}'. Must be one of: {}",
                self.picnic.country_code,
                SUPPORTED_COUNTRIES.join(", ")
            )));
        }
        if self.picnic.api_version.trim().is_empty() {
            return Err(invalid("picnic.api_version must not be empty"));
        }
        if self.http.port == 0 {
            return Err(invalid("http.port must be greater than 0"));
        }
        if self.http.max_sessions == 0 {
            return Err(invalid("http.max_sessions must be greater than 0"));
        }
        if self.http.session_timeout_ms == 0 {
            return Err(invalid("http.session_timeout_ms must be greater than 0"));
        }
        if self.http.max_body_bytes == 0 {
            return Err(invalid("http.max_body_bytes must be greater than 0"));
        }
        if self.rate_limit.enabled && (self.rate_limit.window_ms == 0 || self.rate_limit.max_requests == 0) {
            return Err(invalid(
                "rate_limit.window_ms and rate_limit.max_requests must be greater than 0",
            ));
        }
        if self.http.request_timeout_ms <= self.dispatch.tool_timeout_ms {
            return Err(invalid(format!(
                "http.request_timeout_ms ({}) must be longer than dispatch.tool_timeout_ms ({})",
                self.http.request_timeout_ms, self.dispatch.tool_timeout_ms
            )));
        }
        Ok(())
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds a value of the wrong type.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides looked up by variable name.
    ///
    /// Recognised: `PICNIC_AUTH_TOKEN`, `PICNIC_COUNTRY_CODE`,
    /// `PICNIC_API_VERSION`, `ENABLE_HTTP_SERVER`, `HTTP_HOST`, `HTTP_PORT`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds a value of the wrong type.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("PICNIC_AUTH_TOKEN").filter(|t| !t.is_empty()) {
            self.picnic.auth_token = Some(token);
        }
        if let Some(country) = lookup("PICNIC_COUNTRY_CODE") {
            self.picnic.country_code = country.to_uppercase();
        }
        if let Some(version) = lookup("PICNIC_API_VERSION") {
            self.picnic.api_version = version;
        }
        if let Some(enabled) = lookup("ENABLE_HTTP_SERVER") {
            self.http.enabled = parse_bool(&enabled).ok_or(ConfigError::Override {
                variable: "ENABLE_HTTP_SERVER",
                value: enabled,
                expected: "true or false",
            })?;
        }
        if let Some(host) = lookup("HTTP_HOST") {
            self.http.host = host;
        }
        if let Some(port) = lookup("HTTP_PORT") {
            self.http.port = port.parse().map_err(|_| ConfigError::Override {
                variable: "HTTP_PORT",
                value: port,
                expected: "a port number",
            })?;
        }
        Ok(())
    }

    /// Per-method timeouts for the dispatcher.
    #[must_use]
    pub const fn dispatch_timeouts(&self) -> DispatchTimeouts {
        DispatchTimeouts {
            tool: Duration::from_millis(self.dispatch.tool_timeout_ms),
            prompt: Duration::from_millis(self.dispatch.prompt_timeout_ms),
            resource: Duration::from_millis(self.dispatch.resource_timeout_ms),
        }
    }

    /// Settings for the HTTP transport.
    #[must_use]
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            host: self.http.host.clone(),
            port: self.http.port,
            sessions: SessionSettings {
                max_sessions: self.http.max_sessions,
                idle_timeout: Duration::from_millis(self.http.session_timeout_ms),
            },
            request_timeout: Duration::from_millis(self.http.request_timeout_ms),
            max_body_bytes: self.http.max_body_bytes,
            shutdown_timeout: Duration::from_millis(self.http.shutdown_timeout_ms),
            cors_origins: self.http.cors_origins.clone(),
            rate_limit: self.rate_limit.enabled.then(|| RateLimitSettings {
                window: Duration::from_millis(self.rate_limit.window_ms),
                max_requests: self.rate_limit.max_requests,
            }),
        }
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Upstream grocery API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PicnicConfig {
    /// Two-letter storefront country. Default: "NL"
    #[serde(default = "default_country_code")]
    pub country_code: String,

    /// Storefront API version. Default: "15"
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Pre-issued `x-picnic-auth` token.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Overrides the storefront URL derived from country and version.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for PicnicConfig {
    fn default() -> Self {
        Self {
            country_code: default_country_code(),
            api_version: default_api_version(),
            auth_token: None,
            base_url: None,
        }
    }
}

fn default_country_code() -> String {
    "NL".to_string()
}

fn default_api_version() -> String {
    "15".to_string()
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Serve HTTP instead of stdio.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Idle time before a session is dropped. Default: 30 minutes
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Wall-clock limit on one HTTP request. Default: 90 seconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Allowed CORS origins. Empty allows any.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            session_timeout_ms: default_session_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_sessions() -> usize {
    100
}

const fn default_session_timeout_ms() -> u64 {
    30 * 60 * 1000
}

const fn default_request_timeout_ms() -> u64 {
    90_000
}

const fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

const fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

/// Rate limit configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_window_ms() -> u64 {
    60_000
}

const fn default_max_requests() -> u32 {
    100
}

/// Dispatch timeout configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,

    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,

    #[serde(default = "default_resource_timeout_ms")]
    pub resource_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms: default_tool_timeout_ms(),
            prompt_timeout_ms: default_prompt_timeout_ms(),
            resource_timeout_ms: default_resource_timeout_ms(),
        }
    }
}

const fn default_tool_timeout_ms() -> u64 {
    60_000
}

const fn default_prompt_timeout_ms() -> u64 {
    30_000
}

const fn default_resource_timeout_ms() -> u64 {
    30_000
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Used when neither `-v` nor `-q` is given.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn parse_minimal_config() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.picnic.country_code, "NL");
        assert!(!config.http.enabled);
        assert!(config.rate_limit.enabled);
        assert_eq!(config.dispatch.tool_timeout_ms, 60_000);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "picnic": {
                "country_code": "DE",
                "api_version": "17",
                "auth_token": "secret",
                "base_url": "http://localhost:9999"
            },
            "http": {
                "enabled": true,
                "host": "0.0.0.0",
                "port": 8080,
                "max_sessions": 5,
                "session_timeout_ms": 1000,
                "request_timeout_ms": 120000,
                "max_body_bytes": 1024,
                "shutdown_timeout_ms": 500,
                "cors_origins": ["https://example.com"]
            },
            "rate_limit": { "enabled": false, "window_ms": 1000, "max_requests": 3 },
            "dispatch": { "tool_timeout_ms": 5000, "prompt_timeout_ms": 100, "resource_timeout_ms": 200 },
            "logging": { "level": "debug" }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.picnic.auth_token.as_deref(), Some("secret"));

        let http = config.http_settings();
        assert_eq!(http.port, 8080);
        assert_eq!(http.sessions.max_sessions, 5);
        assert_eq!(http.sessions.idle_timeout, Duration::from_secs(1));
        assert!(http.rate_limit.is_none());

        let timeouts = config.dispatch_timeouts();
        assert_eq!(timeouts.tool, Duration::from_secs(5));
        assert_eq!(timeouts.resource, Duration::from_millis(200));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn reject_unsupported_country() {
        let config: Config = serde_json::from_str(r#"{"picnic": {"country_code": "FR"}}"#).unwrap();
        let Err(ConfigError::Invalid(message)) = config.validate() else {
            panic!("expected validation error");
        };
        assert!(message.contains("FR"));
    }

    #[test]
    fn reject_zero_limits() {
        for json in [
            r#"{"http": {"port": 0}}"#,
            r#"{"http": {"max_sessions": 0}}"#,
            r#"{"rate_limit": {"max_requests": 0}}"#,
            r#"{"rate_limit": {"window_ms": 0}}"#,
        ] {
            let config: Config = serde_json::from_str(json).unwrap();
            assert!(config.validate().is_err(), "{json} should be rejected");
        }
    }

    #[test]
    fn disabled_rate_limit_skips_its_checks() {
        let config: Config =
            serde_json::from_str(r#"{"rate_limit": {"enabled": false, "max_requests": 0}}"#).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn request_timeout_must_exceed_tool_timeout() {
        let config: Config = serde_json::from_str(
            r#"{"http": {"request_timeout_ms": 60000}, "dispatch": {"tool_timeout_ms": 60000}}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("PICNIC_AUTH_TOKEN", "tok"),
                ("PICNIC_COUNTRY_CODE", "de"),
                ("ENABLE_HTTP_SERVER", "true"),
                ("HTTP_HOST", "0.0.0.0"),
                ("HTTP_PORT", "4000"),
            ]))
            .unwrap();

        assert_eq!(config.picnic.auth_token.as_deref(), Some("tok"));
        assert_eq!(config.picnic.country_code, "DE");
        assert!(config.http.enabled);
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.http.port, 4000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_env_values_are_rejected() {
        let mut config = Config::default();
        let Err(ConfigError::Override { variable, .. }) =
            config.apply_overrides(env(&[("HTTP_PORT", "http")]))
        else {
            panic!("expected HTTP_PORT to be rejected");
        };
        assert_eq!(variable, "HTTP_PORT");
        assert!(config.apply_overrides(env(&[("ENABLE_HTTP_SERVER", "maybe")])).is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let result: Result<Config, _> = serde_json::from_str(r#"{"unknown_field": "value"}"#);
        assert!(result.is_err());
        let nested: Result<Config, _> = serde_json::from_str(r#"{"http": {"bogus": 1}}"#);
        assert!(nested.is_err());
    }
}
