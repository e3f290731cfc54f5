//! picnic-mcp: MCP gateway for the Picnic grocery delivery service
//!
//! Serves grocery tools to AI assistants over stdio (default) or HTTP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use picnic_mcp::config::{self, Config};
use picnic_mcp::mcp::http::HttpServer;
use picnic_mcp::mcp::registry::Registries;
use picnic_mcp::mcp::server::{shutdown_signal, McpServer};
use picnic_mcp::picnic::{self, GroceryApi, PicnicClient};

/// MCP gateway for the Picnic grocery delivery service.
///
/// Exposes product search, cart management and delivery planning as tools
/// for AI assistants.
#[derive(Parser, Debug)]
#[command(name = "picnic-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Serve over HTTP instead of stdio
    #[arg(long)]
    http: bool,

    /// HTTP listen address
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// HTTP listen port
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn apply(&self, cfg: &mut Config) {
        if self.http {
            cfg.http.enabled = true;
        }
        if let Some(host) = &self.host {
            cfg.http.host.clone_from(host);
        }
        if let Some(port) = self.port {
            cfg.http.port = port;
        }
    }
}

/// `-q` wins over `-v`; with neither, the configured level applies.
fn log_level(verbose: u8, quiet: bool, configured: &str) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => configured.parse().unwrap_or(Level::WARN),
        (false, 1) => Level::INFO,
        (false, 2) => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Stdout belongs to the protocol in stdio mode, so logs always go to stderr.
fn init_tracing(level: Level) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load(args: &Args) -> Result<Config, String> {
    let config_path = args.config.as_deref();
    let mut cfg = config::load_config(config_path).map_err(|e| format!("Configuration error: {e}"))?;
    args.apply(&mut cfg);
    cfg.validate().map_err(|e| format!("Configuration error: {e}"))?;
    Ok(cfg)
}

/// Entry point for the picnic-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    let cfg = match load(&args) {
        Ok(cfg) => cfg,
        Err(message) => {
            eprintln!("{message}");
            if args.config.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfig is read from: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };

    init_tracing(log_level(args.verbose, args.quiet, &cfg.logging.level));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        country = %cfg.picnic.country_code,
        "Starting picnic-mcp server"
    );

    let client = match PicnicClient::new(&cfg.picnic) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create Picnic client");
            return ExitCode::FAILURE;
        }
    };
    if !client.is_authenticated() {
        warn!("No Picnic auth token configured; grocery tools will fail until PICNIC_AUTH_TOKEN is set");
    }

    let registries = Registries::new();
    let api: Arc<dyn GroceryApi> = Arc::new(client);
    picnic::register_all(&registries, &api);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let timeouts = cfg.dispatch_timeouts();
    let result = if cfg.http.enabled {
        let server = HttpServer::new(registries, timeouts, cfg.http_settings());
        runtime
            .block_on(server.serve(shutdown_signal()))
            .map_err(|e| e.to_string())
    } else {
        info!("MCP server ready on stdio, waiting for client connection...");
        let server = McpServer::new(registries, timeouts);
        runtime.block_on(server.run()).map_err(|e| e.to_string())
    };

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn verbosity_overrides_config_level() {
        assert_eq!(log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(log_level(0, false, "nonsense"), Level::WARN);
        assert_eq!(log_level(2, false, "error"), Level::DEBUG);
        assert_eq!(log_level(3, true, "trace"), Level::ERROR);
    }

    #[test]
    fn cli_flags_override_config() {
        let args = Args::parse_from(["picnic-mcp", "--http", "--host", "0.0.0.0", "--port", "8080"]);
        let mut cfg = Config::default();
        args.apply(&mut cfg);
        assert!(cfg.http.enabled);
        assert_eq!(cfg.http.host, "0.0.0.0");
        assert_eq!(cfg.http.port, 8080);
    }
}
