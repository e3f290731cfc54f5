//! Streamable HTTP transport.
//!
//! Clients open a session with an `initialize` POST to `/mcp` and quote the
//! returned `mcp-session-id` header on every later call. Each session gets its
//! own [`Dispatcher`](crate::mcp::dispatcher::Dispatcher) over the shared
//! registries.
//!
//! # Shutdown
//!
//! When the shutdown future resolves, every live session is torn down in
//! parallel, the rate limiter's sweep stops, and only then is the listener
//! asked to close. Closing is bounded by `shutdown_timeout`; running past it
//! is reported as `SERVER_SHUTDOWN_FAILED`.

pub mod middleware;
pub mod routes;
pub mod session;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::routing::{delete, get};
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::mcp::dispatcher::DispatchTimeouts;
use crate::mcp::error::{ErrorKind, McpError, McpResult};
use crate::mcp::rate_limit::{RateLimitSettings, RateLimiter};
use crate::mcp::registry::Registries;

pub use session::{EndReason, SessionEvent, SessionHandle, SessionInfo, SessionManager, SessionSettings};

/// HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
    pub sessions: SessionSettings,
    /// Wall-clock limit on a whole HTTP request.
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
    pub shutdown_timeout: Duration,
    /// Allowed origins; empty or `*` allows any.
    pub cors_origins: Vec<String>,
    /// `None` disables rate limiting.
    pub rate_limit: Option<RateLimitSettings>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            sessions: SessionSettings::default(),
            request_timeout: Duration::from_secs(90),
            max_body_bytes: 4 * 1024 * 1024,
            shutdown_timeout: Duration::from_secs(10),
            cors_origins: Vec::new(),
            rate_limit: Some(RateLimitSettings::default()),
        }
    }
}

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub limiter: Option<Arc<RateLimiter>>,
    pub started_at: Instant,
}

/// The HTTP MCP server.
pub struct HttpServer {
    settings: HttpSettings,
    state: AppState,
}

impl HttpServer {
    #[must_use]
    pub fn new(registries: Registries, timeouts: DispatchTimeouts, settings: HttpSettings) -> Self {
        let state = AppState {
            sessions: SessionManager::new(registries, timeouts, settings.sessions),
            limiter: settings.rate_limit.map(|s| Arc::new(RateLimiter::new(s))),
            started_at: Instant::now(),
        };
        Self { settings, state }
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.state.sessions
    }

    #[must_use]
    pub const fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// Builds the router with the full middleware stack.
    ///
    /// From the outside in: request logging, error normalisation, rate
    /// limiting, request timeout, CORS, body size limit, routes.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route(
                "/mcp",
                get(routes::get_mcp).post(routes::post_mcp).delete(routes::delete_mcp),
            )
            .route("/health", get(routes::health))
            .route("/sessions", get(routes::list_sessions))
            .route("/sessions/{id}", delete(routes::delete_session))
            .with_state(self.state.clone())
            .layer(DefaultBodyLimit::max(self.settings.max_body_bytes))
            .layer(self.cors())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                self.settings.request_timeout,
            ));

        if let Some(limiter) = &self.state.limiter {
            router = router.layer(axum::middleware::from_fn_with_state(
                Arc::clone(limiter),
                middleware::rate_limit,
            ));
        }

        router
            .layer(axum::middleware::from_fn(middleware::normalize_errors))
            .layer(axum::middleware::from_fn(middleware::log_requests))
    }

    fn cors(&self) -> CorsLayer {
        let origins = &self.settings.cors_origins;
        let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
            AllowOrigin::from(Any)
        } else {
            AllowOrigin::list(
                origins
                    .iter()
                    .filter_map(|o| HeaderValue::from_str(o).ok()),
            )
        };

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any)
            .expose_headers([
                HeaderName::from_static(routes::SESSION_HEADER),
                header::RETRY_AFTER,
                HeaderName::from_static("x-ratelimit-limit"),
                HeaderName::from_static("x-ratelimit-remaining"),
                HeaderName::from_static("x-ratelimit-reset"),
            ])
    }

    /// Binds `host:port` and serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// `SERVER_INITIALIZATION_FAILED` if the address cannot be bound, or any
    /// error from [`serve_on`](Self::serve_on).
    pub async fn serve<F>(&self, shutdown: F) -> McpResult<()>
    where
        F: Future<Output = ()>,
    {
        let address = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            McpError::new(
                ErrorKind::ServerInitializationFailed,
                format!("Failed to bind {address}: {e}"),
            )
            .with_details(json!({ "host": self.settings.host, "port": self.settings.port }))
        })?;
        self.serve_on(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// `SERVER_SHUTDOWN_FAILED` if the listener does not close within the
    /// shutdown timeout, `SERVER_INITIALIZATION_FAILED` if the server stops
    /// on its own with an I/O error.
    pub async fn serve_on<F>(&self, listener: TcpListener, shutdown: F) -> McpResult<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr().map_err(|e| {
            McpError::new(ErrorKind::ServerInitializationFailed, format!("No local address: {e}"))
        })?;
        if let Some(limiter) = &self.state.limiter {
            limiter.start_sweep();
        }

        let app = self.router();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });
        tracing::info!(address = %local, "HTTP server listening");

        tokio::pin!(shutdown);
        tokio::select! {
            () = &mut shutdown => {}
            joined = &mut server => {
                self.release();
                return match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(McpError::new(
                        ErrorKind::ServerInitializationFailed,
                        format!("HTTP server stopped: {e}"),
                    )),
                    Err(e) => Err(McpError::internal(format!("HTTP server task failed: {e}"))),
                };
            }
        }

        tracing::info!(
            sessions = self.state.sessions.session_count(),
            "shutting down HTTP server"
        );
        self.state.sessions.shutdown_all().await;
        self.release();
        let _ = stop_tx.send(());

        let limit = self.settings.shutdown_timeout;
        match tokio::time::timeout(limit, &mut server).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!("HTTP server stopped");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(McpError::new(
                ErrorKind::ServerShutdownFailed,
                format!("HTTP server failed while closing: {e}"),
            )),
            Ok(Err(e)) => Err(McpError::new(
                ErrorKind::ServerShutdownFailed,
                format!("HTTP server task failed: {e}"),
            )),
            Err(_) => {
                server.abort();
                Err(McpError::new(
                    ErrorKind::ServerShutdownFailed,
                    format!("HTTP server did not close within {}ms", limit.as_millis()),
                )
                .with_detail("timeoutMs", json!(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))))
            }
        }
    }

    fn release(&self) {
        if let Some(limiter) = &self.state.limiter {
            limiter.destroy();
        }
    }
}
