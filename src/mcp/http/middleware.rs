//! Request middleware for the HTTP transport.
//!
//! Layered outermost first: request logging, error normalisation, rate
//! limiting, then the wall-clock timeout, CORS and body limit set up in
//! [`super::HttpServer::router`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::mcp::error::{log_error, ErrorKind, McpError};
use crate::mcp::protocol::JsonRpcError;
use crate::mcp::rate_limit::RateLimiter;

/// An [`McpError`] rendered as an HTTP response.
///
/// The status comes from the error kind and the body is a JSON-RPC error
/// object without an id.
#[derive(Debug)]
pub struct HttpError(pub McpError);

impl From<McpError> for HttpError {
    fn from(err: McpError) -> Self {
        Self(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(JsonRpcError::from_mcp(None, &self.0))).into_response()
    }
}

/// Logs method, path, status and latency of every request.
pub async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    tracing::debug!(%method, %path, "request received");
    let response = next.run(request).await;

    let status = response.status().as_u16();
    let latency_ms = started.elapsed().as_millis();
    if response.status().is_server_error() {
        tracing::warn!(%method, %path, status, latency_ms, "request failed");
    } else {
        tracing::info!(%method, %path, status, latency_ms, "request completed");
    }
    response
}

/// Turns error responses produced outside the handlers (timeouts, oversized
/// bodies, unknown routes, extractor rejections) into JSON-RPC error bodies.
pub async fn normalize_errors(request: Request<Body>, next: Next) -> Response {
    let response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) || is_json(response.headers()) {
        return response;
    }

    let (kind, message) = match status {
        StatusCode::REQUEST_TIMEOUT => (ErrorKind::RequestTimeout, "Request timed out"),
        StatusCode::PAYLOAD_TOO_LARGE => (ErrorKind::PayloadTooLarge, "Request body too large"),
        StatusCode::NOT_FOUND => (ErrorKind::MethodNotFound, "Route not found"),
        StatusCode::METHOD_NOT_ALLOWED => (ErrorKind::MethodNotFound, "Method not allowed"),
        s if s.is_client_error() => (ErrorKind::InvalidRequest, "Invalid request"),
        _ => (ErrorKind::InternalError, "Internal server error"),
    };
    let err = McpError::new(kind, message).with_detail("status", json!(status.as_u16()));
    log_error(&err, Some("http"));

    // Keep the original status.
    let mut normalized = HttpError(err).into_response();
    *normalized.status_mut() = status;
    normalized
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

/// Fixed-window rate limiting keyed by client address.
///
/// Allowed responses carry `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
/// `X-RateLimit-Reset` (unix seconds). Denied requests get a 429 with
/// `Retry-After` and never reach the handlers.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&request);
    let decision = limiter.check_limit(&client);
    let reset_in = i64::try_from(decision.reset_after().as_millis().div_ceil(1000)).unwrap_or(i64::MAX);
    let reset_at = Utc::now().timestamp().saturating_add(reset_in);

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        let retry_after = decision.retry_after_secs();
        let err = McpError::new(ErrorKind::TransportRateLimited, "Too many requests")
            .with_details(json!({
                "limit": decision.limit,
                "retryAfter": retry_after,
            }));
        log_error(&err, Some(&client));
        let mut denied = HttpError(err).into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            denied.headers_mut().insert(header::RETRY_AFTER, value);
        }
        denied
    };

    let headers = response.headers_mut();
    for (name, value) in [
        ("x-ratelimit-limit", u64::from(decision.limit).to_string()),
        ("x-ratelimit-remaining", u64::from(decision.remaining).to_string()),
        ("x-ratelimit-reset", reset_at.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    response
}

/// Identifies the caller: the peer address when known, else the first
/// `x-forwarded-for` hop, else `"unknown"`.
fn client_key<B>(request: &Request<B>) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or("unknown")
        .to_string()
}
