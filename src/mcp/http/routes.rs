//! Route handlers for the HTTP transport.
//!
//! `/mcp` multiplexes the protocol: POST carries requests and notifications,
//! GET opens the session's event stream, DELETE ends the session. `/health`
//! and `/sessions` are read-only introspection plus an admin teardown.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;

use super::middleware::HttpError;
use super::session::EndReason;
use super::AppState;
use crate::mcp::error::{ErrorKind, McpError};
use crate::mcp::protocol::{parse_value, JsonRpcError};

/// Header carrying the session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Interval between SSE keep-alive comments.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// POST /mcp
pub async fn post_mcp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    let msg = match serde_json::from_slice::<Value>(&body) {
        Ok(value) => parse_value(value),
        Err(_) => Err(JsonRpcError::parse_error()),
    };
    let msg = match msg {
        Ok(msg) => msg,
        Err(error) => return Ok((StatusCode::BAD_REQUEST, Json(error)).into_response()),
    };

    if msg.is_initialize() {
        let session = state.sessions.create_session()?;
        let Some(reply) = session.dispatcher.handle_message(msg).await else {
            return Err(McpError::internal("initialize produced no reply").into());
        };
        if reply.is_error() {
            state.sessions.cleanup_session(&session.id, EndReason::InitializeFailed);
            return Ok(Json(reply).into_response());
        }

        let mut response = Json(reply).into_response();
        let value = HeaderValue::from_str(&session.id)
            .map_err(|e| McpError::internal(format!("invalid session id: {e}")))?;
        response.headers_mut().insert(SESSION_HEADER, value);
        return Ok(response);
    }

    let session = state.sessions.touch(session_id(&headers)?)?;
    Ok(match session.dispatcher.handle_message(msg).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    })
}

/// GET /mcp
pub async fn get_mcp(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HttpError> {
    let session = state.sessions.touch(session_id(&headers)?)?;
    let receiver = session
        .channel
        .subscribe()
        .ok_or_else(|| McpError::new(ErrorKind::TransportClosed, "Session channel is closed"))?;
    tracing::debug!(session_id = %session.id, "event stream opened");

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(notification) => {
                    let event = Event::default()
                        .event("message")
                        .json_data(&notification)
                        .unwrap_or_else(|e| Event::default().comment(format!("dropped: {e}")));
                    return Some((Ok(event), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

/// DELETE /mcp
pub async fn delete_mcp(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, HttpError> {
    state.sessions.terminate_session(session_id(&headers)?)?;
    Ok(StatusCode::OK)
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": {
            "active": state.sessions.session_count(),
            "max": state.sessions.settings().max_sessions,
        },
        "rateLimit": state.limiter.as_ref().map(|limiter| limiter.stats()),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.sessions.list_sessions();
    Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

/// DELETE /sessions/{id}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, HttpError> {
    state.sessions.terminate_session(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

fn session_id(headers: &HeaderMap) -> Result<&str, HttpError> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            HttpError(McpError::new(
                ErrorKind::TransportInvalidSession,
                format!("Missing {SESSION_HEADER} header"),
            ))
        })
}
