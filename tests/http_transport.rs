//! Integration tests for the HTTP transport.
//!
//! Routes are driven in-process through the full middleware stack; the
//! shutdown test runs a real listener.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use picnic_mcp::mcp::dispatcher::DispatchTimeouts;
use picnic_mcp::mcp::http::routes::SESSION_HEADER;
use picnic_mcp::mcp::http::{HttpServer, HttpSettings, SessionSettings};
use picnic_mcp::mcp::rate_limit::RateLimitSettings;
use picnic_mcp::mcp::registry::{Registries, Tool};
use picnic_mcp::mcp::schema::{Field, Schema};

fn settings() -> HttpSettings {
    HttpSettings {
        sessions: SessionSettings {
            max_sessions: 2,
            idle_timeout: Duration::from_secs(60),
        },
        max_body_bytes: 1024,
        rate_limit: None,
        ..HttpSettings::default()
    }
}

fn server(settings: HttpSettings) -> HttpServer {
    let registries = Registries::new();
    registries.tools.register(Tool::new(
        "echo",
        "Echo",
        Schema::object([Field::required("message", Schema::string())]),
        |input| async move { Ok(input["message"].clone()) },
    ));
    registries.tools.register(Tool::new(
        "slow",
        "Takes longer than any request may",
        Schema::empty_object(),
        |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("done"))
        },
    ));
    HttpServer::new(registries, DispatchTimeouts::default(), settings)
}

fn post(body: &Value, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json");
    if let Some(id) = session {
        builder = builder.header(SESSION_HEADER, id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn initialize() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": { "protocolVersion": "2025-03-26", "clientInfo": { "name": "test", "version": "1" } }
    })
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn open_session(app: &Router) -> String {
    let response = app.clone().oneshot(post(&initialize(), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.headers()[SESSION_HEADER].to_str().unwrap().to_string()
}

#[tokio::test]
async fn initialize_then_call_with_session() {
    let server = server(settings());
    let app = server.router();
    let session = open_session(&app).await;
    assert_eq!(server.sessions().session_count(), 1);

    let response = app
        .clone()
        .oneshot(post(
            &json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": { "name": "echo", "arguments": { "message": "hi" } }
            }),
            Some(session.as_str()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], 2);
    assert_eq!(body["result"]["content"][0]["text"], "hi");

    let accepted = app
        .oneshot(post(
            &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
            Some(session.as_str()),
        ))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn requests_without_a_valid_session_are_rejected() {
    let app = server(settings()).router();
    let list = json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" });

    for session in [None, Some("not-a-session")] {
        let response = app.clone().oneshot(post(&list, session)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["data"]["errorKind"], "TRANSPORT_INVALID_SESSION");
    }
}

#[tokio::test]
async fn session_limit_is_enforced() {
    let server = server(settings());
    let app = server.router();
    open_session(&app).await;
    let second = open_session(&app).await;

    let response = app.clone().oneshot(post(&initialize(), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["data"]["errorKind"], "SESSION_LIMIT_EXCEEDED");
    assert_eq!(body["error"]["data"]["details"]["maxSessions"], 2);

    let deleted = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/mcp")
                .header(SESSION_HEADER, &second)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    assert_eq!(server.sessions().session_count(), 1);

    open_session(&app).await;
}

#[tokio::test]
async fn failed_initialize_leaves_no_session() {
    let server = server(settings());
    let app = server.router();
    let response = app
        .oneshot(post(
            &json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }),
            None,
        ))
        .await
        .unwrap();
    assert!(!response.headers().contains_key(SESSION_HEADER));
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(server.sessions().session_count(), 0);
}

#[tokio::test]
async fn malformed_and_oversized_bodies() {
    let app = server(settings()).router();

    let malformed = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .body(Body::from("{ nope"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(malformed).await["error"]["code"], -32700);

    let huge = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping", "params": { "pad": "x".repeat(4096) } });
    let too_large = app.oneshot(post(&huge, None)).await.unwrap();
    assert_eq!(too_large.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(too_large).await;
    assert_eq!(body["error"]["data"]["errorKind"], "PAYLOAD_TOO_LARGE");
}

#[tokio::test]
async fn health_and_session_listing_are_read_only() {
    let server = server(HttpSettings {
        rate_limit: Some(RateLimitSettings::default()),
        ..settings()
    });
    let app = server.router();
    let session = open_session(&app).await;

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let body = body_json(health).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"]["active"], 1);
    assert_eq!(body["sessions"]["max"], 2);
    assert_eq!(body["rateLimit"]["totalIdentifiers"], 1);

    let listing = app
        .clone()
        .oneshot(Request::builder().uri("/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(listing).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["sessions"][0]["id"], session.as_str());
    assert_eq!(server.sessions().session_count(), 1);

    let removed = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/sessions/{session}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);
    assert_eq!(server.sessions().session_count(), 0);
}

#[tokio::test]
async fn rate_limited_requests_get_429() {
    let app = server(HttpSettings {
        rate_limit: Some(RateLimitSettings {
            window: Duration::from_secs(60),
            max_requests: 2,
        }),
        ..settings()
    })
    .router();

    let health = || {
        Request::builder()
            .uri("/health")
            .header("x-forwarded-for", "192.0.2.7")
            .body(Body::empty())
            .unwrap()
    };
    for remaining in ["1", "0"] {
        let ok = app.clone().oneshot(health()).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()["x-ratelimit-remaining"], remaining);
    }

    let denied = app.oneshot(health()).await.unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(denied.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn shutdown_tears_down_sessions_then_closes() {
    let server = server(settings());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let client = async {
        let response = reqwest::Client::new()
            .post(format!("http://{addr}/mcp"))
            .json(&initialize())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(response.headers().contains_key(SESSION_HEADER));
        stop_tx.send(()).unwrap();
    };
    let serving = server.serve_on(listener, async {
        let _ = stop_rx.await;
    });

    let ((), result) = tokio::join!(client, serving);
    result.unwrap();
    assert_eq!(server.sessions().session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_requests_time_out_with_408() {
    let app = server(HttpSettings {
        request_timeout: Duration::from_millis(100),
        ..settings()
    })
    .router();
    let session = open_session(&app).await;

    let response = app
        .oneshot(post(
            &json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": { "name": "slow" }
            }),
            Some(session.as_str()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["data"]["errorKind"], "REQUEST_TIMEOUT");
}

#[tokio::test]
async fn event_stream_needs_a_session_and_ends_on_delete() {
    let server = server(settings());
    let app = server.router();
    let get_events = |session: Option<&str>| {
        let mut builder = Request::builder().method("GET").uri("/mcp");
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder.body(Body::empty()).unwrap()
    };

    let rejected = app.clone().oneshot(get_events(None)).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(rejected).await["error"]["data"]["errorKind"],
        "TRANSPORT_INVALID_SESSION"
    );

    let session = open_session(&app).await;
    let stream = app.clone().oneshot(get_events(Some(session.as_str()))).await.unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    assert!(stream.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let deleted = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/mcp")
                .header(SESSION_HEADER, &session)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);

    let drained = tokio::time::timeout(Duration::from_secs(5), to_bytes(stream.into_body(), usize::MAX))
        .await
        .expect("event stream should end once the session is deleted");
    assert!(drained.unwrap().is_empty());
    assert_eq!(server.sessions().session_count(), 0);
}
