//! HTTP session lifecycle.
//!
//! A session is created by an `initialize` request, bound to its own
//! [`Dispatcher`], and kept alive by subsequent requests. It ends on an
//! explicit DELETE, after `idle_timeout` without requests, or on server
//! shutdown. Every ending goes through [`SessionManager::cleanup_session`],
//! which is idempotent.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::mcp::dispatcher::{DispatchTimeouts, Dispatcher};
use crate::mcp::error::{log_error, ErrorKind, McpError, McpResult};
use crate::mcp::protocol::OutgoingNotification;
use crate::mcp::registry::Registries;

/// Default cap on concurrently live sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 100;

/// Default idle time before a session is torn down.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const CHANNEL_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The client or an admin asked for it.
    Terminated,
    /// No request arrived within the idle timeout.
    IdleTimeout,
    /// The push channel closed underneath the session.
    ChannelClosed,
    /// The `initialize` request that created it failed.
    InitializeFailed,
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Terminated => "terminated",
            Self::IdleTimeout => "idle timeout",
            Self::ChannelClosed => "channel closed",
            Self::InitializeFailed => "initialize failed",
            Self::Shutdown => "shutdown",
        })
    }
}

/// Lifecycle notification for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created { session_id: String },
    Ended { session_id: String, reason: EndReason },
}

/// Server-to-client push channel of one session.
///
/// Closing drops the sender, which ends every subscribed event stream.
pub struct SessionChannel {
    sender: Mutex<Option<broadcast::Sender<OutgoingNotification>>>,
}

impl SessionChannel {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Subscribes to pushed notifications. `None` once closed.
    #[must_use]
    pub fn subscribe(&self) -> Option<broadcast::Receiver<OutgoingNotification>> {
        self.sender.lock().as_ref().map(broadcast::Sender::subscribe)
    }

    /// Pushes a notification, returning how many streams received it.
    ///
    /// # Errors
    ///
    /// Returns `TransportClosed` if the channel has been closed.
    pub fn send(&self, notification: OutgoingNotification) -> McpResult<usize> {
        let guard = self.sender.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| McpError::new(ErrorKind::TransportClosed, "Session channel is closed"))?;
        // No subscribers is not an error; the notification is simply dropped.
        Ok(sender.send(notification).unwrap_or(0))
    }

    /// Closes the channel.
    ///
    /// # Errors
    ///
    /// Returns `TransportClosed` if it was already closed.
    pub fn close(&self) -> McpResult<()> {
        self.sender
            .lock()
            .take()
            .map(drop)
            .ok_or_else(|| McpError::new(ErrorKind::TransportClosed, "Session channel already closed"))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

/// What a request handler needs from a live session.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    pub dispatcher: Arc<Dispatcher>,
    pub channel: Arc<SessionChannel>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Public view of a session for introspection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Session manager limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            idle_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

struct Session {
    dispatcher: Arc<Dispatcher>,
    channel: Arc<SessionChannel>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    timer: JoinHandle<()>,
}

impl Session {
    fn handle(&self, id: &str) -> SessionHandle {
        SessionHandle {
            id: id.to_string(),
            dispatcher: Arc::clone(&self.dispatcher),
            channel: Arc::clone(&self.channel),
        }
    }
}

struct Inner {
    sessions: Mutex<HashMap<String, Session>>,
    registries: Registries,
    timeouts: DispatchTimeouts,
    settings: SessionSettings,
    events: broadcast::Sender<SessionEvent>,
}

/// Owns every live HTTP session. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    #[must_use]
    pub fn new(registries: Registries, timeouts: DispatchTimeouts, settings: SessionSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                registries,
                timeouts,
                settings,
                events,
            }),
        }
    }

    #[must_use]
    pub fn settings(&self) -> SessionSettings {
        self.inner.settings
    }

    /// Observes session creation and teardown.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Creates a session with a fresh dispatcher and arms its idle timer.
    ///
    /// # Errors
    ///
    /// Returns `SessionLimitExceeded` if the maximum number of sessions is live.
    pub fn create_session(&self) -> McpResult<SessionHandle> {
        let max = self.inner.settings.max_sessions;
        let mut sessions = self.inner.sessions.lock();
        if sessions.len() >= max {
            return Err(McpError::new(
                ErrorKind::SessionLimitExceeded,
                format!("Maximum number of sessions ({max}) reached"),
            )
            .with_details(json!({ "maxSessions": max, "activeSessions": sessions.len() })));
        }

        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let now = Utc::now();
        let session = Session {
            dispatcher: Arc::new(Dispatcher::new(
                self.inner.registries.clone(),
                self.inner.timeouts,
            )),
            channel: Arc::new(SessionChannel::new()),
            created_at: now,
            last_activity: now,
            timer: self.arm_timer(&id),
        };
        let handle = session.handle(&id);
        sessions.insert(id.clone(), session);
        let active = sessions.len();
        drop(sessions);

        tracing::info!(session_id = %id, active, "session created");
        let _ = self.inner.events.send(SessionEvent::Created { session_id: id });
        Ok(handle)
    }

    /// Looks up a live session and restarts its idle timer.
    ///
    /// # Errors
    ///
    /// Returns `TransportInvalidSession` if no live session has this id.
    pub fn touch(&self, id: &str) -> McpResult<SessionHandle> {
        let mut sessions = self.inner.sessions.lock();
        let Some(session) = sessions.get_mut(id) else {
            return Err(invalid_session(id));
        };
        session.timer.abort();
        session.timer = self.arm_timer(id);
        session.last_activity = Utc::now();
        Ok(session.handle(id))
    }

    /// Tears a session down: timer cleared, entry removed, channel closed,
    /// `Ended` emitted. Returns `false` if it was already gone.
    pub fn cleanup_session(&self, id: &str, reason: EndReason) -> bool {
        let Some(session) = self.inner.sessions.lock().remove(id) else {
            tracing::debug!(session_id = %id, %reason, "session already cleaned up");
            return false;
        };

        // The idle timer is the caller in that case and finishes on its own.
        if reason != EndReason::IdleTimeout {
            session.timer.abort();
        }
        let _ = session.channel.close();

        tracing::info!(session_id = %id, %reason, "session ended");
        let _ = self.inner.events.send(SessionEvent::Ended {
            session_id: id.to_string(),
            reason,
        });
        true
    }

    /// Closes the session's channel, then tears it down whatever the close
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns `TransportInvalidSession` if no live session has this id.
    pub fn terminate_session(&self, id: &str) -> McpResult<()> {
        let channel = self
            .inner
            .sessions
            .lock()
            .get(id)
            .map(|session| Arc::clone(&session.channel))
            .ok_or_else(|| invalid_session(id))?;

        if let Err(err) = channel.close() {
            log_error(&err, Some(id));
        }
        self.cleanup_session(id, EndReason::Terminated);
        Ok(())
    }

    /// Tears down every live session. Failures are logged per session and
    /// never stop the others.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.inner.sessions.lock().keys().cloned().collect();
        if ids.is_empty() {
            return;
        }
        tracing::info!(count = ids.len(), "closing all sessions");

        let teardowns = ids.into_iter().map(|id| {
            let manager = self.clone();
            async move {
                let handle = tokio::spawn(async move {
                    manager.cleanup_session(&id, EndReason::Shutdown);
                });
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "session teardown failed");
                }
            }
        });
        futures::future::join_all(teardowns).await;
    }

    /// Pushes a notification to a session's event stream.
    ///
    /// # Errors
    ///
    /// `TransportInvalidSession` for unknown ids, `TransportClosed` if the
    /// channel has been closed.
    pub fn notify_session(&self, id: &str, notification: OutgoingNotification) -> McpResult<usize> {
        let channel = self
            .inner
            .sessions
            .lock()
            .get(id)
            .map(|session| Arc::clone(&session.channel))
            .ok_or_else(|| invalid_session(id))?;
        channel.send(notification)
    }

    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.inner
            .sessions
            .lock()
            .iter()
            .map(|(id, session)| SessionInfo {
                id: id.clone(),
                created_at: session.created_at,
                last_activity: session.last_activity,
            })
            .collect()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    fn arm_timer(&self, id: &str) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = id.to_string();
        let idle = self.inner.settings.idle_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            if let Some(inner) = weak.upgrade() {
                SessionManager { inner }.cleanup_session(&id, EndReason::IdleTimeout);
            }
        })
    }
}

fn invalid_session(id: &str) -> McpError {
    McpError::new(ErrorKind::TransportInvalidSession, "Invalid or expired session")
        .with_detail("sessionId", json!(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max_sessions: usize) -> SessionManager {
        SessionManager::new(
            Registries::new(),
            DispatchTimeouts::default(),
            SessionSettings {
                max_sessions,
                idle_timeout: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn limit_is_enforced_and_freed_by_teardown() {
        let manager = manager(2);
        let first = manager.create_session().unwrap();
        manager.create_session().unwrap();

        let err = manager.create_session().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionLimitExceeded);
        assert_eq!(err.http_status(), 503);

        assert!(manager.cleanup_session(&first.id, EndReason::Terminated));
        assert!(manager.create_session().is_ok());
    }

    #[tokio::test]
    async fn cleanup_twice_is_a_no_op() {
        let manager = manager(5);
        let mut events = manager.subscribe();
        let session = manager.create_session().unwrap();

        assert!(manager.cleanup_session(&session.id, EndReason::Terminated));
        assert!(!manager.cleanup_session(&session.id, EndReason::Terminated));
        assert_eq!(manager.session_count(), 0);

        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Created { .. }));
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Ended { .. }));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_sessions_are_invalid() {
        let manager = manager(5);
        let err = manager.touch("nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportInvalidSession);
        assert_eq!(err.http_status(), 400);
        assert!(manager.terminate_session("nope").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_expire() {
        let manager = manager(5);
        let mut events = manager.subscribe();
        let session = manager.create_session().unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(manager.session_count(), 0);
        assert!(session.channel.is_closed());

        events.recv().await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Ended {
                session_id: session.id,
                reason: EndReason::IdleTimeout,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn touching_restarts_the_idle_timer() {
        let manager = manager(5);
        let session = manager.create_session().unwrap();

        tokio::time::sleep(Duration::from_secs(45)).await;
        manager.touch(&session.id).unwrap();
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(manager.session_count(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn channel_close_is_reported_once() {
        let channel = SessionChannel::new();
        let mut rx = channel.subscribe().unwrap();
        assert_eq!(
            channel
                .send(OutgoingNotification::log_message("info", json!("hi")))
                .unwrap(),
            1
        );
        assert_eq!(rx.recv().await.unwrap().method, "notifications/message");

        channel.close().unwrap();
        assert_eq!(channel.close().unwrap_err().kind(), ErrorKind::TransportClosed);
        assert!(channel.subscribe().is_none());
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn terminate_closes_the_channel() {
        let manager = manager(5);
        let session = manager.create_session().unwrap();
        manager.terminate_session(&session.id).unwrap();
        assert!(session.channel.is_closed());
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn notify_reaches_subscribers() {
        let manager = manager(5);
        let session = manager.create_session().unwrap();
        let mut rx = session.channel.subscribe().unwrap();
        manager
            .notify_session(&session.id, OutgoingNotification::new("ping/me", None))
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().method, "ping/me");
        assert!(manager.notify_session("nope", OutgoingNotification::new("x", None)).is_err());
    }

    #[tokio::test]
    async fn shutdown_all_empties_the_map() {
        let manager = manager(5);
        let handles: Vec<_> = (0..3).map(|_| manager.create_session().unwrap()).collect();
        assert_eq!(manager.list_sessions().len(), 3);

        manager.shutdown_all().await;
        assert_eq!(manager.session_count(), 0);
        assert!(handles.iter().all(|h| h.channel.is_closed()));
    }

    #[tokio::test]
    async fn sessions_get_their_own_dispatcher() {
        let manager = manager(5);
        let a = manager.create_session().unwrap();
        let b = manager.create_session().unwrap();
        assert_ne!(a.id, b.id);
        assert!(!Arc::ptr_eq(&a.dispatcher, &b.dispatcher));
    }
}
