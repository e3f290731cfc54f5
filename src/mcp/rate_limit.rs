//! Fixed-window request rate limiting.
//!
//! Each identifier (by default the client address) gets a counter that lives
//! for one window. The first request in a window opens it, requests up to
//! `max_requests` are allowed, and everything after that is denied until the
//! window ends. A background sweep drops expired windows so memory is bounded
//! by the number of recently active identifiers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How often expired windows are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Maps a raw identifier to the key the limiter counts under.
pub type KeyFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Limiter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Length of one counting window.
    pub window: Duration,
    /// Requests allowed per identifier per window.
    pub max_requests: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    end: Instant,
}

/// Outcome of a [`RateLimiter::check_limit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    /// When the identifier's current window ends.
    pub reset_at: Instant,
}

impl RateLimitDecision {
    /// Time until the window resets, zero if it already has.
    #[must_use]
    pub fn reset_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }

    /// Whole seconds a denied client should wait, at least one.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_after().as_millis().div_ceil(1000).max(1).try_into().unwrap_or(u64::MAX)
    }
}

/// Snapshot of limiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStats {
    /// Identifiers currently tracked, expired or not.
    pub total_identifiers: usize,
    /// Identifiers whose window is still open.
    pub active_identifiers: usize,
    /// Sum of counts over every tracked entry, including expired windows that
    /// have not been swept yet. A historical total, not the current load.
    pub total_requests: u64,
}

/// Fixed-window rate limiter.
pub struct RateLimiter {
    settings: RateLimitSettings,
    key_fn: Option<KeyFn>,
    windows: Mutex<HashMap<String, Window>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("settings", &self.settings)
            .field("tracked", &self.windows.lock().len())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter. No sweep runs until [`start_sweep`](Self::start_sweep).
    #[must_use]
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            key_fn: None,
            windows: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Counts identifiers under `key_fn(identifier)` instead of the raw value.
    #[must_use]
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    #[must_use]
    pub const fn settings(&self) -> RateLimitSettings {
        self.settings
    }

    /// Records a request from `identifier` and decides whether it may proceed.
    pub fn check_limit(&self, identifier: &str) -> RateLimitDecision {
        let key = self
            .key_fn
            .as_ref()
            .map_or_else(|| identifier.to_string(), |f| f(identifier));
        let max = self.settings.max_requests;
        let now = Instant::now();
        let fresh = Window {
            count: 1,
            end: now + self.settings.window,
        };

        let mut windows = self.windows.lock();
        let window = windows.entry(key).or_insert(Window { count: 0, ..fresh });

        if window.count == 0 || now >= window.end {
            *window = fresh;
            return RateLimitDecision {
                allowed: true,
                remaining: max.saturating_sub(1),
                limit: max,
                reset_at: window.end,
            };
        }

        if window.count >= max {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                limit: max,
                reset_at: window.end,
            };
        }

        window.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: max - window.count,
            limit: max,
            reset_at: window.end,
        }
    }

    /// Forgets the window for `identifier`.
    pub fn reset(&self, identifier: &str) {
        let key = self
            .key_fn
            .as_ref()
            .map_or_else(|| identifier.to_string(), |f| f(identifier));
        self.windows.lock().remove(&key);
    }

    /// Drops every expired window, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, window| now < window.end);
        before - windows.len()
    }

    /// Starts the periodic sweep. Calling it again replaces the running sweep.
    pub fn start_sweep(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            // Skip first tick which fires immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    break;
                };
                let removed = limiter.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "rate limiter sweep removed expired windows");
                }
            }
        });
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    #[must_use]
    pub fn stats(&self) -> RateLimitStats {
        let now = Instant::now();
        let windows = self.windows.lock();
        RateLimitStats {
            total_identifiers: windows.len(),
            active_identifiers: windows.values().filter(|w| now < w.end).count(),
            total_requests: windows.values().map(|w| u64::from(w.count)).sum(),
        }
    }

    /// Stops the sweep and clears all state. Safe to call more than once.
    pub fn destroy(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.windows.lock().clear();
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}
