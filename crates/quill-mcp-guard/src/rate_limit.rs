//! Fixed-window request rate limiting.
//!
//! Counters are fixed-window rather than sliding or token-bucket: a key
//! may burst up to 2x the nominal rate across a window boundary, in
//! exchange for O(active keys) memory and O(1) work per check. A
//! background task evicts entries whose window has expired, so no entry
//! outlives its window plus one cleanup interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

/// Error type for rate-limit failures
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded, retry in {wait_ms} ms")]
    Exceeded {
        /// Advisory wait until the current window resets.
        wait_ms: u64,
    },
}

/// Configuration for [`RateLimiter`]
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per key per window.
    pub max_requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Interval between eviction sweeps in milliseconds.
    pub cleanup_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

/// Partial configuration merged by [`RateLimiter::configure`]
#[derive(Debug, Clone, Default)]
pub struct RateLimitUpdate {
    pub max_requests: Option<u32>,
    pub window_ms: Option<u64>,
    pub cleanup_interval_ms: Option<u64>,
}

/// Read-only view of one key's window, returned by [`RateLimiter::status`]
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Unix millis at which the window resets.
    pub reset_at: u64,
}

/// Optional key transformation applied before lookup.
///
/// Call sites close over whatever request context they hold when deriving
/// the raw key, so the generator itself stays a plain string transform.
pub type KeyGenerator = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_reset: u64,
}

struct LimiterState {
    config: RateLimitConfig,
    entries: HashMap<String, RateLimitEntry>,
}

impl LimiterState {
    fn evict_expired(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.window_reset > now);
        before - self.entries.len()
    }
}

/// Per-key fixed-window request throttle.
///
/// Checks are in-memory and non-blocking (the counter mutex is never held
/// across an await point), so the limiter is safe to consult from any
/// request task. Must be constructed inside a Tokio runtime; call
/// [`RateLimiter::dispose`] on shutdown to release the cleanup task.
pub struct RateLimiter {
    state: Arc<Mutex<LimiterState>>,
    key_generator: Option<KeyGenerator>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a limiter and start its eviction sweep.
    pub fn new(config: RateLimitConfig) -> Self {
        let state = Arc::new(Mutex::new(LimiterState {
            config,
            entries: HashMap::new(),
        }));
        let cleanup_task = spawn_cleanup(Arc::clone(&state));
        Self {
            state,
            key_generator: None,
            cleanup_task: Mutex::new(Some(cleanup_task)),
        }
    }

    /// Create a limiter whose keys are transformed before lookup.
    pub fn with_key_generator(config: RateLimitConfig, key_generator: KeyGenerator) -> Self {
        let mut limiter = Self::new(config);
        limiter.key_generator = Some(key_generator);
        limiter
    }

    fn derive_key(&self, key: &str) -> String {
        match &self.key_generator {
            Some(generator) => generator(key),
            None => key.to_string(),
        }
    }

    /// Count one request against `key`.
    ///
    /// Exactly `max_requests` calls succeed inside one window; the next
    /// call fails with the advisory wait until the window resets.
    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        let key = self.derive_key(key);
        let now = now_millis();
        let mut state = self.state.lock();
        let (max_requests, window_ms) = (state.config.max_requests, state.config.window_ms);

        let entry = state.entries.entry(key).or_insert(RateLimitEntry {
            count: 0,
            window_reset: now + window_ms,
        });
        if now >= entry.window_reset {
            entry.count = 0;
            entry.window_reset = now + window_ms;
        }
        entry.count += 1;

        if entry.count > max_requests {
            let wait_ms = entry.window_reset.saturating_sub(now);
            return Err(RateLimitError::Exceeded { wait_ms });
        }
        Ok(())
    }

    /// Inspect a key's window without counting a request.
    pub fn status(&self, key: &str) -> RateLimitStatus {
        let key = self.derive_key(key);
        let now = now_millis();
        let state = self.state.lock();
        let limit = state.config.max_requests;

        match state.entries.get(&key) {
            Some(entry) if now < entry.window_reset => RateLimitStatus {
                current: entry.count.min(limit),
                limit,
                remaining: limit.saturating_sub(entry.count),
                reset_at: entry.window_reset,
            },
            _ => RateLimitStatus {
                current: 0,
                limit,
                remaining: limit,
                reset_at: now + state.config.window_ms,
            },
        }
    }

    /// Merge a partial configuration update at runtime.
    ///
    /// A changed cleanup interval takes effect on the sweep's next tick.
    pub fn configure(&self, update: RateLimitUpdate) {
        let mut state = self.state.lock();
        if let Some(max_requests) = update.max_requests {
            state.config.max_requests = max_requests;
        }
        if let Some(window_ms) = update.window_ms {
            state.config.window_ms = window_ms;
        }
        if let Some(cleanup_interval_ms) = update.cleanup_interval_ms {
            state.config.cleanup_interval_ms = cleanup_interval_ms;
        }
    }

    /// Clear all entries.
    pub fn reset(&self) {
        self.state.lock().entries.clear();
    }

    /// Stop the cleanup task and clear state. Must be called on shutdown
    /// to release the timer resource.
    pub fn dispose(&self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
        self.state.lock().entries.clear();
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }
    }
}

fn spawn_cleanup(state: Arc<Mutex<LimiterState>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let interval_ms = state.lock().config.cleanup_interval_ms;
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;

            let now = now_millis();
            let evicted = state.lock().evict_expired(now);
            if evicted > 0 {
                debug!(evicted, "evicted expired rate-limit entries");
            }
        }
    })
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
