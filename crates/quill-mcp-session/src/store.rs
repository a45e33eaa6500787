//! In-memory session store.
//!
//! Sessions are kept in an `Arc<RwLock<HashMap>>` keyed by UUID v7 session
//! id (temporal ordering, collision resistant). Each record exclusively
//! owns its bound tool-server instance behind a per-session mutex, so
//! concurrent calls against one session queue instead of interleaving.
//! Recently reaped ids are remembered for a retention window so lookups
//! can distinguish an expired session from one that never existed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::instance::ToolServer;

/// Error type for session store operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session expired: {0}")]
    Expired(String),

    #[error("maximum sessions limit reached: {0}")]
    MaxSessionsReached(usize),
}

/// Session lifecycle state.
///
/// `Uninitialized` exists only between allocation and a successful
/// handshake; `Closed` is terminal and reached via explicit close or the
/// idle-timeout reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Open,
    Idle,
    Closed,
}

/// Configuration for [`InMemorySessionStore`] and its maintenance sweeps.
///
/// The timing values are deliberate configuration, not constants: deploys
/// tune them per topology.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum concurrent sessions (memory bound).
    pub max_sessions: usize,
    /// Inactivity after which an open session is marked idle.
    pub idle_after_ms: u64,
    /// Inactivity after which an idle session is reaped.
    pub session_ttl_ms: u64,
    /// Interval between reaper sweeps.
    pub reap_interval_ms: u64,
    /// How long reaped ids are remembered to answer "expired" lookups.
    pub closed_retention_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100_000,
            idle_after_ms: 5 * 60 * 1000,
            session_ttl_ms: 30 * 60 * 1000,
            reap_interval_ms: 60 * 1000,
            closed_retention_ms: 10 * 60 * 1000,
        }
    }
}

/// One session: id, timestamps, lifecycle state, and the exclusively
/// owned tool-server instance.
pub struct SessionRecord {
    session_id: String,
    created_at: u64,
    last_activity: AtomicU64,
    state: parking_lot::Mutex<SessionState>,
    instance: Mutex<Box<dyn ToolServer>>,
}

impl SessionRecord {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Transition to `Open` after a successful handshake.
    pub fn mark_open(&self) {
        *self.state.lock() = SessionState::Open;
    }

    /// Record activity now; an idle session is revived to open.
    pub fn touch(&self) {
        self.last_activity.store(now_millis(), Ordering::Relaxed);
        let mut state = self.state.lock();
        if *state == SessionState::Idle {
            *state = SessionState::Open;
        }
    }

    /// The single-flight guard around the bound instance: at most one
    /// in-flight call per session at a time.
    pub fn instance(&self) -> &Mutex<Box<dyn ToolServer>> {
        &self.instance
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }
}

/// Outcome of a session lookup.
#[derive(Clone)]
pub enum SessionLookup {
    Found(Arc<SessionRecord>),
    /// Previously existed and was closed or reaped.
    Closed,
    /// Never existed (or retention has elapsed).
    Missing,
}

/// Concurrency-safe in-memory session map.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionRecord>>>,
    closed: RwLock<HashMap<String, u64>>,
    config: SessionConfig,
}

impl InMemorySessionStore {
    /// Create a store with default configuration.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Create a store with custom configuration.
    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            closed: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Allocate a new session bound to `instance`.
    ///
    /// The record starts `Uninitialized`; the caller transitions it to
    /// `Open` once the handshake succeeds, or closes it on failure.
    pub async fn insert(
        &self,
        instance: Box<dyn ToolServer>,
    ) -> Result<Arc<SessionRecord>, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.config.max_sessions {
            return Err(SessionError::MaxSessionsReached(self.config.max_sessions));
        }

        let now = now_millis();
        let record = Arc::new(SessionRecord {
            session_id: Uuid::now_v7().to_string(),
            created_at: now,
            last_activity: AtomicU64::new(now),
            state: parking_lot::Mutex::new(SessionState::Uninitialized),
            instance: Mutex::new(instance),
        });
        sessions.insert(record.session_id.clone(), Arc::clone(&record));

        debug!(session_id = %record.session_id, "created session");
        Ok(record)
    }

    /// Look up a session, distinguishing expired from unknown ids.
    pub async fn lookup(&self, session_id: &str) -> SessionLookup {
        if let Some(record) = self.sessions.read().await.get(session_id) {
            return SessionLookup::Found(Arc::clone(record));
        }
        if self.closed.read().await.contains_key(session_id) {
            return SessionLookup::Closed;
        }
        SessionLookup::Missing
    }

    /// Close a session explicitly, releasing its instance.
    pub async fn close(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(record) => {
                record.set_state(SessionState::Closed);
                self.closed
                    .write()
                    .await
                    .insert(session_id.to_string(), now_millis());
                debug!(session_id, "closed session");
                true
            }
            None => false,
        }
    }

    /// One reaper pass: mark inactive open sessions idle, reap idle
    /// sessions past TTL. Returns the reaped ids.
    pub async fn sweep(&self, now: u64) -> Vec<String> {
        let mut reaped = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|session_id, record| {
                let idle_for = now.saturating_sub(record.last_activity());
                if idle_for >= self.config.session_ttl_ms {
                    record.set_state(SessionState::Closed);
                    reaped.push(session_id.clone());
                    false
                } else {
                    if idle_for >= self.config.idle_after_ms && record.state() == SessionState::Open
                    {
                        record.set_state(SessionState::Idle);
                        debug!(%session_id, "session marked idle");
                    }
                    true
                }
            });
        }

        if !reaped.is_empty() {
            let mut closed = self.closed.write().await;
            for session_id in &reaped {
                closed.insert(session_id.clone(), now);
            }
            info!(count = reaped.len(), "reaped expired sessions");
        }
        reaped
    }

    /// Drop closed-id tombstones older than the retention window.
    pub async fn prune_closed(&self, now: u64) -> usize {
        let mut closed = self.closed.write().await;
        let before = closed.len();
        closed.retain(|_, closed_at| {
            now.saturating_sub(*closed_at) < self.config.closed_retention_ms
        });
        before - closed.len()
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop all sessions and tombstones.
    pub async fn clear(&self) {
        self.sessions.write().await.clear();
        self.closed.write().await.clear();
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct EchoInstance;

    #[async_trait]
    impl ToolServer for EchoInstance {
        async fn handle(&mut self, message: Value) -> Result<Value, crate::BoxError> {
            Ok(json!({"echo": message}))
        }
    }

    fn boxed() -> Box<dyn ToolServer> {
        Box::new(EchoInstance)
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = InMemorySessionStore::new();

        let record = store.insert(boxed()).await.unwrap();
        assert_eq!(record.state(), SessionState::Uninitialized);
        record.mark_open();
        assert_eq!(record.state(), SessionState::Open);

        let session_id = record.session_id().to_string();
        assert!(matches!(store.lookup(&session_id).await, SessionLookup::Found(_)));

        assert!(store.close(&session_id).await);
        assert!(matches!(store.lookup(&session_id).await, SessionLookup::Closed));

        // After retention elapses the tombstone is pruned and the id
        // becomes indistinguishable from one that never existed.
        let later = now_millis() + store.config().closed_retention_ms + 1;
        store.prune_closed(later).await;
        assert!(matches!(store.lookup(&session_id).await, SessionLookup::Missing));
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let store = InMemorySessionStore::new();
        let a = store.insert(boxed()).await.unwrap();
        let b = store.insert(boxed()).await.unwrap();
        assert_ne!(a.session_id(), b.session_id());
        assert_eq!(store.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_max_sessions_cap() {
        let store = InMemorySessionStore::with_config(SessionConfig {
            max_sessions: 1,
            ..Default::default()
        });
        store.insert(boxed()).await.unwrap();
        let result = store.insert(boxed()).await;
        assert!(matches!(result, Err(SessionError::MaxSessionsReached(1))));
    }

    #[tokio::test]
    async fn test_sweep_marks_idle_then_reaps() {
        let config = SessionConfig::default();
        let store = InMemorySessionStore::with_config(config.clone());

        let record = store.insert(boxed()).await.unwrap();
        record.mark_open();
        let session_id = record.session_id().to_string();
        let now = now_millis();

        // Inactive past the idle threshold but not the TTL.
        record
            .last_activity
            .store(now - config.idle_after_ms - 1, Ordering::Relaxed);
        assert!(store.sweep(now).await.is_empty());
        assert_eq!(record.state(), SessionState::Idle);

        // Inactive past the TTL: reaped and remembered as closed.
        record
            .last_activity
            .store(now - config.session_ttl_ms - 1, Ordering::Relaxed);
        let reaped = store.sweep(now).await;
        assert_eq!(reaped, vec![session_id.clone()]);
        assert_eq!(record.state(), SessionState::Closed);
        assert!(matches!(store.lookup(&session_id).await, SessionLookup::Closed));
    }

    #[tokio::test]
    async fn test_touch_revives_idle_session() {
        let store = InMemorySessionStore::new();
        let record = store.insert(boxed()).await.unwrap();
        record.mark_open();

        let now = now_millis();
        record
            .last_activity
            .store(now - store.config().idle_after_ms - 1, Ordering::Relaxed);
        store.sweep(now).await;
        assert_eq!(record.state(), SessionState::Idle);

        record.touch();
        assert_eq!(record.state(), SessionState::Open);
        assert!(record.last_activity() >= now);
    }

    #[tokio::test]
    async fn test_single_flight_per_session() {
        let store = InMemorySessionStore::new();
        let record = store.insert(boxed()).await.unwrap();

        let guard = record.instance().lock().await;
        // A second caller must queue, not run concurrently.
        assert!(record.instance().try_lock().is_err());
        drop(guard);
        assert!(record.instance().try_lock().is_ok());
    }
}
