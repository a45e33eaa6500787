//! Session transport manager: persistent, session-affine handling.
//!
//! Owns the session store and a periodic reaper. Handshakes mint a new
//! session bound to a fresh tool-server instance; continuations route to
//! the bound instance through its single-flight mutex. The reaper runs as
//! an owned, cancellable task: acquired on `start()`, released on
//! `stop()`, and it never surfaces errors into request paths.

use std::sync::Arc;
use std::time::Duration;

use hyper::HeaderMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use quill_mcp_session::{InMemorySessionStore, ServerFactory, SessionError, SessionLookup};

use crate::{RequestContext, TransportError};

/// Response to a handshake: the body plus the newly minted session id.
#[derive(Debug, Clone)]
pub struct SessionResponse {
    pub body: Value,
    pub session_id: String,
}

/// Manager for stateful, session-affine request handling.
pub struct SessionTransportManager {
    store: Arc<InMemorySessionStore>,
    factory: ServerFactory,
    reaper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SessionTransportManager {
    pub fn new(store: Arc<InMemorySessionStore>, factory: ServerFactory) -> Self {
        Self {
            store,
            factory,
            reaper: parking_lot::Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<InMemorySessionStore> {
        &self.store
    }

    /// Handle a handshake: allocate a session, bind a fresh instance,
    /// forward the body, and transition the session to open.
    pub async fn initialize_and_handle(
        &self,
        headers: &HeaderMap,
        body: Value,
        ctx: &RequestContext,
    ) -> Result<SessionResponse, TransportError> {
        let user_agent = headers
            .get(hyper::header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("unknown");

        let instance = (self.factory)().await.map_err(|e| {
            TransportError::Internal(format!("server instance construction failed: {e}"))
        })?;
        let record = self.store.insert(instance).await?;

        debug!(
            session_id = %record.session_id(),
            request_id = %ctx.request_id(),
            user_agent,
            "handshake: bound new tool-server instance"
        );

        let response = {
            let mut instance = record.instance().lock().await;
            instance.handle(body).await
        };

        match response {
            Ok(body) => {
                record.mark_open();
                info!(session_id = %record.session_id(), "session open");
                Ok(SessionResponse {
                    body,
                    session_id: record.session_id().to_string(),
                })
            }
            Err(e) => {
                // The id was never disclosed to the client; drop the session.
                self.store.close(record.session_id()).await;
                Err(TransportError::Protocol(format!("handshake failed: {e}")))
            }
        }
    }

    /// Handle a continuation call against an existing session.
    ///
    /// Access to the bound instance is serialized: a concurrent call to
    /// the same session queues on the per-session mutex rather than
    /// interleaving with this one.
    pub async fn handle_request(
        &self,
        _headers: &HeaderMap,
        body: Value,
        ctx: &RequestContext,
        session_id: &str,
    ) -> Result<Value, TransportError> {
        let record = match self.store.lookup(session_id).await {
            SessionLookup::Found(record) => record,
            SessionLookup::Closed => {
                warn!(session_id, request_id = %ctx.request_id(), "continuation for expired session");
                return Err(SessionError::Expired(session_id.to_string()).into());
            }
            SessionLookup::Missing => {
                warn!(session_id, request_id = %ctx.request_id(), "continuation for unknown session");
                return Err(SessionError::NotFound(session_id.to_string()).into());
            }
        };

        record.touch();
        let response = {
            let mut instance = record.instance().lock().await;
            instance
                .handle(body)
                .await
                .map_err(|e| TransportError::Internal(e.to_string()))?
        };
        record.touch();
        Ok(response)
    }

    /// Close a session explicitly. Returns false when the id is unknown.
    pub async fn close_session(&self, session_id: &str) -> bool {
        self.store.close(session_id).await
    }

    /// Start the periodic reaper. Idempotent; a second call is a no-op.
    pub fn start(&self) {
        let mut reaper = self.reaper.lock();
        if reaper.is_some() {
            return;
        }

        let store = Arc::clone(&self.store);
        let interval_ms = store.config().reap_interval_ms;
        *reaper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                let now = chrono::Utc::now().timestamp_millis() as u64;
                let reaped = store.sweep(now).await;
                for session_id in &reaped {
                    debug!(%session_id, "reaped idle session");
                }
                store.prune_closed(now).await;
            }
        }));
    }

    /// Stop the reaper. Must be called on shutdown.
    pub fn stop(&self) {
        if let Some(task) = self.reaper.lock().take() {
            task.abort();
        }
    }
}

impl Drop for SessionTransportManager {
    fn drop(&mut self) {
        if let Some(task) = self.reaper.lock().take() {
            task.abort();
        }
    }
}
