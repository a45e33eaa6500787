//! Transport middleware: the routing orchestrator.
//!
//! For every inbound call: extract and sanitize the session id header,
//! mint the request context, classify the body as handshake or
//! continuation, consult the configured mode, and dispatch to the
//! appropriate manager. The outcome carries the response body, the
//! originating context, and (for stateful handshakes) the newly minted
//! session id for the outer layer to serialize.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::HeaderMap;
use quill_mcp_guard::sanitize_for_logging;
use serde_json::Value;
use tracing::debug;

use crate::config::SessionMode;
use crate::context::RequestContext;
use crate::protocol::{self, CallKind, RpcRequest};
use crate::session_manager::SessionTransportManager;
use crate::stateless::StatelessTransportManager;
use crate::TransportError;

/// Outcome of a dispatched call, handed back to the HTTP layer.
#[derive(Debug)]
pub struct Dispatch {
    /// The context the call ran under.
    pub context: RequestContext,
    /// Response body to serialize.
    pub body: Value,
    /// Newly minted session id (stateful handshakes only).
    pub session_id: Option<String>,
}

/// Routes calls between the session and stateless transport managers.
pub struct TransportMiddleware {
    mode: SessionMode,
    session_manager: Arc<SessionTransportManager>,
    stateless_manager: Arc<StatelessTransportManager>,
    request_timeout: Option<Duration>,
}

impl TransportMiddleware {
    pub fn new(
        mode: SessionMode,
        session_manager: Arc<SessionTransportManager>,
        stateless_manager: Arc<StatelessTransportManager>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            mode,
            session_manager,
            stateless_manager,
            request_timeout,
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Classify and route one call.
    ///
    /// Routing policy:
    /// - mode `stateless` -> stateless manager, handshake or not;
    /// - mode `stateful` + handshake -> session manager mints a session;
    /// - mode `stateful` + continuation + session id -> session manager;
    /// - mode `stateful` + continuation without a session id -> stateless
    ///   fallback (graceful degradation rather than hard failure).
    pub async fn dispatch(
        &self,
        headers: &HeaderMap,
        request: RpcRequest,
    ) -> Result<Dispatch, TransportError> {
        request.validate()?;

        let session_id = match protocol::extract_session_id(headers) {
            Some(raw) => Some(protocol::sanitize_session_token(&raw)?),
            None => None,
        };

        let mut context = RequestContext::new(&request.method, session_id.clone());
        if let Some(timeout) = self.request_timeout {
            context = context.with_deadline(Instant::now() + timeout);
        }

        let kind = protocol::classify(&request);
        debug!(
            request_id = %context.request_id(),
            method = %request.method,
            params = %sanitize_for_logging(&request.params),
            "dispatching request"
        );
        let body = serde_json::to_value(&request)?;

        match (self.mode, kind, session_id) {
            (SessionMode::Stateless, _, _) => {
                let response = self
                    .stateless_manager
                    .handle_request(headers, body, &context)
                    .await?;
                Ok(Dispatch {
                    context,
                    body: response,
                    session_id: None,
                })
            }
            (SessionMode::Stateful, CallKind::Handshake, _) => {
                let response = self
                    .session_manager
                    .initialize_and_handle(headers, body, &context)
                    .await?;
                Ok(Dispatch {
                    context,
                    body: response.body,
                    session_id: Some(response.session_id),
                })
            }
            (SessionMode::Stateful, CallKind::Continuation, Some(session_id)) => {
                let response = self
                    .session_manager
                    .handle_request(headers, body, &context, &session_id)
                    .await?;
                Ok(Dispatch {
                    context,
                    body: response,
                    session_id: None,
                })
            }
            (SessionMode::Stateful, CallKind::Continuation, None) => {
                debug!(
                    request_id = %context.request_id(),
                    method = %context.operation(),
                    "continuation without session id, falling back to stateless handling"
                );
                let response = self
                    .stateless_manager
                    .handle_request(headers, body, &context)
                    .await?;
                Ok(Dispatch {
                    context,
                    body: response,
                    session_id: None,
                })
            }
        }
    }
}
