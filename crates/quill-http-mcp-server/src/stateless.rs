//! Stateless transport manager: ephemeral, one instance per request.
//!
//! Every call, handshake or not, gets a brand-new tool-server instance
//! that lives for exactly one request/response cycle. No map, no TTL, no
//! cross-request memory: per-request instantiation cost is traded for
//! zero session-affinity requirements, which is what autoscaled and
//! serverless deployments need. The only resource concern is bounding
//! instance construction by the request deadline.

use hyper::HeaderMap;
use serde_json::Value;
use tracing::debug;

use quill_mcp_session::ServerFactory;

use crate::{RequestContext, TransportError};

/// Manager for ephemeral request handling.
pub struct StatelessTransportManager {
    factory: ServerFactory,
}

impl StatelessTransportManager {
    pub fn new(factory: ServerFactory) -> Self {
        Self { factory }
    }

    /// Build a throwaway instance, run one request/response cycle, and
    /// discard it.
    pub async fn handle_request(
        &self,
        _headers: &HeaderMap,
        body: Value,
        ctx: &RequestContext,
    ) -> Result<Value, TransportError> {
        let construction = (self.factory)();
        let mut instance = match ctx.remaining() {
            Some(remaining) => tokio::time::timeout(remaining, construction)
                .await
                .map_err(|_| {
                    TransportError::Internal("server instance construction timed out".to_string())
                })?,
            None => construction.await,
        }
        .map_err(|e| {
            TransportError::Internal(format!("server instance construction failed: {e}"))
        })?;

        debug!(
            request_id = %ctx.request_id(),
            operation = %ctx.operation(),
            "handling request on ephemeral instance"
        );

        let response = instance
            .handle(body)
            .await
            .map_err(|e| TransportError::Internal(e.to_string()))?;

        // `instance` drops here: nothing survives the request.
        Ok(response)
    }
}
