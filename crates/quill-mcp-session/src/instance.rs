//! The tool-server instance contract.
//!
//! A tool-server instance encapsulates one protocol-speaking server. The
//! transport never looks inside it: instances are produced by the
//! application through a [`ServerFactory`] and driven one message at a
//! time through [`ToolServer::handle`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

/// Boxed error type used across the instance boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One protocol-speaking tool server.
///
/// `handle` takes `&mut self`: an instance's internal protocol state is
/// not safe for concurrent mutation, so callers serialize access (the
/// session store wraps bound instances in a per-session mutex; the
/// stateless path owns its instance exclusively for one cycle).
#[async_trait]
pub trait ToolServer: Send {
    /// Process one request body and produce the response payload.
    async fn handle(&mut self, message: Value) -> Result<Value, BoxError>;
}

/// Async factory producing fresh tool-server instances.
///
/// Shared by the session and stateless transport managers: the session
/// manager calls it once per handshake and binds the result, the
/// stateless manager calls it once per request and discards the result.
pub type ServerFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Box<dyn ToolServer>, BoxError>> + Send + Sync>;
