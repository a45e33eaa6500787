//! Crate tests: transport-middleware routing and HTTP request handling,
//! driven by a scripted tool-server factory.

mod routing_tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use quill_mcp_session::{BoxError, InMemorySessionStore, ServerFactory, ToolServer};

use crate::config::SessionMode;
use crate::protocol::RpcRequest;
use crate::session_manager::SessionTransportManager;
use crate::stateless::StatelessTransportManager;
use crate::transport::TransportMiddleware;

/// Tool server that reports which instance it is and how many calls it
/// has handled, making session affinity and isolation observable.
pub(crate) struct RecordingServer {
    instance_id: usize,
    calls: u32,
}

#[async_trait]
impl ToolServer for RecordingServer {
    async fn handle(&mut self, message: Value) -> Result<Value, BoxError> {
        self.calls += 1;
        Ok(json!({
            "instance": self.instance_id,
            "calls": self.calls,
            "method": message.get("method").cloned().unwrap_or(Value::Null),
        }))
    }
}

/// Tool server whose handshake always fails.
pub(crate) struct FailingServer;

#[async_trait]
impl ToolServer for FailingServer {
    async fn handle(&mut self, _message: Value) -> Result<Value, BoxError> {
        Err("unrecognized handshake".into())
    }
}

/// Factory producing [`RecordingServer`]s with sequential instance ids.
pub(crate) fn recording_factory() -> (ServerFactory, Arc<AtomicUsize>) {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let factory: ServerFactory = Arc::new(move || {
        let instance_id = counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            Ok(Box::new(RecordingServer {
                instance_id,
                calls: 0,
            }) as Box<dyn ToolServer>)
        })
    });
    (factory, built)
}

pub(crate) fn failing_factory() -> ServerFactory {
    Arc::new(|| Box::pin(async { Ok(Box::new(FailingServer) as Box<dyn ToolServer>) }))
}

pub(crate) fn rpc(method: &str) -> RpcRequest {
    RpcRequest {
        jsonrpc: "2.0".to_string(),
        id: Some(json!(1)),
        method: method.to_string(),
        params: Some(json!({})),
    }
}

pub(crate) fn build_middleware(
    mode: SessionMode,
    factory: ServerFactory,
) -> (TransportMiddleware, Arc<SessionTransportManager>) {
    let store = Arc::new(InMemorySessionStore::new());
    let session_manager = Arc::new(SessionTransportManager::new(store, Arc::clone(&factory)));
    let stateless_manager = Arc::new(StatelessTransportManager::new(factory));
    let middleware = TransportMiddleware::new(
        mode,
        Arc::clone(&session_manager),
        stateless_manager,
        None,
    );
    (middleware, session_manager)
}
