//! # Research Tools Demo Server
//!
//! Minimal wiring of the Quill transport around a toy research
//! tool-server: a literature-search stub and a content-scoring stub
//! behind the standard handshake/continuation protocol. The session mode
//! is read from `QUILL_SESSION_MODE` (`stateful` | `stateless`).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use quill_http_mcp_server::{HttpServer, ServerFactory, SessionMode, ToolServer};
use quill_mcp_session::BoxError;

/// Demo tool server: enough protocol to exercise both transport paths.
struct ResearchToolServer {
    initialized: bool,
}

#[async_trait]
impl ToolServer for ResearchToolServer {
    async fn handle(&mut self, message: Value) -> Result<Value, BoxError> {
        let method = message
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or_default();
        let id = message.get("id").cloned().unwrap_or(Value::Null);

        let result = match method {
            "initialize" => {
                self.initialized = true;
                json!({
                    "protocolVersion": "2025-06-18",
                    "serverInfo": {
                        "name": "research-server",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                })
            }
            "tools/list" => json!({
                "tools": [
                    {"name": "literature_search", "description": "Search the literature index"},
                    {"name": "content_score", "description": "Score a draft for clarity and structure"},
                ]
            }),
            "tools/call" if !self.initialized => {
                return Err("server not initialized".into());
            }
            "tools/call" => {
                let name = message
                    .pointer("/params/name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default();
                match name {
                    "literature_search" => {
                        let query = message
                            .pointer("/params/arguments/query")
                            .and_then(|q| q.as_str())
                            .unwrap_or("");
                        json!({"query": query, "results": [], "note": "demo stub"})
                    }
                    "content_score" => json!({"score": 0.5, "note": "demo stub"}),
                    other => return Err(format!("unknown tool '{other}'").into()),
                }
            }
            other => return Err(format!("unsupported method '{other}'").into()),
        };

        Ok(json!({"jsonrpc": "2.0", "id": id, "result": result}))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "research_server=info,quill_http_mcp_server=info".into()),
        )
        .init();

    let factory: ServerFactory = Arc::new(|| {
        Box::pin(async {
            Ok(Box::new(ResearchToolServer { initialized: false }) as Box<dyn ToolServer>)
        })
    });

    let mode = SessionMode::from_env()?;
    let server = HttpServer::builder()
        .session_mode(mode)
        .server_factory(factory)
        .build()?;

    println!(
        "research demo server at http://{}{} (mode: {mode})",
        server.config().bind_address,
        server.config().mcp_path
    );
    println!("try:");
    println!(
        r#"curl -X POST http://127.0.0.1:8000/mcp \
  -H "Content-Type: application/json" \
  -d '{{"jsonrpc":"2.0","id":1,"method":"initialize","params":{{"protocolVersion":"2025-06-18"}}}}'"#
    );

    server.run().await?;
    Ok(())
}
