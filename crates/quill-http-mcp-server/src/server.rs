//! HTTP server bootstrap: builder, accept loop, request handling.
//!
//! Single POST endpoint in front of the transport middleware, with the
//! guard layer (rate limiting, body-size/UTF-8/JSON sanitization) applied
//! before any routing. DELETE on the same path closes a session
//! explicitly. Everything else is 404/405.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use quill_mcp_guard::{RateLimitConfig, RateLimiter, sanitize_json};
use quill_mcp_session::{InMemorySessionStore, ServerFactory, SessionConfig};

use crate::config::{ServerConfig, SessionMode};
use crate::protocol::{self, HEADER_SESSION_ID, RpcRequest};
use crate::session_manager::SessionTransportManager;
use crate::stateless::StatelessTransportManager;
use crate::transport::TransportMiddleware;
use crate::{Result, TransportError};

/// Builder for [`HttpServer`].
pub struct HttpServerBuilder {
    config: ServerConfig,
    factory: Option<ServerFactory>,
}

impl HttpServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            factory: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bind address.
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Set the MCP endpoint path.
    pub fn mcp_path(mut self, path: impl Into<String>) -> Self {
        self.config.mcp_path = path.into();
        self
    }

    /// Set the session handling mode.
    pub fn session_mode(mut self, mode: SessionMode) -> Self {
        self.config.session_mode = mode;
        self
    }

    /// Read the session mode from `QUILL_SESSION_MODE`.
    pub fn session_mode_from_env(mut self) -> Result<Self> {
        self.config.session_mode = SessionMode::from_env()?;
        Ok(self)
    }

    /// Set the maximum request body size.
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Set the per-request deadline (`None` disables it).
    pub fn request_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.config.request_timeout_ms = timeout_ms;
        self
    }

    /// Configure the per-client rate limiter.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = config;
        self
    }

    /// Configure session lifecycle timing.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Set the tool-server instance factory (required).
    pub fn server_factory(mut self, factory: ServerFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build the server. Must run inside a Tokio runtime: the rate
    /// limiter starts its eviction sweep on construction.
    pub fn build(self) -> Result<HttpServer> {
        let factory = self
            .factory
            .ok_or_else(|| TransportError::Config("server factory must be provided".to_string()))?;

        let store = Arc::new(InMemorySessionStore::with_config(self.config.session.clone()));
        let session_manager = Arc::new(SessionTransportManager::new(
            Arc::clone(&store),
            Arc::clone(&factory),
        ));
        let stateless_manager = Arc::new(StatelessTransportManager::new(factory));
        let limiter = Arc::new(RateLimiter::new(self.config.rate_limit.clone()));
        let middleware = Arc::new(TransportMiddleware::new(
            self.config.session_mode,
            Arc::clone(&session_manager),
            stateless_manager,
            self.config.request_timeout_ms.map(Duration::from_millis),
        ));

        Ok(HttpServer {
            config: self.config,
            middleware,
            session_manager,
            limiter,
        })
    }
}

impl Default for HttpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The HTTP transport server.
pub struct HttpServer {
    config: ServerConfig,
    middleware: Arc<TransportMiddleware>,
    session_manager: Arc<SessionTransportManager>,
    limiter: Arc<RateLimiter>,
}

impl HttpServer {
    pub fn builder() -> HttpServerBuilder {
        HttpServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn handler(&self) -> RequestHandler {
        RequestHandler {
            config: self.config.clone(),
            middleware: Arc::clone(&self.middleware),
            session_manager: Arc::clone(&self.session_manager),
            limiter: Arc::clone(&self.limiter),
        }
    }

    /// Run the accept loop. Starts the session reaper first.
    pub async fn run(&self) -> Result<()> {
        self.session_manager.start();

        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!("HTTP transport listening on {}", self.config.bind_address);
        info!(
            "MCP endpoint at {} (mode: {})",
            self.config.mcp_path, self.config.session_mode
        );

        let handler = self.handler();
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            debug!("new connection from {}", peer_addr);

            let handler = handler.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service =
                    service_fn(move |req| handle_request(req, handler.clone(), peer_addr));

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    // Mid-request disconnects abandon in-flight work
                    // best-effort; only log real failures.
                    let err_str = err.to_string();
                    if err_str.contains("connection closed before message completed") {
                        debug!("client disconnected: {}", err);
                    } else {
                        error!("error serving connection: {}", err);
                    }
                }
            });
        }
    }

    /// Stop background tasks and release timer resources.
    pub fn shutdown(&self) {
        self.session_manager.stop();
        self.limiter.dispose();
        info!("transport shut down");
    }
}

/// Per-connection request handler state.
#[derive(Clone)]
pub(crate) struct RequestHandler {
    pub(crate) config: ServerConfig,
    pub(crate) middleware: Arc<TransportMiddleware>,
    pub(crate) session_manager: Arc<SessionTransportManager>,
    pub(crate) limiter: Arc<RateLimiter>,
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    handler: RequestHandler,
    peer_addr: SocketAddr,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    if req.uri().path() != handler.config.mcp_path {
        return Ok(simple_response(StatusCode::NOT_FOUND, "Not Found"));
    }

    if req.method() == Method::POST {
        let (parts, body) = req.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                error!("failed to read request body: {}", err);
                return Ok(simple_response(
                    StatusCode::BAD_REQUEST,
                    "Failed to read request body",
                ));
            }
        };
        let client_key = peer_addr.ip().to_string();
        Ok(handler
            .handle_post(&parts.headers, &body_bytes, &client_key)
            .await)
    } else if req.method() == Method::DELETE {
        Ok(handler.handle_delete(req.headers()).await)
    } else {
        Ok(simple_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed",
        ))
    }
}

impl RequestHandler {
    /// Handle one POST: guard pre-conditions, then dispatch.
    pub(crate) async fn handle_post(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        client_key: &str,
    ) -> Response<Full<Bytes>> {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .unwrap_or("");
        if !content_type.starts_with("application/json") {
            return simple_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Content-Type must be application/json",
            );
        }

        if body.len() > self.config.max_body_size {
            warn!("request body too large: {} bytes", body.len());
            return simple_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }

        let body_str = match std::str::from_utf8(body) {
            Ok(s) => s,
            Err(_) => {
                return simple_response(
                    StatusCode::BAD_REQUEST,
                    "Request body must be valid UTF-8",
                );
            }
        };

        // Rate limit before any parsing or routing work.
        if let Err(err) = self.limiter.check(client_key) {
            warn!(client_key, "request rejected by rate limiter");
            return error_response(&TransportError::from(err));
        }

        let request: RpcRequest = match sanitize_json(body_str, Some(self.config.max_body_size)) {
            Ok(request) => request,
            Err(err) => return error_response(&TransportError::from(err)),
        };

        match self.middleware.dispatch(headers, request).await {
            Ok(dispatch) => {
                debug!(
                    request_id = %dispatch.context.request_id(),
                    operation = %dispatch.context.operation(),
                    "request complete"
                );
                let body = serde_json::to_string(&dispatch.body)
                    .unwrap_or_else(|_| "{}".to_string());
                let mut builder = Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, "application/json");
                if let Some(session_id) = &dispatch.session_id {
                    builder = builder.header(HEADER_SESSION_ID, session_id.as_str());
                }
                builder.body(Full::new(Bytes::from(body))).unwrap()
            }
            Err(err) => error_response(&err),
        }
    }

    /// Handle DELETE: explicit session close.
    pub(crate) async fn handle_delete(&self, headers: &HeaderMap) -> Response<Full<Bytes>> {
        let session_id = match protocol::extract_session_id(headers) {
            Some(raw) => match protocol::sanitize_session_token(&raw) {
                Ok(session_id) => session_id,
                Err(err) => return error_response(&err),
            },
            None => {
                return simple_response(
                    StatusCode::BAD_REQUEST,
                    "Missing mcp-session-id header",
                );
            }
        };

        if self.session_manager.close_session(&session_id).await {
            info!(%session_id, "session closed via DELETE");
            simple_response(StatusCode::OK, "Session closed")
        } else {
            simple_response(StatusCode::NOT_FOUND, "Session not found")
        }
    }
}

fn simple_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(message)))
        .unwrap()
}

fn error_response(err: &TransportError) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(&err.to_body()).unwrap_or_else(|_| {
        r#"{"error":{"code":-32603,"message":"internal error"}}"#.to_string()
    });
    Response::builder()
        .status(err.http_status())
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
