//! # Quill HTTP MCP Server
//!
//! HTTP transport and session routing for the Quill research tools. A
//! single POST endpoint accepts JSON-RPC style bodies; the transport
//! middleware classifies each call as handshake or continuation, consults
//! the configured session mode, and dispatches to either the session
//! transport manager (persistent, session-affine handling) or the
//! stateless transport manager (ephemeral, one instance per request).
//!
//! ## Operating modes
//! - **stateful**: handshakes mint a session carrying a bound tool-server
//!   instance; continuations route to it via the `mcp-session-id` header.
//! - **stateless**: every call gets a throwaway instance, for autoscaled
//!   or serverless deployments where sticky routing cannot be guaranteed.
//!
//! Rate limiting and input sanitization (via `quill-mcp-guard`) run as
//! pre-conditions before any untrusted data reaches routing, logs, or
//! the tool servers.

pub mod config;
pub mod context;
pub mod protocol;
pub mod server;
pub mod session_manager;
pub mod stateless;
pub mod transport;

#[cfg(test)]
mod tests;

// Re-export main types
pub use config::{ServerConfig, SessionMode};
pub use context::RequestContext;
pub use protocol::{CallKind, HANDSHAKE_METHOD, HEADER_SESSION_ID, RpcRequest, extract_session_id};
pub use server::{HttpServer, HttpServerBuilder};
pub use session_manager::{SessionResponse, SessionTransportManager};
pub use stateless::StatelessTransportManager;
pub use transport::{Dispatch, TransportMiddleware};

// Re-export foundational types
pub use quill_mcp_guard::{RateLimitConfig, RateLimitError, RateLimiter, ValidationError};
pub use quill_mcp_session::{
    BoxError, InMemorySessionStore, ServerFactory, SessionConfig, SessionError, ToolServer,
};

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// JSON-RPC style error codes emitted on the wire.
///
/// Codes `-32000` to `-32099` are the application-defined server window.
pub mod error_codes {
    /// Input failed sanitization (-32001)
    pub const VALIDATION_FAILED: i64 = -32001;
    /// Unknown session id (-32002)
    pub const SESSION_NOT_FOUND: i64 = -32002;
    /// Rate limit exceeded (-32003)
    pub const RATE_LIMIT_EXCEEDED: i64 = -32003;
    /// Session existed but was closed or reaped (-32004)
    pub const SESSION_EXPIRED: i64 = -32004;
    /// Malformed or unrecognized request (standard JSON-RPC error)
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unexpected failure (standard JSON-RPC error)
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Transport-level errors, mapped at the HTTP boundary to a status code
/// plus a `{code, message}` body.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("validation error: {0}")]
    Validation(#[from] quill_mcp_guard::ValidationError),

    #[error("{0}")]
    RateLimit(#[from] quill_mcp_guard::RateLimitError),

    #[error("{0}")]
    Session(#[from] quill_mcp_session::SessionError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    /// Machine-readable error code carried in the response body.
    pub fn code(&self) -> i64 {
        use quill_mcp_session::SessionError;
        match self {
            Self::Validation(_) => error_codes::VALIDATION_FAILED,
            Self::RateLimit(_) => error_codes::RATE_LIMIT_EXCEEDED,
            Self::Session(SessionError::NotFound(_)) => error_codes::SESSION_NOT_FOUND,
            Self::Session(SessionError::Expired(_)) => error_codes::SESSION_EXPIRED,
            Self::Protocol(_) | Self::Serialization(_) => error_codes::INVALID_REQUEST,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// HTTP status the outer transport responds with.
    pub fn http_status(&self) -> hyper::StatusCode {
        use hyper::StatusCode;
        use quill_mcp_session::SessionError;
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Session(SessionError::Expired(_)) => StatusCode::GONE,
            Self::Session(SessionError::MaxSessionsReached(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Protocol(_) | Self::Serialization(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The structured `{code, message}` wire shape.
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}
