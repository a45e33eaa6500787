//! Server configuration, including the environment-driven session mode.

use std::net::SocketAddr;
use std::str::FromStr;

use quill_mcp_guard::RateLimitConfig;
use quill_mcp_session::SessionConfig;

use crate::TransportError;

/// How the transport handles session affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Persistent, session-affine handling: handshakes mint sessions and
    /// continuations route back to the bound instance.
    #[default]
    Stateful,
    /// Ephemeral handling: a throwaway instance per request, no session
    /// affinity required. For autoscaled/serverless topologies.
    Stateless,
}

impl SessionMode {
    /// Environment variable consulted by [`SessionMode::from_env`].
    pub const ENV_VAR: &'static str = "QUILL_SESSION_MODE";

    /// Read the mode switch from the environment.
    ///
    /// Unset defaults to `Stateful`; an unrecognized value is a startup
    /// error rather than a silent fallback.
    pub fn from_env() -> Result<Self, TransportError> {
        match std::env::var(Self::ENV_VAR) {
            Ok(raw) => raw.parse(),
            Err(_) => Ok(Self::Stateful),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stateful => "stateful",
            Self::Stateless => "stateless",
        }
    }
}

impl FromStr for SessionMode {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stateful" => Ok(Self::Stateful),
            "stateless" => Ok(Self::Stateless),
            other => Err(TransportError::Config(format!(
                "invalid session mode '{other}', expected 'stateful' or 'stateless'"
            ))),
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the HTTP transport server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Path for the MCP endpoint
    pub mcp_path: String,
    /// Session handling mode
    pub session_mode: SessionMode,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Per-request deadline in milliseconds (`None` disables it)
    pub request_timeout_ms: Option<u64>,
    /// Rate limiting applied per client key before routing
    pub rate_limit: RateLimitConfig,
    /// Session lifecycle timing
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".parse().unwrap(),
            mcp_path: "/mcp".to_string(),
            session_mode: SessionMode::Stateful,
            max_body_size: 1024 * 1024, // 1MB
            request_timeout_ms: Some(30_000),
            rate_limit: RateLimitConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Default configuration with the session mode taken from the
    /// environment (`QUILL_SESSION_MODE`).
    pub fn from_env() -> Result<Self, TransportError> {
        Ok(Self {
            session_mode: SessionMode::from_env()?,
            ..Self::default()
        })
    }
}
