//! Protocol envelope types, header extraction, and handshake
//! classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TransportError;

/// Request header carrying the session id on continuation calls.
pub const HEADER_SESSION_ID: &str = "mcp-session-id";

/// The method discriminator marking a handshake.
pub const HANDSHAKE_METHOD: &str = "initialize";

/// A JSON-RPC request envelope.
///
/// Only the envelope is interpreted here; `params` stays opaque and flows
/// through to the tool-server instance untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Reject envelopes this transport cannot route.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.jsonrpc != "2.0" {
            return Err(TransportError::Protocol(format!(
                "unsupported jsonrpc version '{}'",
                self.jsonrpc
            )));
        }
        if self.method.is_empty() {
            return Err(TransportError::Protocol("empty method".to_string()));
        }
        Ok(())
    }
}

/// Whether a call opens a session or continues one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Handshake,
    Continuation,
}

/// Classify a request by its method discriminator.
pub fn classify(request: &RpcRequest) -> CallKind {
    if request.method == HANDSHAKE_METHOD {
        CallKind::Handshake
    } else {
        CallKind::Continuation
    }
}

/// Extract the session id from request headers, if present.
pub fn extract_session_id(headers: &hyper::HeaderMap) -> Option<String> {
    headers
        .get(HEADER_SESSION_ID)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

/// Validate a session id header as an opaque token before it reaches
/// lookups or logs.
pub fn sanitize_session_token(raw: &str) -> Result<String, TransportError> {
    let token = raw.trim();
    let valid = !token.is_empty()
        && token.len() <= 128
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(token.to_string())
    } else {
        Err(TransportError::Protocol(format!(
            "invalid {HEADER_SESSION_ID} header"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: &str) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: method.to_string(),
            params: None,
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&request("initialize")), CallKind::Handshake);
        assert_eq!(classify(&request("tools/call")), CallKind::Continuation);
        assert_eq!(classify(&request("tools/list")), CallKind::Continuation);
    }

    #[test]
    fn test_envelope_validation() {
        assert!(request("initialize").validate().is_ok());

        let mut bad_version = request("initialize");
        bad_version.jsonrpc = "1.0".to_string();
        assert!(bad_version.validate().is_err());

        assert!(request("").validate().is_err());
    }

    #[test]
    fn test_header_extraction() {
        let mut headers = hyper::HeaderMap::new();
        headers.insert(HEADER_SESSION_ID, "session-123".parse().unwrap());
        assert_eq!(extract_session_id(&headers), Some("session-123".to_string()));

        let empty = hyper::HeaderMap::new();
        assert_eq!(extract_session_id(&empty), None);
    }

    #[test]
    fn test_session_token_sanitation() {
        let uuid = "0192d3a3-8f44-7cc1-a5e3-000000000001";
        assert_eq!(sanitize_session_token(uuid).unwrap(), uuid);
        assert!(sanitize_session_token("").is_err());
        assert!(sanitize_session_token("bad token with spaces").is_err());
        assert!(sanitize_session_token("semi;colon").is_err());
        assert!(sanitize_session_token(&"x".repeat(200)).is_err());
    }

    #[test]
    fn test_envelope_roundtrip_keeps_params_opaque() {
        let raw = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"literature_search","arguments":{"query":"q"}}}"#;
        let parsed: RpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.method, "tools/call");
        assert_eq!(parsed.params.as_ref().unwrap()["name"], "literature_search");
    }
}
