//! Correlation-bearing request context.
//!
//! One context is minted for every inbound call and passed by reference
//! through the call chain. It is immutable once created; derived work
//! gets a child context carrying the parent request id.

use std::time::{Duration, Instant};

use uuid::Uuid;

/// Per-call correlation context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    operation: String,
    request_id: String,
    parent_request_id: Option<String>,
    session_id: Option<String>,
    created_at: u64,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Create a context for an inbound operation.
    ///
    /// Request ids are UUID v7 so correlated log lines sort temporally.
    pub fn new(operation: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            operation: operation.into(),
            request_id: Uuid::now_v7().to_string(),
            parent_request_id: None,
            session_id,
            created_at: chrono::Utc::now().timestamp_millis() as u64,
            deadline: None,
        }
    }

    /// Attach a deadline bounding downstream work.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Derive a context for nested work, keeping this request as parent.
    pub fn child(&self, operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            request_id: Uuid::now_v7().to_string(),
            parent_request_id: Some(self.request_id.clone()),
            session_id: self.session_id.clone(),
            created_at: chrono::Utc::now().timestamp_millis() as u64,
            deadline: self.deadline,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn parent_request_id(&self) -> Option<&str> {
        self.parent_request_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creation() {
        let ctx = RequestContext::new("tools/call", Some("session-1".to_string()));
        assert_eq!(ctx.operation(), "tools/call");
        assert_eq!(ctx.session_id(), Some("session-1"));
        assert!(ctx.parent_request_id().is_none());
        assert!(!ctx.request_id().is_empty());
    }

    #[test]
    fn test_child_context_carries_parent() {
        let parent = RequestContext::new("initialize", None);
        let child = parent.child("build-instance");
        assert_eq!(child.parent_request_id(), Some(parent.request_id()));
        assert_ne!(child.request_id(), parent.request_id());
        assert_eq!(child.operation(), "build-instance");
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestContext::new("op", None);
        let b = RequestContext::new("op", None);
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn test_deadline_remaining() {
        let ctx = RequestContext::new("op", None);
        assert!(ctx.remaining().is_none());

        let ctx = ctx.with_deadline(Instant::now() + Duration::from_secs(5));
        let remaining = ctx.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(5));
        assert!(remaining > Duration::from_secs(4));
    }
}
