//! Routing-policy tests for the transport middleware.

use hyper::HeaderMap;

use quill_mcp_session::SessionError;

use crate::TransportError;
use crate::config::SessionMode;
use crate::protocol::HEADER_SESSION_ID;

use super::{build_middleware, failing_factory, recording_factory, rpc};

fn headers_with_session(session_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(HEADER_SESSION_ID, session_id.parse().unwrap());
    headers
}

#[tokio::test]
async fn test_stateful_handshake_mints_session() {
    let (factory, _) = recording_factory();
    let (middleware, session_manager) = build_middleware(SessionMode::Stateful, factory);

    let dispatch = middleware
        .dispatch(&HeaderMap::new(), rpc("initialize"))
        .await
        .unwrap();

    assert!(dispatch.session_id.is_some());
    assert_eq!(dispatch.body["instance"], 0);
    assert_eq!(dispatch.body["calls"], 1);
    assert_eq!(session_manager.store().session_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_handshakes_get_distinct_sessions() {
    let (factory, _) = recording_factory();
    let (middleware, _) = build_middleware(SessionMode::Stateful, factory);

    let headers = HeaderMap::new();
    let (a, b) = tokio::join!(
        middleware.dispatch(&headers, rpc("initialize")),
        middleware.dispatch(&headers, rpc("initialize")),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_ne!(a.session_id.as_deref(), b.session_id.as_deref());
    assert_ne!(a.body["instance"], b.body["instance"]);
}

#[tokio::test]
async fn test_continuation_routes_to_bound_instance() {
    let (factory, built) = recording_factory();
    let (middleware, _) = build_middleware(SessionMode::Stateful, factory);

    let handshake = middleware
        .dispatch(&HeaderMap::new(), rpc("initialize"))
        .await
        .unwrap();
    let session_id = handshake.session_id.unwrap();

    let headers = headers_with_session(&session_id);
    let first = middleware.dispatch(&headers, rpc("tools/call")).await.unwrap();
    let second = middleware.dispatch(&headers, rpc("tools/call")).await.unwrap();

    // Same instance, accumulating state across continuations.
    assert_eq!(first.body["instance"], 0);
    assert_eq!(first.body["calls"], 2);
    assert_eq!(second.body["calls"], 3);
    assert!(first.session_id.is_none());
    assert_eq!(built.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let (factory, _) = recording_factory();
    let (middleware, _) = build_middleware(SessionMode::Stateful, factory);

    let a = middleware.dispatch(&HeaderMap::new(), rpc("initialize")).await.unwrap();
    let b = middleware.dispatch(&HeaderMap::new(), rpc("initialize")).await.unwrap();
    let headers_a = headers_with_session(a.session_id.as_deref().unwrap());
    let headers_b = headers_with_session(b.session_id.as_deref().unwrap());

    // Drive session A twice; session B must not observe A's activity.
    middleware.dispatch(&headers_a, rpc("tools/call")).await.unwrap();
    let third_on_a = middleware.dispatch(&headers_a, rpc("tools/call")).await.unwrap();
    let second_on_b = middleware.dispatch(&headers_b, rpc("tools/call")).await.unwrap();

    assert_eq!(third_on_a.body["calls"], 3);
    assert_eq!(second_on_b.body["calls"], 2);
    assert_ne!(third_on_a.body["instance"], second_on_b.body["instance"]);
}

#[tokio::test]
async fn test_continuation_without_session_id_falls_back_to_stateless() {
    let (factory, built) = recording_factory();
    let (middleware, session_manager) = build_middleware(SessionMode::Stateful, factory);

    let first = middleware
        .dispatch(&HeaderMap::new(), rpc("tools/call"))
        .await
        .unwrap();
    let second = middleware
        .dispatch(&HeaderMap::new(), rpc("tools/call"))
        .await
        .unwrap();

    // Handled, but ephemerally: fresh instance each time, no session.
    assert!(first.session_id.is_none());
    assert_eq!(first.body["calls"], 1);
    assert_eq!(second.body["calls"], 1);
    assert_ne!(first.body["instance"], second.body["instance"]);
    assert_eq!(built.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(session_manager.store().session_count().await, 0);
}

#[tokio::test]
async fn test_stateless_mode_is_fully_ephemeral() {
    let (factory, _) = recording_factory();
    let (middleware, session_manager) = build_middleware(SessionMode::Stateless, factory);

    // Even a handshake body gets the ephemeral path in stateless mode.
    let first = middleware.dispatch(&HeaderMap::new(), rpc("initialize")).await.unwrap();
    let second = middleware.dispatch(&HeaderMap::new(), rpc("initialize")).await.unwrap();

    assert!(first.session_id.is_none());
    assert!(second.session_id.is_none());
    assert_ne!(first.body["instance"], second.body["instance"]);
    assert_eq!(first.body["calls"], 1);
    assert_eq!(second.body["calls"], 1);
    assert_eq!(session_manager.store().session_count().await, 0);
}

#[tokio::test]
async fn test_unknown_session_id_is_not_found() {
    let (factory, _) = recording_factory();
    let (middleware, _) = build_middleware(SessionMode::Stateful, factory);

    let headers = headers_with_session("0192d3a3-8f44-7cc1-a5e3-000000000001");
    let result = middleware.dispatch(&headers, rpc("tools/call")).await;
    assert!(matches!(
        result,
        Err(TransportError::Session(SessionError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_closed_session_reports_expired() {
    let (factory, _) = recording_factory();
    let (middleware, session_manager) = build_middleware(SessionMode::Stateful, factory);

    let handshake = middleware.dispatch(&HeaderMap::new(), rpc("initialize")).await.unwrap();
    let session_id = handshake.session_id.unwrap();
    assert!(session_manager.close_session(&session_id).await);

    let headers = headers_with_session(&session_id);
    let result = middleware.dispatch(&headers, rpc("tools/call")).await;
    assert!(matches!(
        result,
        Err(TransportError::Session(SessionError::Expired(_)))
    ));
}

#[tokio::test]
async fn test_invalid_session_header_is_rejected() {
    let (factory, built) = recording_factory();
    let (middleware, _) = build_middleware(SessionMode::Stateful, factory);

    let headers = headers_with_session("bad;token");
    let result = middleware.dispatch(&headers, rpc("tools/call")).await;
    assert!(matches!(result, Err(TransportError::Protocol(_))));
    // Rejected before any instance work.
    assert_eq!(built.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_handshake_leaves_no_session() {
    let (middleware, session_manager) =
        build_middleware(SessionMode::Stateful, failing_factory());

    let result = middleware.dispatch(&HeaderMap::new(), rpc("initialize")).await;
    assert!(matches!(result, Err(TransportError::Protocol(_))));
    assert_eq!(session_manager.store().session_count().await, 0);
}

#[tokio::test]
async fn test_bad_envelope_is_rejected() {
    let (factory, _) = recording_factory();
    let (middleware, _) = build_middleware(SessionMode::Stateful, factory);

    let mut request = rpc("initialize");
    request.jsonrpc = "1.0".to_string();
    let result = middleware.dispatch(&HeaderMap::new(), request).await;
    assert!(matches!(result, Err(TransportError::Protocol(_))));
}
