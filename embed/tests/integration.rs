//! Integration Tests for the Procore embed
//!
//! These drive the auth session over real HTTP against a scripted broker
//! and run the full host handshake through an in-process host frame.

use axum::http::StatusCode;
use procore_embed::auth::{AuthSessionManager, SessionPhase};
use procore_embed::bridge::{ChannelHost, ContextBridge, ContextState, MessageEvent};
use procore_embed::config::BridgeConfig;
use procore_embed::protocol::{FrameMessage, Provider};
use procore_embed::{BridgeError, HttpBackend, SessionError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::*;

fn both(procore: bool, signiflow: bool) -> serde_json::Value {
    json!({
        "authenticated": procore && signiflow,
        "procore": { "authenticated": procore, "expiresAt": "2026-10-16T09:00:00Z" },
        "signiflow": { "authenticated": signiflow, "expiresAt": 1792141200000u64 },
        "nextExpiresAt": "2026-10-16T09:00:00Z"
    })
}

// ============================================================================
// Auth Session over HTTP
// ============================================================================

mod auth_session {
    use super::*;

    #[tokio::test]
    async fn test_authenticated_status_needs_no_refresh() {
        init_test_logging();
        let broker = FakeBroker::new();
        broker.push_status(Reply::ok(both(true, true)));
        let base_url = broker.spawn().await;

        let manager = AuthSessionManager::from_config(auth_config(&base_url)).unwrap();
        assert!(manager.check_status().await);

        let status = manager.status().unwrap();
        assert!(status.procore.unwrap().expires_at.is_some());
        assert_eq!(broker.status_hits(), 1);
        assert_eq!(broker.refresh_hits(), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_status_refreshes_once() {
        init_test_logging();
        let broker = FakeBroker::new();
        broker
            .push_status(Reply::ok(both(true, false)))
            .push_refresh(Reply::json(
                StatusCode::UNAUTHORIZED,
                json!({
                    "refreshed": false,
                    "loginRequired": true,
                    "auth": both(true, false)
                }),
            ));
        let base_url = broker.spawn().await;

        let manager = AuthSessionManager::from_config(auth_config(&base_url)).unwrap();
        assert!(!manager.check_status().await);

        assert_eq!(broker.status_hits(), 1);
        assert_eq!(broker.refresh_hits(), 1);
        assert_eq!(
            manager.error(),
            Some(SessionError::ProviderAuthRequired(Provider::Signiflow))
        );
        assert_eq!(manager.phase(), SessionPhase::Failed("signiflow_auth_required"));
    }

    #[tokio::test]
    async fn test_unauthenticated_status_recovers() {
        let broker = FakeBroker::new();
        broker
            .push_status(Reply::ok(both(false, false)))
            .push_refresh(Reply::ok(json!({ "refreshed": true, "auth": both(true, true) })));
        let base_url = broker.spawn().await;

        let manager = AuthSessionManager::from_config(auth_config(&base_url)).unwrap();
        assert!(manager.check_status().await);
        assert_eq!(manager.error(), None);
        assert_eq!(manager.phase(), SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let broker = FakeBroker::new();
        broker
            .push_status(Reply::text(StatusCode::BAD_GATEWAY, "upstream down"))
            .push_status(Reply::ok(both(true, true)));
        let base_url = broker.spawn().await;

        let manager = AuthSessionManager::from_config(auth_config(&base_url)).unwrap();
        assert!(manager.check_status().await);
        assert_eq!(broker.status_hits(), 2);
    }

    #[tokio::test]
    async fn test_persistent_server_error_surfaces() {
        let broker = FakeBroker::new();
        for _ in 0..3 {
            broker.push_refresh(Reply::text(StatusCode::INTERNAL_SERVER_ERROR, "boom"));
        }
        let base_url = broker.spawn().await;

        let manager = AuthSessionManager::from_config(auth_config(&base_url)).unwrap();
        assert!(!manager.refresh().await);

        assert_eq!(broker.refresh_hits(), 3);
        match manager.error() {
            Some(SessionError::ServerError(detail)) => assert!(detail.contains("500")),
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_network_error() {
        let base_url = unreachable_base_url().await;

        let manager = AuthSessionManager::from_config(auth_config(&base_url)).unwrap();
        assert!(!manager.check_status().await);
        assert_eq!(manager.error(), Some(SessionError::NetworkUnreachable));
        assert_eq!(manager.status(), None);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_hit_broker_once() {
        let broker = FakeBroker::new();
        broker
            .delay_refresh(Duration::from_millis(100))
            .push_refresh(Reply::ok(both(true, true)));
        let base_url = broker.spawn().await;

        let manager = AuthSessionManager::from_config(auth_config(&base_url)).unwrap();
        let (first, second, third) =
            tokio::join!(manager.refresh(), manager.refresh(), manager.check_status());

        assert!(first && second && third);
        assert_eq!(broker.refresh_hits(), 1);
        assert_eq!(broker.status_hits(), 0);
    }

    #[tokio::test]
    async fn test_http_backend_decodes_status_directly() {
        use procore_embed::BackendTransport;

        let broker = FakeBroker::new();
        broker.push_status(Reply::ok(json!({ "authenticated": true })));
        let base_url = broker.spawn().await;

        let backend = HttpBackend::new(format!("{}/", base_url));
        let status = backend.status().await.unwrap();
        assert!(status.is_authenticated());
        assert!(status.procore.is_none());
    }
}

// ============================================================================
// Host Handshake
// ============================================================================

mod host_handshake {
    use super::*;

    const HOST_ORIGIN: &str = "https://app.procore.com";

    fn context_message(project: u64) -> serde_json::Value {
        json!({
            "type": "context",
            "context": {
                "companyId": 562949953421312u64,
                "projectId": project,
                "objectId": null,
                "route": "/projects/documents",
                "view": "documents",
                "apiBaseUrl": "https://api.procore.com"
            }
        })
    }

    #[tokio::test]
    async fn test_handshake_delivers_context() {
        init_test_logging();
        let host = ChannelHost::embedded_in("https://app.procore.com/562949953421312/project/home");
        let bridge = ContextBridge::new(Arc::new(host.clone()), BridgeConfig::default());

        bridge.initialize().unwrap();
        assert_eq!(host.posted()[0].message, FrameMessage::Initialize);
        assert_eq!(host.posted()[0].target_origin, HOST_ORIGIN);

        host.dispatch(MessageEvent::new(HOST_ORIGIN, context_message(7)));
        let context = bridge.handshake().await.unwrap();
        assert_eq!(context.company_id, "562949953421312");
        assert_eq!(context.project_id, "7");
        assert_eq!(context.object_id, None);
    }

    #[tokio::test]
    async fn test_standalone_app_is_unavailable() {
        let host = ChannelHost::top_level();
        let bridge = ContextBridge::new(Arc::new(host.clone()), BridgeConfig::default());

        assert_eq!(bridge.initialize(), Err(BridgeError::ContextUnavailable));
        assert_eq!(
            bridge.wait_for_context(Duration::from_millis(50)).await,
            Err(BridgeError::ContextUnavailable)
        );
        assert_eq!(host.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_context_updates_are_observed() {
        let host = ChannelHost::embedded_in("https://app.procore.com/");
        let bridge = ContextBridge::new(Arc::new(host.clone()), BridgeConfig::default());
        bridge.initialize().unwrap();
        let mut updates = bridge.subscribe();

        host.dispatch(MessageEvent::new("https://evil.example.com", context_message(1)));
        host.dispatch(MessageEvent::new(HOST_ORIGIN, json!({ "type": "ping" })));
        host.dispatch(MessageEvent::new(HOST_ORIGIN, context_message(2)));

        updates.changed().await.unwrap();
        let state = updates.borrow_and_update().clone();
        assert!(matches!(state, ContextState::Ready(ref c) if c.project_id == "2"));
    }

    #[tokio::test]
    async fn test_shutdown_detaches_from_host() {
        let host = ChannelHost::embedded_in("https://app.procore.com/");
        let bridge = ContextBridge::new(Arc::new(host.clone()), BridgeConfig::default());
        bridge.initialize().unwrap();
        assert_eq!(host.listener_count(), 1);

        bridge.shutdown();
        for _ in 0..10 {
            if host.listener_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(host.listener_count(), 0);
        assert_eq!(bridge.current(), ContextState::Pending);
    }
}
