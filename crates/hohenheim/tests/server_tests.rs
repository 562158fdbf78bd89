//! Integration tests for the HTTP front-end

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;

use hohenheim::assistant::{Assistant, AssistantSettings};
use hohenheim::config::MemoryConfig;
use hohenheim::memory::{LongTermMemory, MemoryCoordinator, RecordKind};
use hohenheim::reasoning::{GenerationParams, ReasoningDispatcher, Tier};
use hohenheim::server::{AppState, create_router};
use hohenheim::session::SessionId;
use hohenheim::storage::InMemoryIndex;
use hohenheim::testing::{MockEmbedder, ScriptedBackend};

// =============================================================================
// Test Fixtures
// =============================================================================

fn test_assistant(basic: Arc<ScriptedBackend>, reasoning_timeout: Duration) -> Arc<Assistant> {
    let long_term = Arc::new(LongTermMemory::new(Arc::new(InMemoryIndex::new()), 3));
    let coordinator = Arc::new(MemoryCoordinator::new(
        long_term,
        Arc::new(MockEmbedder::new()),
        MemoryConfig::default(),
        Duration::from_secs(5),
    ));
    let dispatcher = ReasoningDispatcher::new(coordinator, reasoning_timeout).with_backend(
        Tier::Basic,
        basic,
        GenerationParams::default(),
    );
    Arc::new(Assistant::new(dispatcher, AssistantSettings::default()))
}

fn test_app() -> Router {
    let assistant = test_assistant(
        Arc::new(ScriptedBackend::new("basic")),
        Duration::from_secs(5),
    );
    create_router(Arc::new(AppState { assistant }), Duration::from_secs(10))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn submit_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/submit")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

mod health_endpoint_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint_returns_json_status() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }
}

mod submit_endpoint_tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_returns_renderable_result() {
        let response = test_app()
            .oneshot(submit_request(json!({"session_id": "web-1", "text": "hello there"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["session_id"], "web-1");
        assert_eq!(json["intent"], "unrecognized");
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "basic response");
        assert_eq!(json["tier"], "basic");
    }

    #[tokio::test]
    async fn test_submit_without_session_generates_one() {
        let response = test_app()
            .oneshot(submit_request(json!({"text": "help"})))
            .await
            .unwrap();

        let json = body_json(response).await;
        assert!(!json["session_id"].as_str().unwrap().is_empty());
        assert_eq!(json["intent"], "system-command");
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_session_id() {
        let response = test_app()
            .oneshot(submit_request(json!({"session_id": "bad id!", "text": "hello"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_body() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/submit")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }
}

mod request_timeout_tests {
    use super::*;

    #[tokio::test]
    async fn test_timed_out_request_still_records_exchange() {
        let basic = Arc::new(ScriptedBackend::new("basic"));
        basic.push_hang();
        let assistant = test_assistant(basic, Duration::from_millis(300));
        let app = create_router(
            Arc::new(AppState {
                assistant: Arc::clone(&assistant),
            }),
            Duration::from_millis(100),
        );

        let response = app
            .oneshot(submit_request(json!({"session_id": "slow-1", "text": "hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

        let id = SessionId::new("slow-1").unwrap();
        let mut recorded = false;
        for _ in 0..50 {
            let records = assistant.recent(&id, 10).await.unwrap_or_default();
            if records.iter().any(|r| r.kind == RecordKind::Interaction) {
                recorded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(recorded, "exchange was not recorded after the request timed out");
    }
}

mod recent_endpoint_tests {
    use super::*;

    #[tokio::test]
    async fn test_recent_lists_session_records() {
        let app = test_app();
        app.clone()
            .oneshot(submit_request(json!({"session_id": "web-2", "text": "status"})))
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/sessions/web-2/recent?n=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let records = json["records"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["kind"], "system-event");
    }

    #[tokio::test]
    async fn test_recent_unknown_session_is_404() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/v1/sessions/nobody/recent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
