//! HTTP front-end
//!
//! A thin JSON surface over [`Assistant::submit`]. Each request names its
//! session; sessions are created on first use.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::assistant::Assistant;
use crate::config::ServerConfig;
use crate::error::{HohenheimError, Result};
use crate::session::SessionId;

const DEFAULT_RECENT: usize = 10;

/// Shared application state for all handlers
pub struct AppState {
    pub assistant: Arc<Assistant>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// Omitted to start a new session
    #[serde(default)]
    pub session_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub n: Option<usize>,
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/submit", post(submit_handler))
        .route("/v1/sessions/{id}/recent", get(recent_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// Bind `config.listen_addr` and serve until Ctrl+C or SIGTERM
pub async fn serve(config: &ServerConfig, assistant: Arc<Assistant>) -> Result<()> {
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|e| HohenheimError::Config(format!("Invalid listen address: {e}")))?;

    let state = Arc::new(AppState { assistant });
    let app = create_router(state, Duration::from_secs(config.request_timeout_secs));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn submit_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Response {
    let session_id = match request.session_id {
        Some(raw) => match SessionId::new(raw) {
            Ok(id) => id,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        },
        None => SessionId::generate(),
    };

    // Detached so a request timeout cannot drop the exchange before it is
    // recorded.
    let assistant = Arc::clone(&state.assistant);
    let text = request.text;
    let task = tokio::spawn(async move { assistant.submit(&text, &session_id).await });
    match task.await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            tracing::error!("Submit task failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Submit failed")
        }
    }
}

async fn recent_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<RecentParams>,
) -> Response {
    let session_id = match SessionId::new(id) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let n = params.n.unwrap_or(DEFAULT_RECENT);
    match state.assistant.recent(&session_id, n).await {
        Some(records) => Json(serde_json::json!({
            "session_id": session_id,
            "records": records,
        }))
        .into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            &format!("Unknown session: {session_id}"),
        ),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
