//! HTTP front for the story workflow proxy.
//!
//! # Design
//! The handler decodes the request, hands it to `WorkflowOrchestrator` on
//! tokio's blocking pool and forwards whatever result comes back. The
//! orchestrator's retry loop sleeps between attempts, so it must never run on
//! an async worker. Each run gets a `CancelToken` carrying the operation
//! deadline; if the inbound request is dropped, the token's guard cancels the
//! run at its next checkpoint.

pub mod logging;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use story_core::{CancelToken, StoryRequest, WorkflowOrchestrator};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct AppState {
    orchestrator: Arc<WorkflowOrchestrator>,
    operation_timeout: Duration,
}

impl AppState {
    pub fn new(orchestrator: WorkflowOrchestrator, operation_timeout: Duration) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            operation_timeout,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/generate-story", post(generate_story))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn run(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

fn error_body(message: &str) -> Json<Value> {
    Json(json!({ "error": message, "status": "error" }))
}

async fn generate_story(
    State(state): State<AppState>,
    payload: Result<Json<StoryRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "rejecting story request");
            return (StatusCode::BAD_REQUEST, error_body("Invalid request body"));
        }
    };

    let cancel = CancelToken::new().with_timeout(state.operation_timeout);
    let guard = cancel.drop_guard();
    let orchestrator = Arc::clone(&state.orchestrator);
    let joined =
        tokio::task::spawn_blocking(move || orchestrator.generate(&request, &cancel)).await;
    guard.disarm();

    match joined {
        Ok(Ok(result)) => {
            let status =
                StatusCode::from_u16(result.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            tracing::info!(
                status = status.as_u16(),
                tag = result.status_tag(),
                attempts = result.attempts,
                "story request finished"
            );
            (status, Json(result.to_body()))
        }
        Ok(Err(err)) => {
            tracing::error!(error = %err, "could not encode workflow request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("Failed to prepare request"),
            )
        }
        Err(err) => {
            tracing::error!(error = %err, "story generation task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("Story generation task failed"),
            )
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
