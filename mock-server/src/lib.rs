//! Stand-in for the AI workflow service.
//!
//! Replays a scripted sequence of replies on `POST /`, one per request, and
//! falls back to a fixed story once the script runs dry. Every body it
//! receives is recorded and can be read back from `GET /_requests`.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{net::TcpListener, sync::Mutex};

/// One canned reply.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptedReply {
    pub status: u16,
    pub body: String,
    #[serde(default)]
    pub delay_ms: u64,
}

impl ScriptedReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            delay_ms: 0,
        }
    }

    /// A well-formed reply whose `output.value` is a JSON story.
    pub fn story(title: &str) -> Self {
        let story = serde_json::json!({ "title": title, "chapters": [] }).to_string();
        let envelope = serde_json::json!({ "output": { "type": "string", "value": story } });
        Self::new(200, envelope.to_string())
    }

    pub fn control_flow_excluded() -> Self {
        Self::new(200, r#"{"output":{"type":"control-flow-excluded"}}"#)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    script: Mutex<VecDeque<ScriptedReply>>,
    received: Mutex<Vec<Value>>,
}

pub type Shared = Arc<MockState>;

pub fn app(script: Vec<ScriptedReply>) -> Router {
    let state: Shared = Arc::new(MockState {
        script: Mutex::new(script.into()),
        received: Mutex::new(Vec::new()),
    });
    Router::new()
        .route("/", post(run_workflow))
        .route("/_requests", get(list_requests))
        .route("/_script", post(replace_script))
        .with_state(state)
}

pub async fn run(listener: TcpListener, script: Vec<ScriptedReply>) -> Result<(), std::io::Error> {
    axum::serve(listener, app(script)).await
}

async fn run_workflow(State(state): State<Shared>, body: String) -> impl IntoResponse {
    let recorded = serde_json::from_str(&body).unwrap_or(Value::String(body));
    state.received.lock().await.push(recorded);

    let reply = state
        .script
        .lock()
        .await
        .pop_front()
        .unwrap_or_else(|| ScriptedReply::story("Fallback story"));
    tracing::debug!(status = reply.status, delay_ms = reply.delay_ms, "mock workflow reply");

    if reply.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(reply.delay_ms)).await;
    }
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], reply.body)
}

async fn list_requests(State(state): State<Shared>) -> Json<Vec<Value>> {
    Json(state.received.lock().await.clone())
}

async fn replace_script(
    State(state): State<Shared>,
    Json(script): Json<Vec<ScriptedReply>>,
) -> StatusCode {
    *state.script.lock().await = script.into();
    StatusCode::NO_CONTENT
}
