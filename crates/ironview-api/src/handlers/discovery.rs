//! Discovery control handlers.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use ironview_discovery::{DiscoveryStatus, RunError, RunOptions};

use super::ServerState;

/// Request body of `POST /api/discovery/run`.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub interfaces: Option<Vec<String>>,
    #[serde(default = "default_auto_activate")]
    pub auto_activate: bool,
    #[serde(default)]
    pub overwrite_existing: bool,
}

fn default_auto_activate() -> bool {
    true
}

/// `POST /api/discovery/run` — runs a scan-and-import cycle and returns its
/// stats; 409 while another run is active.
pub async fn run_handler(
    State(state): State<ServerState>,
    Json(request): Json<RunRequest>,
) -> impl IntoResponse {
    let options = RunOptions {
        interfaces: request.interfaces,
        auto_activate: request.auto_activate,
        overwrite_existing: request.overwrite_existing,
    };

    match state.discovery.run(options).await {
        Ok(stats) => (StatusCode::OK, Json(json!(stats))),
        Err(RunError::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "a discovery run is already active" })),
        ),
    }
}

/// `GET /api/discovery/status`
pub async fn status_handler(State(state): State<ServerState>) -> Json<DiscoveryStatus> {
    Json(state.discovery.status())
}

/// `GET /api/discovery/logs` — plain-text log of the current run.
pub async fn logs_handler(State(state): State<ServerState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.discovery.log_text(),
    )
}
