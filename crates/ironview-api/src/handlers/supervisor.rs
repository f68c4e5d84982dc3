//! Supervisor control handlers.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use ironview_devices::{DeviceStatusReport, StartOutcome, StopOutcome};

use super::ServerState;

/// `POST /api/supervisor/devices/:id/start`
///
/// 202 accepted, 404 unknown device, 409 already running, 422 refused by
/// configuration.
pub async fn start_device_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
) -> impl IntoResponse {
    match state.supervisor.start(device_id).await {
        StartOutcome::Started => (
            StatusCode::ACCEPTED,
            Json(json!({ "device_id": device_id, "status": "starting" })),
        ),
        StartOutcome::AlreadyRunning => (
            StatusCode::CONFLICT,
            Json(json!({ "device_id": device_id, "error": "already running" })),
        ),
        StartOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "device_id": device_id, "error": "unknown device" })),
        ),
        StartOutcome::Refused(reason) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "device_id": device_id, "error": reason })),
        ),
    }
}

/// `POST /api/supervisor/devices/:id/stop`
pub async fn stop_device_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
) -> impl IntoResponse {
    match state.supervisor.stop(device_id).await {
        StopOutcome::Stopped => (
            StatusCode::ACCEPTED,
            Json(json!({ "device_id": device_id, "status": "stopping" })),
        ),
        StopOutcome::NotRunning => (
            StatusCode::CONFLICT,
            Json(json!({ "device_id": device_id, "error": "not running" })),
        ),
        StopOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "device_id": device_id, "error": "unknown device" })),
        ),
    }
}

/// `GET /api/supervisor/status`
pub async fn status_handler(
    State(state): State<ServerState>,
) -> Json<HashMap<i64, DeviceStatusReport>> {
    Json(state.supervisor.status().await)
}

/// `GET /api/supervisor/devices/:id/log` — the device's log ring.
pub async fn device_log_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
) -> impl IntoResponse {
    match state.supervisor.device_log(device_id).await {
        Some(entries) => (StatusCode::OK, Json(json!({ "entries": entries }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "device_id": device_id, "error": "no poller for device" })),
        ),
    }
}
