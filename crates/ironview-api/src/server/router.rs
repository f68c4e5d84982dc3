//! Application router configuration.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use super::types::ServerState;
use crate::handlers::{basic, devices, discovery, readings, supervisor};

const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024;

/// Create the application router.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(basic::health_handler))
        .route("/api/health/status", get(basic::health_status_handler))
        // Supervisor control surface
        .route(
            "/api/supervisor/devices/:id/start",
            post(supervisor::start_device_handler),
        )
        .route(
            "/api/supervisor/devices/:id/stop",
            post(supervisor::stop_device_handler),
        )
        .route("/api/supervisor/status", get(supervisor::status_handler))
        .route(
            "/api/supervisor/devices/:id/log",
            get(supervisor::device_log_handler),
        )
        // Discovery
        .route("/api/discovery/run", post(discovery::run_handler))
        .route("/api/discovery/status", get(discovery::status_handler))
        .route("/api/discovery/logs", get(discovery::logs_handler))
        // Devices API
        .route("/api/devices", get(devices::list_devices_handler))
        .route("/api/devices", post(devices::add_device_handler))
        .route("/api/devices/:id", get(devices::get_device_handler))
        .route("/api/devices/:id", put(devices::update_device_handler))
        .route("/api/devices/:id", delete(devices::delete_device_handler))
        .route(
            "/api/devices/:id/active",
            put(devices::set_active_handler),
        )
        .route(
            "/api/devices/:id/current",
            get(devices::current_values_handler),
        )
        .route(
            "/api/devices/:id/write",
            post(devices::write_register_handler),
        )
        // Register configs
        .route(
            "/api/devices/:id/registers",
            get(devices::list_registers_handler),
        )
        .route(
            "/api/devices/:id/registers",
            post(devices::add_register_handler),
        )
        .route(
            "/api/devices/:id/registers/import",
            post(devices::import_registers_handler),
        )
        .route(
            "/api/registers/:id",
            delete(devices::delete_register_handler),
        )
        .route(
            "/api/registers/:id/active",
            put(devices::set_register_active_handler),
        )
        // Readings
        .route(
            "/api/devices/:id/readings/latest",
            get(readings::latest_per_register_handler),
        )
        .route(
            "/api/registers/:id/readings",
            get(readings::range_handler),
        )
        .route(
            "/api/registers/:id/aggregate",
            get(readings::aggregate_handler),
        )
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_SIZE))
        .with_state(state)
}
