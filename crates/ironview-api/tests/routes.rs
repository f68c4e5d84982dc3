//! Route-level tests of the control surface.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use ironview_api::{create_router, ServerState};
use ironview_devices::{AdapterRegistry, SimAdapter, Supervisor, SupervisorSettings, ValueCache};
use ironview_discovery::DiscoveryService;
use ironview_storage::{Quality, Reading, Stores};

fn test_app() -> (Router, Arc<Stores>) {
    let stores = Stores::memory().unwrap();

    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(SimAdapter::new()));
    let supervisor = Supervisor::new(
        stores.clone(),
        Arc::new(registry),
        ValueCache::new(),
        SupervisorSettings::default(),
    );
    let discovery = DiscoveryService::new(stores.clone());

    let state = ServerState::new(stores.clone(), supervisor, discovery);
    (create_router(state), stores)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn device_body(ip: &str) -> Value {
    json!({
        "name": format!("PLC {ip}"),
        "ip": ip,
        "protocol": "modbus_tcp",
        "ports": [502],
        "active": true,
    })
}

#[tokio::test]
async fn health_endpoint() {
    let (app, _stores) = test_app();

    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "ironview");
}

#[tokio::test]
async fn device_crud_round_trip() {
    let (app, _stores) = test_app();

    // Create.
    let response = app
        .clone()
        .oneshot(post_json("/api/devices", device_body("10.2.0.1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["name"], "PLC 10.2.0.1");

    // Duplicate ip conflicts.
    let response = app
        .clone()
        .oneshot(post_json("/api/devices", device_body("10.2.0.1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // List and fetch.
    let response = app.clone().oneshot(get("/api/devices")).await.unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/devices/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Update.
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/api/devices/{id}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({ "name": "Press line" })).unwrap(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["name"], "Press line");

    // Interval below the floor is rejected.
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/api/devices/{id}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({ "polling_interval_ms": 10 })).unwrap(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Delete, then 404.
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/devices/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(get(&format!("/api/devices/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn register_declaration_and_import() {
    let (app, _stores) = test_app();

    let response = app
        .clone()
        .oneshot(post_json("/api/devices", device_body("10.2.0.2")))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_i64().unwrap();

    let register = json!({
        "name": "temperature",
        "address": 100,
        "register_type": "holding",
        "data_type": "uint16",
        "scale_factor": 0.1,
    });
    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/devices/{id}/registers"), register.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Same (address, type) again conflicts.
    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/devices/{id}/registers"), register.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Bulk import skips the existing declaration and adds the new one.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/devices/{id}/registers/import"),
            json!([
                register,
                {
                    "name": "pressure",
                    "address": 101,
                    "register_type": "holding",
                    "data_type": "int16",
                },
            ]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["imported"], 1);
    assert_eq!(stats["skipped"], 1);

    let response = app
        .oneshot(get(&format!("/api/devices/{id}/registers")))
        .await
        .unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn supervisor_endpoints() {
    let (app, _stores) = test_app();

    // Unknown device.
    let response = app
        .clone()
        .oneshot(post_json("/api/supervisor/devices/99/start", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(post_json("/api/devices", device_body("10.2.0.3")))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_i64().unwrap();

    // Start, then 409 on the second start.
    let uri = format!("/api/supervisor/devices/{id}/start");
    let response = app.clone().oneshot(post_json(&uri, json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let response = app.clone().oneshot(post_json(&uri, json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Status carries the device row.
    let response = app.clone().oneshot(get("/api/supervisor/status")).await.unwrap();
    let status = body_json(response).await;
    assert!(status.get(id.to_string()).is_some());

    // Stop, then 409 on the second stop.
    let uri = format!("/api/supervisor/devices/{id}/stop");
    let response = app.clone().oneshot(post_json(&uri, json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let response = app.oneshot(post_json(&uri, json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn reading_queries() {
    let (app, stores) = test_app();

    let response = app
        .clone()
        .oneshot(post_json("/api/devices", device_body("10.2.0.4")))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_i64().unwrap();

    let register = json!({
        "name": "flow",
        "address": 0,
        "register_type": "holding",
        "data_type": "uint16",
    });
    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/devices/{id}/registers"), register))
        .await
        .unwrap();
    let register_id = body_json(response).await["id"].as_i64().unwrap();

    stores
        .readings
        .append_batch(&[
            Reading {
                register_id,
                timestamp_ms: 60_000,
                raw_value: 10.0,
                scaled_value: 10.0,
                quality: Quality::Good,
            },
            Reading {
                register_id,
                timestamp_ms: 120_000,
                raw_value: 30.0,
                scaled_value: 30.0,
                quality: Quality::Good,
            },
        ])
        .unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!(
            "/api/registers/{register_id}/readings?from=0&to=200000&limit=10"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["readings"].as_array().unwrap().len(), 2);

    let response = app
        .clone()
        .oneshot(get(&format!(
            "/api/registers/{register_id}/aggregate?from=0&to=200000&bucket_minutes=5"
        )))
        .await
        .unwrap();
    let buckets = body_json(response).await;
    assert_eq!(buckets.as_array().unwrap().len(), 1);
    assert_eq!(buckets[0]["count"], 2);
    assert_eq!(buckets[0]["avg"], 20.0);

    let response = app
        .oneshot(get(&format!("/api/devices/{id}/readings/latest")))
        .await
        .unwrap();
    let latest = body_json(response).await;
    assert_eq!(latest.as_array().unwrap().len(), 1);
    assert_eq!(latest[0]["reading"]["scaled_value"], 30.0);
}

#[tokio::test]
async fn discovery_endpoints() {
    let (app, _stores) = test_app();

    let response = app.clone().oneshot(get("/api/discovery/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["running"], false);
    assert_eq!(status["result_count"], 0);

    // A run restricted to a non-existent interface completes with empty stats.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/discovery/run",
            json!({ "interfaces": ["no-such-interface"], "auto_activate": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["total_found"], 0);
    assert_eq!(stats["saved"], 0);

    let response = app.oneshot(get("/api/discovery/logs")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
