//! Operator CRUD for devices and their register configs.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use ironview_core::config::polling;
use ironview_storage::{Device, NewDevice, NewRegisterConfig, ProtocolKind, RegisterConfig, WordOrder};

use super::{ApiError, ApiResult, ServerState};

/// `GET /api/devices`
pub async fn list_devices_handler(State(state): State<ServerState>) -> ApiResult<Json<Vec<Device>>> {
    Ok(Json(state.stores.devices.list_all()?))
}

/// `POST /api/devices` — operator device creation.
pub async fn add_device_handler(
    State(state): State<ServerState>,
    Json(new): Json<NewDevice>,
) -> ApiResult<(StatusCode, Json<Device>)> {
    let device = state.stores.devices.insert(new)?;
    Ok((StatusCode::CREATED, Json(device)))
}

/// `GET /api/devices/:id`
pub async fn get_device_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
) -> ApiResult<Json<Device>> {
    match state.stores.devices.get(device_id)? {
        Some(device) => Ok(Json(device)),
        None => Err(ApiError::not_found(format!("device {device_id}"))),
    }
}

/// Partial update applied over the stored row.
#[derive(Debug, Deserialize)]
pub struct UpdateDeviceRequest {
    pub name: Option<String>,
    pub mac: Option<String>,
    pub subnet: Option<String>,
    pub ports: Option<Vec<u16>>,
    pub protocol: Option<ProtocolKind>,
    pub kind: Option<String>,
    pub unit_id: Option<u8>,
    pub polling_interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub word_order: Option<WordOrder>,
    pub info: Option<HashMap<String, String>>,
}

/// `PUT /api/devices/:id` — the operator path; may touch any field.
pub async fn update_device_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
    Json(update): Json<UpdateDeviceRequest>,
) -> ApiResult<Json<Device>> {
    let Some(mut device) = state.stores.devices.get(device_id)? else {
        return Err(ApiError::not_found(format!("device {device_id}")));
    };

    if let Some(name) = update.name {
        device.name = name;
    }
    if let Some(mac) = update.mac {
        device.mac = Some(mac);
    }
    if let Some(subnet) = update.subnet {
        device.subnet = Some(subnet);
    }
    if let Some(ports) = update.ports {
        device.ports = ports;
    }
    if let Some(protocol) = update.protocol {
        device.protocol = protocol;
    }
    if let Some(kind) = update.kind {
        device.kind = kind;
    }
    if let Some(unit_id) = update.unit_id {
        device.unit_id = unit_id;
    }
    if let Some(interval) = update.polling_interval_ms {
        device.polling_interval_ms = interval;
    }
    if let Some(timeout) = update.timeout_ms {
        device.timeout_ms = timeout;
    }
    if let Some(word_order) = update.word_order {
        device.word_order = word_order;
    }
    if let Some(info) = update.info {
        device.info = info;
    }

    if device.polling_interval_ms < polling::MIN_INTERVAL_MS
        || device.timeout_ms < polling::MIN_INTERVAL_MS
    {
        return Err(ApiError::unprocessable(format!(
            "polling_interval_ms and timeout_ms must be >= {}",
            polling::MIN_INTERVAL_MS
        )));
    }

    state.stores.devices.update(&device)?;
    Ok(Json(device))
}

/// `DELETE /api/devices/:id` — stops the poller, then cascades.
pub async fn delete_device_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.supervisor.stop(device_id).await;
    if state.stores.delete_device(device_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("device {device_id}")))
    }
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

/// `PUT /api/devices/:id/active`
pub async fn set_active_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
    Json(request): Json<SetActiveRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.stores.devices.set_active(device_id, request.active)?;
    if !request.active {
        state.supervisor.stop(device_id).await;
    }
    Ok(Json(json!({ "device_id": device_id, "active": request.active })))
}

/// `GET /api/devices/:id/current` — freshest decoded values from the
/// in-process cache.
pub async fn current_values_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(device) = state.stores.devices.get(device_id)? else {
        return Err(ApiError::not_found(format!("device {device_id}")));
    };
    let values = state.supervisor.cache().device_snapshot(device.ip).await;
    Ok(Json(json!({ "device_id": device_id, "ip": device.ip, "values": values })))
}

#[derive(Debug, Deserialize)]
pub struct WriteRegisterRequest {
    pub address: u16,
    pub value: u16,
}

/// `POST /api/devices/:id/write` — operator write of one register.
pub async fn write_register_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
    Json(request): Json<WriteRegisterRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    match state
        .supervisor
        .write_register(device_id, request.address, request.value)
        .await
    {
        Ok(ok) => Ok(Json(json!({
            "device_id": device_id,
            "address": request.address,
            "written": ok,
        }))),
        Err(e) => Err(ApiError::unprocessable(e.to_string())),
    }
}

/// `GET /api/devices/:id/registers`
pub async fn list_registers_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
) -> ApiResult<Json<Vec<RegisterConfig>>> {
    if state.stores.devices.get(device_id)?.is_none() {
        return Err(ApiError::not_found(format!("device {device_id}")));
    }
    Ok(Json(state.stores.registers.list_for_device(device_id)?))
}

/// Request body of `POST /api/devices/:id/registers`; the device id comes
/// from the path.
#[derive(Debug, Deserialize)]
pub struct AddRegisterRequest {
    pub name: String,
    pub address: u16,
    #[serde(default = "default_count")]
    pub count: u16,
    pub register_type: ironview_storage::RegisterKind,
    pub data_type: ironview_storage::DataKind,
    #[serde(default = "default_scale")]
    pub scale_factor: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_count() -> u16 {
    1
}

fn default_scale() -> f64 {
    1.0
}

fn default_active() -> bool {
    true
}

/// `POST /api/devices/:id/registers`
pub async fn add_register_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
    Json(request): Json<AddRegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterConfig>)> {
    if state.stores.devices.get(device_id)?.is_none() {
        return Err(ApiError::not_found(format!("device {device_id}")));
    }

    let config = state.stores.registers.insert(NewRegisterConfig {
        device_id,
        name: request.name,
        address: request.address,
        count: request.count,
        register_type: request.register_type,
        data_type: request.data_type,
        scale_factor: request.scale_factor,
        offset: request.offset,
        unit: request.unit,
        interval_ms: request.interval_ms,
        active: request.active,
    })?;
    Ok((StatusCode::CREATED, Json(config)))
}

/// `POST /api/devices/:id/registers/import` — one-time bulk declaration of
/// register configs, e.g. from a converted register map file. Existing
/// (address, type) pairs are left alone and counted as skipped.
pub async fn import_registers_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
    Json(requests): Json<Vec<AddRegisterRequest>>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.stores.devices.get(device_id)?.is_none() {
        return Err(ApiError::not_found(format!("device {device_id}")));
    }

    let mut imported = 0usize;
    let mut skipped = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for request in requests {
        let result = state.stores.registers.insert(NewRegisterConfig {
            device_id,
            name: request.name,
            address: request.address,
            count: request.count,
            register_type: request.register_type,
            data_type: request.data_type,
            scale_factor: request.scale_factor,
            offset: request.offset,
            unit: request.unit,
            interval_ms: request.interval_ms,
            active: request.active,
        });
        match result {
            Ok(_) => imported += 1,
            Err(ironview_storage::Error::Conflict(_)) => skipped += 1,
            Err(e) => errors.push(e.to_string()),
        }
    }

    Ok(Json(json!({
        "device_id": device_id,
        "imported": imported,
        "skipped": skipped,
        "errors": errors,
    })))
}

/// `DELETE /api/registers/:id`
pub async fn delete_register_handler(
    State(state): State<ServerState>,
    Path(register_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.stores.registers.delete(register_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("register config {register_id}")))
    }
}

/// `PUT /api/registers/:id/active`
pub async fn set_register_active_handler(
    State(state): State<ServerState>,
    Path(register_id): Path<i64>,
    Json(request): Json<SetActiveRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.stores.registers.set_active(register_id, request.active)?;
    Ok(Json(json!({ "register_id": register_id, "active": request.active })))
}
