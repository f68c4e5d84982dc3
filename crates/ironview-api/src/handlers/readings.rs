//! Reading queries.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use ironview_storage::{Reading, ReadingBucket};

use super::{ApiError, ApiResult, ServerState};

/// One row of the latest-per-register view.
#[derive(Debug, Serialize)]
pub struct LatestRow {
    pub register_id: i64,
    pub name: String,
    pub reading: Reading,
}

/// `GET /api/devices/:id/readings/latest` — newest sample of every register
/// declared on the device, newest first.
pub async fn latest_per_register_handler(
    State(state): State<ServerState>,
    Path(device_id): Path<i64>,
) -> ApiResult<Json<Vec<LatestRow>>> {
    if state.stores.devices.get(device_id)?.is_none() {
        return Err(ApiError::not_found(format!("device {device_id}")));
    }

    let rows = state
        .stores
        .latest_per_register(device_id)?
        .into_iter()
        .map(|(config, reading)| LatestRow {
            register_id: config.id,
            name: config.name,
            reading,
        })
        .collect();
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: i64,
    pub to: i64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    1000
}

/// `GET /api/registers/:id/readings?from=..&to=..&limit=..`
pub async fn range_handler(
    State(state): State<ServerState>,
    Path(register_id): Path<i64>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let rows = state
        .stores
        .readings
        .range(register_id, query.from, query.to, query.limit)?;
    Ok(Json(json!({ "register_id": register_id, "readings": rows })))
}

#[derive(Debug, Deserialize)]
pub struct AggregateQuery {
    pub from: i64,
    pub to: i64,
    #[serde(default = "default_bucket_minutes")]
    pub bucket_minutes: u32,
}

fn default_bucket_minutes() -> u32 {
    5
}

/// `GET /api/registers/:id/aggregate?from=..&to=..&bucket_minutes=..`
pub async fn aggregate_handler(
    State(state): State<ServerState>,
    Path(register_id): Path<i64>,
    Query(query): Query<AggregateQuery>,
) -> ApiResult<Json<Vec<ReadingBucket>>> {
    let buckets = state.stores.readings.aggregate(
        register_id,
        query.from,
        query.to,
        query.bucket_minutes,
    )?;
    Ok(Json(buckets))
}
