// Callbacks issued by the instances themselves (not by users).
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use gshub_common::bus::UsageEventType;
use gshub_common::{InstanceBurnedCycle, InstanceCycle, StartupHandshake};
use gshub_orchestrator::parse_instance_id;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::error::ApiError;
use crate::usage_events::emit_usage_event;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartupRequest {
    pub public_ip: String,
    /// Cycles burned by a failed previous boot, recorded alongside the readiness update.
    #[serde(default)]
    pub failed_burned_cycle_amount: u32,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownRequest {
    #[serde(default)]
    pub burned_cycle_amount: u32,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownResponse {
    pub burned_cycle: InstanceBurnedCycle,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CyclesRequest {
    pub cycle_amount: u32,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CyclesResponse {
    pub cycle: InstanceCycle,
}

fn caller(id: &str) -> String {
    format!("instance:{}", id)
}

#[utoipa::path(
    get,
    path = "/instance/startup/{id}",
    params(("id" = String, Path, description = "Instance id")),
    request_body = StartupRequest,
    responses(
        (status = 200, description = "Instance marked ready", body = StartupHandshake),
        (status = 400, description = "Invalid id, address or transition"),
        (status = 404, description = "Instance not found")
    )
)]
pub async fn instance_startup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<StartupRequest>, JsonRejection>,
) -> Result<Json<StartupHandshake>, ApiError> {
    let Json(req) = payload?;
    let instance_id = parse_instance_id(&id).map_err(|e| ApiError::logged(e, &caller(&id)))?;
    let handshake = state
        .orchestrator
        .on_instance_startup(&id, &req.public_ip, req.failed_burned_cycle_amount)
        .await
        .map_err(|e| ApiError::logged(e, &caller(&id)))?;

    emit_usage_event(
        &state,
        UsageEventType::InstanceReady,
        instance_id,
        serde_json::json!({ "publicIp": req.public_ip.trim(), "ownerId": handshake.owner_id }),
    );
    if req.failed_burned_cycle_amount > 0 {
        emit_usage_event(
            &state,
            UsageEventType::BurnedCycleRecorded,
            instance_id,
            serde_json::json!({ "amount": req.failed_burned_cycle_amount }),
        );
    }
    Ok(Json(handshake))
}

#[utoipa::path(
    post,
    path = "/instance/shutdown/{id}",
    params(("id" = String, Path, description = "Instance id")),
    request_body = ShutdownRequest,
    responses(
        (status = 200, description = "Shutdown recorded", body = ShutdownResponse),
        (status = 400, description = "Invalid id or transition"),
        (status = 404, description = "Instance not found")
    )
)]
pub async fn instance_shutdown(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<ShutdownRequest>, JsonRejection>,
) -> Result<Json<ShutdownResponse>, ApiError> {
    let Json(req) = payload?;
    let burned_cycle = state
        .orchestrator
        .on_instance_shutdown(&id, req.burned_cycle_amount)
        .await
        .map_err(|e| ApiError::logged(e, &caller(&id)))?;
    emit_usage_event(
        &state,
        UsageEventType::BurnedCycleRecorded,
        burned_cycle.instance_id,
        serde_json::json!({ "amount": burned_cycle.amount }),
    );
    Ok(Json(ShutdownResponse { burned_cycle }))
}

#[utoipa::path(
    post,
    path = "/instance/cycles/{id}",
    params(("id" = String, Path, description = "Instance id")),
    request_body = CyclesRequest,
    responses(
        (status = 200, description = "Cycles recorded", body = CyclesResponse),
        (status = 400, description = "Invalid id or amount"),
        (status = 404, description = "Instance not found")
    )
)]
pub async fn instance_cycles(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<CyclesRequest>, JsonRejection>,
) -> Result<Json<CyclesResponse>, ApiError> {
    let Json(req) = payload?;
    let cycle = state
        .orchestrator
        .report_cycles(&id, req.cycle_amount)
        .await
        .map_err(|e| ApiError::logged(e, &caller(&id)))?;
    emit_usage_event(
        &state,
        UsageEventType::CycleRecorded,
        cycle.instance_id,
        serde_json::json!({ "amount": cycle.amount }),
    );
    Ok(Json(CyclesResponse { cycle }))
}
