use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::StatusCode,
    Json,
};
use gshub_common::bus::UsageEventType;
use gshub_common::{Instance, InstanceView, UsageSummary};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::usage_events::emit_usage_event;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub plan_id: i64,
}

#[utoipa::path(
    post,
    path = "/instance",
    request_body = CreateInstanceRequest,
    responses(
        (status = 201, description = "Resource launched and recorded", body = Instance),
        (status = 400, description = "Invalid plan or provider failure"),
        (status = 401, description = "Missing or invalid session"),
        (status = 500, description = "Storage failure")
    )
)]
pub async fn create_instance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CreateInstanceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Instance>), ApiError> {
    let Json(req) = payload?;
    let instance = state
        .orchestrator
        .create_for_owner(&user.email, req.plan_id)
        .await
        .map_err(|e| ApiError::logged(e, &user.email))?;

    tracing::info!(
        "[{}] created instance {} ({}) on plan {}",
        user.email,
        instance.id,
        instance.real_id,
        instance.plan_id
    );
    emit_usage_event(
        &state,
        UsageEventType::InstanceCreated,
        instance.id,
        serde_json::json!({ "planId": instance.plan_id, "userId": instance.user_id }),
    );
    Ok((StatusCode::CREATED, Json(instance)))
}

#[utoipa::path(
    get,
    path = "/instance",
    responses(
        (status = 200, description = "Instances owned by the caller with live provider state", body = Vec<InstanceView>),
        (status = 401, description = "Missing or invalid session")
    )
)]
pub async fn list_instances(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<InstanceView>>, ApiError> {
    let instances = state
        .orchestrator
        .list_for_owner(&user.email)
        .await
        .map_err(|e| ApiError::logged(e, &user.email))?;
    Ok(Json(instances))
}

#[utoipa::path(
    post,
    path = "/instance/{id}/start",
    params(("id" = String, Path, description = "Instance id")),
    responses(
        (status = 200, description = "Power-on requested", body = Instance),
        (status = 400, description = "Invalid id, wrong state or provider failure"),
        (status = 404, description = "Instance not found")
    )
)]
pub async fn start_instance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let instance = state
        .orchestrator
        .start(&id, &user.email)
        .await
        .map_err(|e| ApiError::logged(e, &user.email))?;
    tracing::info!("[{}] started instance {}", user.email, instance.id);
    Ok(Json(instance))
}

#[utoipa::path(
    post,
    path = "/instance/{id}/stop",
    params(("id" = String, Path, description = "Instance id")),
    responses(
        (status = 200, description = "Power-off requested", body = Instance),
        (status = 400, description = "Invalid id, wrong state or provider failure"),
        (status = 404, description = "Instance not found")
    )
)]
pub async fn stop_instance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let instance = state
        .orchestrator
        .stop(&id, &user.email)
        .await
        .map_err(|e| ApiError::logged(e, &user.email))?;
    tracing::info!("[{}] stopped instance {}", user.email, instance.id);
    Ok(Json(instance))
}

#[utoipa::path(
    delete,
    path = "/instance/{id}",
    params(("id" = String, Path, description = "Instance id")),
    responses(
        (status = 200, description = "Resource destroyed and record removed", body = Instance),
        (status = 400, description = "Invalid id or provider failure"),
        (status = 404, description = "Instance not found")
    )
)]
pub async fn terminate_instance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let instance = state
        .orchestrator
        .terminate(&id, &user.email)
        .await
        .map_err(|e| ApiError::logged(e, &user.email))?;
    tracing::info!("[{}] terminated instance {}", user.email, instance.id);
    emit_usage_event(
        &state,
        UsageEventType::InstanceTerminated,
        instance.id,
        serde_json::json!({ "realId": instance.real_id }),
    );
    Ok(Json(instance))
}

#[utoipa::path(
    get,
    path = "/instance/{id}/usage",
    params(("id" = String, Path, description = "Instance id")),
    responses(
        (status = 200, description = "Cycle totals for the instance", body = UsageSummary),
        (status = 400, description = "Invalid id"),
        (status = 404, description = "Instance not found")
    )
)]
pub async fn instance_usage(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<UsageSummary>, ApiError> {
    let summary = state
        .orchestrator
        .usage_summary(&id, &user.email)
        .await
        .map_err(|e| ApiError::logged(e, &user.email))?;
    Ok(Json(summary))
}
