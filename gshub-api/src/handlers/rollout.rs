use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::auth::{self, AuthUser};
use crate::error::ApiError;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RolloutResponse {
    pub message: String,
    /// Resources the update was dispatched to.
    pub targets: Vec<String>,
    pub completed: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/instance/rollout-update",
    responses(
        (status = 200, description = "Update script ran on every running instance", body = RolloutResponse),
        (status = 401, description = "Missing or invalid session"),
        (status = 403, description = "Admin role required"),
        (status = 500, description = "Rollout halted")
    )
)]
pub async fn rollout_update(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<RolloutResponse>, ApiError> {
    auth::require_admin(&user)?;
    tracing::info!("[{}] rollout requested", user.email);

    let report = state.rollout.rollout_update().await.map_err(|e| {
        tracing::error!("[{}] rollout halted: {}", user.email, e);
        ApiError::from(e)
    })?;

    let message = match &report.command_id {
        Some(command_id) => format!(
            "Updated {} instance(s) with command {}",
            report.completed.len(),
            command_id
        ),
        None => "No running instances to update".to_string(),
    };
    Ok(Json(RolloutResponse {
        message,
        targets: report.targets,
        completed: report.completed,
    }))
}
