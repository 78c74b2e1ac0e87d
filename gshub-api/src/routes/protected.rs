// Protected routes (require user session)
use crate::app::AppState;
use crate::auth;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;

use crate::handlers::instances::{
    create_instance, instance_usage, list_instances, start_instance, stop_instance,
    terminate_instance,
};
use crate::handlers::rollout::rollout_update;

pub fn create_protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/instance", get(list_instances).post(create_instance))
        .route("/instance/rollout-update", post(rollout_update))
        .route("/instance/{id}", delete(terminate_instance))
        .route("/instance/{id}/start", post(start_instance))
        .route("/instance/{id}/stop", post(stop_instance))
        .route("/instance/{id}/usage", get(instance_usage))
        .route_layer(middleware::from_fn(auth::require_user))
}
