// Instance callback routes (instance token, when configured)
use crate::app::AppState;
use crate::auth;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::handlers::callbacks::{instance_cycles, instance_shutdown, instance_startup};

pub fn create_callback_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/instance/startup/{id}", get(instance_startup))
        .route("/instance/shutdown/{id}", post(instance_shutdown))
        .route("/instance/cycles/{id}", post(instance_cycles))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_instance_token,
        ))
}
