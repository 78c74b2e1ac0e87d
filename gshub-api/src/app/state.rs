use gshub_orchestrator::{Orchestrator, RolloutCoordinator};
use std::sync::Arc;

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub rollout: RolloutCoordinator,
    /// Usage events are only published when Redis is configured.
    pub redis_client: Option<redis::Client>,
    pub callback_token: Option<String>,
}

impl AppState {
    pub fn new(
        orchestrator: Orchestrator,
        rollout: RolloutCoordinator,
        redis_client: Option<redis::Client>,
        callback_token: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            rollout,
            redis_client,
            callback_token,
        })
    }
}
