// Shared harness: the full router over an in-memory store and the mock gateway.
#![allow(dead_code)]
use axum_test::TestServer;
use gshub_api::app::{create_cors, AppState};
use gshub_api::auth::{sign_session_jwt, AuthUser};
use gshub_api::routes::create_router;
use gshub_api::setup::seed_memory_store;
use gshub_common::{ServiceConfigurations, UserRole};
use gshub_orchestrator::{
    load_service_presets, FileScriptSource, InMemoryStore, InstanceRepository, Orchestrator,
    RolloutCoordinator,
};
use gshub_providers::mock::MockGateway;
use std::sync::Arc;
use std::time::Duration;

pub const OWNER_EMAIL: &str = "owner@test.com";
pub const OTHER_EMAIL: &str = "other@test.com";
pub const ADMIN_EMAIL: &str = "admin@test.com";

pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<MockGateway>,
    /// First seeded plan ("starter", DEV1-S, 2048 MB).
    pub plan_id: i64,
    pub owner: AuthUser,
    pub other: AuthUser,
    pub admin: AuthUser,
}

pub fn presets() -> ServiceConfigurations {
    load_service_presets(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../service-presets/service-configurations.json"
    ))
    .expect("bundled presets")
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with_token(None).await
}

pub async fn create_test_app_with_token(callback_token: Option<&str>) -> TestApp {
    let presets = presets();
    let store = Arc::new(InMemoryStore::with_presets(presets.clone()));
    seed_memory_store(&store, &presets, ADMIN_EMAIL);
    let owner = store.seed_user(OWNER_EMAIL, UserRole::User);
    let other = store.seed_user(OTHER_EMAIL, UserRole::User);
    let admin = store
        .find_owner(ADMIN_EMAIL)
        .await
        .unwrap()
        .expect("seeded admin");

    let gateway = Arc::new(MockGateway::new());
    let orchestrator = Orchestrator::with_store(gateway.clone(), store.clone());
    let rollout = RolloutCoordinator::new(
        gateway.clone(),
        Arc::new(FileScriptSource::new(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../scripts/instance-update.sh"
        ))),
    )
    .with_timing(Duration::from_millis(10), Duration::from_secs(2));

    let state = AppState::new(
        orchestrator,
        rollout,
        None,
        callback_token.map(str::to_string),
    );
    let app = create_router(state.clone())
        .layer(create_cors())
        .with_state(state);
    let server = TestServer::new(app).unwrap();

    TestApp {
        server,
        store,
        gateway,
        plan_id: 1,
        owner: principal(owner.id, OWNER_EMAIL, UserRole::User),
        other: principal(other.id, OTHER_EMAIL, UserRole::User),
        admin: principal(admin.id, ADMIN_EMAIL, UserRole::Admin),
    }
}

fn principal(user_id: i64, email: &str, role: UserRole) -> AuthUser {
    AuthUser {
        user_id,
        email: email.to_string(),
        role,
    }
}

pub fn bearer(user: &AuthUser) -> String {
    format!("Bearer {}", sign_session_jwt(user).expect("sign test session"))
}
