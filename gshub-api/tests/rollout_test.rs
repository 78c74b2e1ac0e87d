// HTTP tests for the admin-only fleet rollout
mod common;

use common::{bearer, create_test_app};
use gshub_providers::inventory::CommandStatus;
use gshub_providers::mock::GatewayOp;

#[tokio::test]
async fn test_rollout_requires_admin() {
    let app = create_test_app().await;

    let response = app
        .server
        .post("/instance/rollout-update")
        .add_header("Authorization", bearer(&app.owner))
        .await;
    assert_eq!(response.status_code(), 403);
    assert_eq!(app.gateway.count(GatewayOp::ListRunning), 0);
}

#[tokio::test]
async fn test_rollout_with_empty_fleet_succeeds_without_dispatch() {
    let app = create_test_app().await;

    let response = app
        .server
        .post("/instance/rollout-update")
        .add_header("Authorization", bearer(&app.admin))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["message"], "No running instances to update");
    assert!(body["targets"].as_array().unwrap().is_empty());
    assert_eq!(app.gateway.count(GatewayOp::RunRemoteCommand), 0);
}

#[tokio::test]
async fn test_rollout_updates_every_running_instance() {
    let app = create_test_app().await;
    app.gateway.seed_running("srv-a");
    app.gateway.seed_running("srv-b");

    let response = app
        .server
        .post("/instance/rollout-update")
        .add_header("Authorization", bearer(&app.admin))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    let mut completed: Vec<String> = serde_json::from_value(body["completed"].clone()).unwrap();
    completed.sort();
    assert_eq!(completed, vec!["srv-a".to_string(), "srv-b".to_string()]);
    assert_eq!(body["targets"].as_array().unwrap().len(), 2);
    assert_eq!(app.gateway.count(GatewayOp::RunRemoteCommand), 1);
}

#[tokio::test]
async fn test_rollout_failure_is_a_server_error() {
    let app = create_test_app().await;
    app.gateway.seed_running("srv-a");
    app.gateway.set_command_outcome(
        "srv-a",
        CommandStatus::Failed {
            detail: "apt-get exited with 100".to_string(),
        },
    );

    let response = app
        .server
        .post("/instance/rollout-update")
        .add_header("Authorization", bearer(&app.admin))
        .await;
    assert_eq!(response.status_code(), 500);
    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("srv-a"));
}
