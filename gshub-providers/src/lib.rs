use anyhow::Result;
use async_trait::async_trait;

/// Capability set the orchestrator needs from a compute provider.
///
/// Every call takes a slice of external resource ids so a provider can batch. Errors carry the
/// provider's own message; callers decide whether to retry (the orchestrator never does).
/// Dropping a returned future cancels the in-flight provider call.
#[async_trait]
pub trait CloudGateway: Send + Sync {
    async fn launch(&self, shape: &inventory::ResourceShape) -> Result<inventory::LaunchedResource>;

    /// Public IP is empty unless the resource state is "running".
    async fn describe(&self, external_ids: &[String]) -> Result<Vec<inventory::ResourceDescription>>;

    async fn start(&self, external_ids: &[String]) -> Result<()>;
    async fn stop(&self, external_ids: &[String]) -> Result<()>;
    async fn terminate(&self, external_ids: &[String]) -> Result<()>;

    async fn list_running(&self) -> Result<Vec<String>>;

    /// Fire-and-forget dispatch of a shell script to every target.
    /// Returns a command id to poll with `command_status`; dispatch success says nothing about
    /// completion.
    async fn run_remote_command(&self, external_ids: &[String], script: &str) -> Result<String>;

    async fn command_status(
        &self,
        command_id: &str,
        external_id: &str,
    ) -> Result<inventory::CommandStatus>;

    // Optional: provider-specific shape validation.
    // Default accepts any shape with a non-empty instance type.
    fn supports_shape(&self, shape: &inventory::ResourceShape) -> bool {
        !shape.instance_type.trim().is_empty()
    }
}

pub mod inventory {
    use serde::{Deserialize, Serialize};

    /// What to launch, derived from a catalog plan.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ResourceShape {
        pub instance_type: String,
        pub memory_mb: i32,
        pub disk_gb: i32,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct LaunchedResource {
        pub external_id: String,
        pub state: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ResourceDescription {
        pub external_id: String,
        pub state: String,
        pub public_ip: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum CommandStatus {
        Pending,
        InProgress,
        Success,
        Failed { detail: String },
        Cancelled,
    }

    impl CommandStatus {
        pub fn is_terminal(&self) -> bool {
            matches!(
                self,
                CommandStatus::Success | CommandStatus::Failed { .. } | CommandStatus::Cancelled
            )
        }
    }

    pub const STATE_RUNNING: &str = "running";
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "scaleway")]
pub mod scaleway;
