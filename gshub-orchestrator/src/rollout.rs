use async_trait::async_trait;
use gshub_providers::inventory::CommandStatus;
use gshub_providers::CloudGateway;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TARGET_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("failed to list running instances: {0}")]
    ListRunning(String),

    #[error("failed to load update script: {0}")]
    Script(String),

    #[error("failed to dispatch update command: {0}")]
    Dispatch(String),

    #[error("update failed on {target}: {detail}")]
    TargetFailed { target: String, detail: String },

    #[error("update on {target} did not finish within {timeout:?}")]
    TargetTimedOut { target: String, timeout: Duration },
}

/// Where the fleet update script comes from.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<String>;
}

pub struct FileScriptSource {
    path: PathBuf,
}

impl FileScriptSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ScriptSource for FileScriptSource {
    async fn load(&self) -> anyhow::Result<String> {
        let script = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            anyhow::anyhow!("cannot read {}: {}", self.path.display(), e)
        })?;
        Ok(script)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RolloutReport {
    pub command_id: Option<String>,
    pub targets: Vec<String>,
    pub completed: Vec<String>,
}

/// Pushes the update script to every running resource and waits for each one in turn.
pub struct RolloutCoordinator {
    gateway: Arc<dyn CloudGateway>,
    script: Arc<dyn ScriptSource>,
    poll_interval: Duration,
    target_timeout: Duration,
}

impl RolloutCoordinator {
    pub fn new(gateway: Arc<dyn CloudGateway>, script: Arc<dyn ScriptSource>) -> Self {
        Self {
            gateway,
            script,
            poll_interval: DEFAULT_POLL_INTERVAL,
            target_timeout: DEFAULT_TARGET_TIMEOUT,
        }
    }

    pub fn with_timing(mut self, poll_interval: Duration, target_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.target_timeout = target_timeout;
        self
    }

    /// Stops at the first target that fails, is cancelled or times out; targets after it are
    /// still running the dispatched command but are not waited for.
    pub async fn rollout_update(&self) -> Result<RolloutReport, RolloutError> {
        let targets = self
            .gateway
            .list_running()
            .await
            .map_err(|e| RolloutError::ListRunning(format!("{:#}", e)))?;
        if targets.is_empty() {
            tracing::info!("rollout: no running instances, nothing to update");
            return Ok(RolloutReport {
                command_id: None,
                targets,
                completed: vec![],
            });
        }

        let script = self
            .script
            .load()
            .await
            .map_err(|e| RolloutError::Script(format!("{:#}", e)))?;
        let command_id = self
            .gateway
            .run_remote_command(&targets, &script)
            .await
            .map_err(|e| RolloutError::Dispatch(format!("{:#}", e)))?;
        tracing::info!(
            "rollout: command {} dispatched to {} instance(s)",
            command_id,
            targets.len()
        );

        let mut completed = Vec::with_capacity(targets.len());
        for target in &targets {
            self.wait_for(&command_id, target).await?;
            tracing::info!("rollout: {} updated", target);
            completed.push(target.clone());
        }

        Ok(RolloutReport {
            command_id: Some(command_id),
            targets,
            completed,
        })
    }

    async fn wait_for(&self, command_id: &str, target: &str) -> Result<(), RolloutError> {
        let deadline = Instant::now() + self.target_timeout;
        loop {
            let status = self
                .gateway
                .command_status(command_id, target)
                .await
                .map_err(|e| RolloutError::TargetFailed {
                    target: target.to_string(),
                    detail: format!("{:#}", e),
                })?;
            match status {
                CommandStatus::Success => return Ok(()),
                CommandStatus::Failed { detail } => {
                    tracing::error!("rollout: {} failed: {}", target, detail);
                    return Err(RolloutError::TargetFailed {
                        target: target.to_string(),
                        detail,
                    });
                }
                CommandStatus::Cancelled => {
                    tracing::error!("rollout: {} cancelled", target);
                    return Err(RolloutError::TargetFailed {
                        target: target.to_string(),
                        detail: "command cancelled".to_string(),
                    });
                }
                CommandStatus::Pending | CommandStatus::InProgress => {}
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::error!("rollout: {} timed out", target);
                return Err(RolloutError::TargetTimedOut {
                    target: target.to_string(),
                    timeout: self.target_timeout,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
