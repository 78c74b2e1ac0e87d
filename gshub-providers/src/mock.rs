use crate::inventory::{
    CommandStatus, LaunchedResource, ResourceDescription, ResourceShape, STATE_RUNNING,
};
use crate::CloudGateway;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Gateway operations, used to inject failures and count calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    Launch,
    Describe,
    Start,
    Stop,
    Terminate,
    ListRunning,
    RunRemoteCommand,
    CommandStatus,
}

/// One recorded call, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayCall {
    Launch(ResourceShape),
    Describe(Vec<String>),
    Start(Vec<String>),
    Stop(Vec<String>),
    Terminate(Vec<String>),
    ListRunning,
    RunRemoteCommand { targets: Vec<String>, script: String },
    CommandStatus { command_id: String, external_id: String },
}

impl GatewayCall {
    pub fn op(&self) -> GatewayOp {
        match self {
            GatewayCall::Launch(_) => GatewayOp::Launch,
            GatewayCall::Describe(_) => GatewayOp::Describe,
            GatewayCall::Start(_) => GatewayOp::Start,
            GatewayCall::Stop(_) => GatewayOp::Stop,
            GatewayCall::Terminate(_) => GatewayOp::Terminate,
            GatewayCall::ListRunning => GatewayOp::ListRunning,
            GatewayCall::RunRemoteCommand { .. } => GatewayOp::RunRemoteCommand,
            GatewayCall::CommandStatus { .. } => GatewayOp::CommandStatus,
        }
    }
}

struct MockResource {
    state: String,
    public_ip: String,
}

#[derive(Default)]
struct MockState {
    resources: BTreeMap<String, MockResource>,
    seq: u64,
    calls: Vec<GatewayCall>,
    failures: HashMap<GatewayOp, String>,
    command_outcomes: HashMap<String, CommandStatus>,
    commands: HashMap<String, Vec<String>>,
    rejected_types: HashSet<String>,
}

impl MockState {
    fn next_ip(&mut self) -> String {
        self.seq += 1;
        let last_octet = (self.seq % 250) + 1;
        let third_octet = ((self.seq / 250) % 250) + 1;
        format!("10.10.{}.{}", third_octet, last_octet)
    }

    fn check(&self, op: GatewayOp) -> Result<()> {
        match self.failures.get(&op) {
            Some(msg) => Err(anyhow::anyhow!("{}", msg)),
            None => Ok(()),
        }
    }

    fn resource_mut(&mut self, external_id: &str) -> Result<&mut MockResource> {
        match self.resources.get_mut(external_id) {
            Some(r) if r.state != "terminated" => Ok(r),
            _ => Err(anyhow::anyhow!(
                "MockGateway: resource '{}' not found",
                external_id
            )),
        }
    }
}

/// Deterministic in-memory gateway.
///
/// Resources are launched directly into "running" with an allocated private IP. Remote commands
/// complete with `Success` unless an outcome was scripted with `set_command_outcome`.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every subsequent call to `op` fails with `message` until `clear_failure`.
    pub fn fail(&self, op: GatewayOp, message: &str) {
        self.state().failures.insert(op, message.to_string());
    }

    pub fn clear_failure(&self, op: GatewayOp) {
        self.state().failures.remove(&op);
    }

    pub fn reject_instance_type(&self, instance_type: &str) {
        self.state().rejected_types.insert(instance_type.to_string());
    }

    pub fn set_command_outcome(&self, external_id: &str, status: CommandStatus) {
        self.state()
            .command_outcomes
            .insert(external_id.to_string(), status);
    }

    /// Register an already-running resource (e.g. launched before the test).
    pub fn seed_running(&self, external_id: &str) -> String {
        let mut st = self.state();
        let ip = st.next_ip();
        st.resources.insert(
            external_id.to_string(),
            MockResource {
                state: STATE_RUNNING.to_string(),
                public_ip: ip.clone(),
            },
        );
        ip
    }

    pub fn resource_state(&self, external_id: &str) -> Option<String> {
        self.state()
            .resources
            .get(external_id)
            .map(|r| r.state.clone())
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, op: GatewayOp) -> usize {
        self.state().calls.iter().filter(|c| c.op() == op).count()
    }
}

#[async_trait]
impl CloudGateway for MockGateway {
    async fn launch(&self, shape: &ResourceShape) -> Result<LaunchedResource> {
        let mut st = self.state();
        st.calls.push(GatewayCall::Launch(shape.clone()));
        st.check(GatewayOp::Launch)?;

        let ip = st.next_ip();
        let external_id = format!("mock-{}", st.seq);
        st.resources.insert(
            external_id.clone(),
            MockResource {
                state: STATE_RUNNING.to_string(),
                public_ip: ip,
            },
        );
        Ok(LaunchedResource {
            external_id,
            state: STATE_RUNNING.to_string(),
        })
    }

    async fn describe(&self, external_ids: &[String]) -> Result<Vec<ResourceDescription>> {
        let mut st = self.state();
        st.calls.push(GatewayCall::Describe(external_ids.to_vec()));
        st.check(GatewayOp::Describe)?;

        Ok(external_ids
            .iter()
            .filter_map(|id| {
                st.resources.get(id).map(|r| ResourceDescription {
                    external_id: id.clone(),
                    state: r.state.clone(),
                    public_ip: if r.state == STATE_RUNNING {
                        r.public_ip.clone()
                    } else {
                        String::new()
                    },
                })
            })
            .collect())
    }

    async fn start(&self, external_ids: &[String]) -> Result<()> {
        let mut st = self.state();
        st.calls.push(GatewayCall::Start(external_ids.to_vec()));
        st.check(GatewayOp::Start)?;

        for id in external_ids {
            let needs_ip = st.resource_mut(id)?.public_ip.is_empty();
            let ip = if needs_ip { Some(st.next_ip()) } else { None };
            let res = st.resource_mut(id)?;
            res.state = STATE_RUNNING.to_string();
            if let Some(ip) = ip {
                res.public_ip = ip;
            }
        }
        Ok(())
    }

    async fn stop(&self, external_ids: &[String]) -> Result<()> {
        let mut st = self.state();
        st.calls.push(GatewayCall::Stop(external_ids.to_vec()));
        st.check(GatewayOp::Stop)?;

        for id in external_ids {
            let res = st.resource_mut(id)?;
            res.state = "stopped".to_string();
            res.public_ip.clear();
        }
        Ok(())
    }

    async fn terminate(&self, external_ids: &[String]) -> Result<()> {
        let mut st = self.state();
        st.calls.push(GatewayCall::Terminate(external_ids.to_vec()));
        st.check(GatewayOp::Terminate)?;

        for id in external_ids {
            let res = st.resource_mut(id)?;
            res.state = "terminated".to_string();
            res.public_ip.clear();
        }
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<String>> {
        let mut st = self.state();
        st.calls.push(GatewayCall::ListRunning);
        st.check(GatewayOp::ListRunning)?;

        Ok(st
            .resources
            .iter()
            .filter(|(_, r)| r.state == STATE_RUNNING)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn run_remote_command(&self, external_ids: &[String], script: &str) -> Result<String> {
        let mut st = self.state();
        st.calls.push(GatewayCall::RunRemoteCommand {
            targets: external_ids.to_vec(),
            script: script.to_string(),
        });
        st.check(GatewayOp::RunRemoteCommand)?;

        st.seq += 1;
        let command_id = format!("cmd-{}", st.seq);
        st.commands.insert(command_id.clone(), external_ids.to_vec());
        Ok(command_id)
    }

    async fn command_status(&self, command_id: &str, external_id: &str) -> Result<CommandStatus> {
        let mut st = self.state();
        st.calls.push(GatewayCall::CommandStatus {
            command_id: command_id.to_string(),
            external_id: external_id.to_string(),
        });
        st.check(GatewayOp::CommandStatus)?;

        let targets = st
            .commands
            .get(command_id)
            .ok_or_else(|| anyhow::anyhow!("MockGateway: unknown command '{}'", command_id))?;
        if !targets.iter().any(|t| t == external_id) {
            return Err(anyhow::anyhow!(
                "MockGateway: command '{}' was not sent to '{}'",
                command_id,
                external_id
            ));
        }
        Ok(st
            .command_outcomes
            .get(external_id)
            .cloned()
            .unwrap_or(CommandStatus::Success))
    }

    fn supports_shape(&self, shape: &ResourceShape) -> bool {
        !shape.instance_type.trim().is_empty()
            && !self.state().rejected_types.contains(&shape.instance_type)
    }
}
