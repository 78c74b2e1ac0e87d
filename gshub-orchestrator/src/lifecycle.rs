use crate::catalog::CatalogReader;
use crate::ledger::UsageLedger;
use crate::repository::InstanceRepository;
use crate::state_machine::{self, LifecycleEvent};
use gshub_common::{
    Instance, InstanceBurnedCycle, InstanceCycle, InstanceView, LifecycleError, NewInstance,
    StartupHandshake, UsageSummary,
};
use gshub_providers::inventory::ResourceShape;
use gshub_providers::CloudGateway;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Bounded retries for the status compare-and-set used by callbacks.
const READINESS_UPDATE_ATTEMPTS: usize = 3;

/// Instance ids travel as strings on every surface and must fit an unsigned 32-bit integer.
pub fn parse_instance_id(raw: &str) -> Result<i64, LifecycleError> {
    raw.trim()
        .parse::<u32>()
        .map(i64::from)
        .map_err(|_| LifecycleError::invalid("Invalid instance id"))
}

/// Drives an instance through its lifecycle: provisioning, power changes, callbacks and
/// termination, keeping the control-plane record and the provider resource in step.
#[derive(Clone)]
pub struct Orchestrator {
    gateway: Arc<dyn CloudGateway>,
    instances: Arc<dyn InstanceRepository>,
    ledger: Arc<dyn UsageLedger>,
    catalog: Arc<dyn CatalogReader>,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn CloudGateway>,
        instances: Arc<dyn InstanceRepository>,
        ledger: Arc<dyn UsageLedger>,
        catalog: Arc<dyn CatalogReader>,
    ) -> Self {
        Self {
            gateway,
            instances,
            ledger,
            catalog,
        }
    }

    /// Wire all three storage roles to a single backend.
    pub fn with_store<S>(gateway: Arc<dyn CloudGateway>, store: Arc<S>) -> Self
    where
        S: InstanceRepository + UsageLedger + CatalogReader + 'static,
    {
        Self::new(gateway, store.clone(), store.clone(), store)
    }

    /// Create on behalf of an authenticated principal.
    pub async fn create_for_owner(
        &self,
        owner_email: &str,
        plan_id: i64,
    ) -> Result<Instance, LifecycleError> {
        let owner = self
            .instances
            .find_owner(owner_email)
            .await?
            .ok_or_else(|| LifecycleError::invalid("Invalid user"))?;
        self.create(owner.id, plan_id).await
    }

    /// Launch a resource for `plan_id` and record it.
    ///
    /// Launch, persist and the compensating terminate run in a spawned task: once the launch has
    /// been issued, dropping the caller's future cannot strand a resource without either a row or
    /// a terminate attempt.
    pub async fn create(&self, user_id: i64, plan_id: i64) -> Result<Instance, LifecycleError> {
        let plan = self
            .catalog
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| LifecycleError::invalid("Invalid plan"))?;
        if !plan.enabled {
            return Err(LifecycleError::invalid("Plan is not available"));
        }

        let shape = ResourceShape {
            instance_type: plan.instance_type.clone(),
            memory_mb: plan.memory,
            disk_gb: plan.disk,
        };
        if !self.gateway.supports_shape(&shape) {
            return Err(LifecycleError::invalid(format!(
                "Instance type {} is not supported",
                plan.instance_type
            )));
        }

        let new = NewInstance {
            real_id: String::new(),
            name: plan.name.clone(),
            plan_id: plan.id,
            user_id,
            service_id: None,
        };
        let gateway = self.gateway.clone();
        let instances = self.instances.clone();
        tokio::spawn(provision(gateway, instances, shape, new))
            .await
            .map_err(|e| LifecycleError::Inconsistency(format!("provisioning task aborted: {}", e)))?
    }

    pub async fn start(&self, raw_id: &str, owner_email: &str) -> Result<Instance, LifecycleError> {
        let instance = self.owned_for(raw_id, owner_email, LifecycleEvent::PowerChange).await?;
        self.gateway
            .start(&[instance.real_id.clone()])
            .await
            .map_err(|e| {
                tracing::warn!(
                    "start failed for instance {} ({}) by {}: {:#}",
                    instance.id,
                    instance.real_id,
                    owner_email,
                    e
                );
                LifecycleError::provider("Unable to start instance", e)
            })?;
        tracing::info!("instance {} started by {}", instance.id, owner_email);
        Ok(instance)
    }

    pub async fn stop(&self, raw_id: &str, owner_email: &str) -> Result<Instance, LifecycleError> {
        let instance = self.owned_for(raw_id, owner_email, LifecycleEvent::PowerChange).await?;
        self.gateway
            .stop(&[instance.real_id.clone()])
            .await
            .map_err(|e| {
                tracing::warn!(
                    "stop failed for instance {} ({}) by {}: {:#}",
                    instance.id,
                    instance.real_id,
                    owner_email,
                    e
                );
                LifecycleError::provider("Unable to stop instance", e)
            })?;
        tracing::info!("instance {} stopped by {}", instance.id, owner_email);
        Ok(instance)
    }

    /// Destroy the resource, then soft-delete the record.
    /// The gateway is never called for an instance the principal does not own.
    pub async fn terminate(&self, raw_id: &str, owner_email: &str) -> Result<Instance, LifecycleError> {
        let instance = self.owned_for(raw_id, owner_email, LifecycleEvent::Terminate).await?;
        self.gateway
            .terminate(&[instance.real_id.clone()])
            .await
            .map_err(|e| {
                tracing::warn!(
                    "terminate failed for instance {} ({}) by {}: {:#}",
                    instance.id,
                    instance.real_id,
                    owner_email,
                    e
                );
                LifecycleError::provider("Unable to terminate instance", e)
            })?;

        let rows = self.instances.delete_owned(owner_email, instance.id).await?;
        if rows == 0 {
            // The resource is gone at the provider but the row vanished under us.
            let err = LifecycleError::Inconsistency(format!(
                "instance {} ({}) terminated at provider but no row deleted",
                instance.id, instance.real_id
            ));
            tracing::error!("{} (requested by {})", err, owner_email);
            return Err(LifecycleError::not_found("Instance not found"));
        }
        tracing::info!("instance {} terminated by {}", instance.id, owner_email);
        Ok(instance)
    }

    /// Callback from the instance once its workload is reachable at `public_ip`.
    ///
    /// Replays are harmless: the record ends up Ready with the same address, and a burned-cycle
    /// row is appended only when `failed_burned_amount > 0`.
    pub async fn on_instance_startup(
        &self,
        raw_id: &str,
        public_ip: &str,
        failed_burned_amount: u32,
    ) -> Result<StartupHandshake, LifecycleError> {
        let id = parse_instance_id(raw_id)?;
        let ip: IpAddr = public_ip
            .trim()
            .parse()
            .map_err(|_| LifecycleError::invalid("Invalid public ip"))?;

        let instance = self
            .transition(id, LifecycleEvent::Startup, true, &ip.to_string())
            .await?;

        if failed_burned_amount > 0 {
            self.ledger
                .record_burned_cycle(id, failed_burned_amount)
                .await?;
        }

        let plan = self
            .catalog
            .get_plan(instance.plan_id)
            .await?
            .ok_or_else(|| {
                LifecycleError::Inconsistency(format!(
                    "instance {} references missing plan {}",
                    id, instance.plan_id
                ))
            })?;
        let cycles = self.ledger.cycles_sum(id).await?;
        let services = self.catalog.list_services().await?;
        let service_configs = self.catalog.service_configurations().await?;

        tracing::info!("instance {} ready at {}", id, ip);
        Ok(StartupHandshake {
            instance_memory: plan.memory,
            owner_id: instance.user_id,
            cycles,
            services,
            service_configs,
        })
    }

    /// Callback from the instance when its workload goes down. Always appends exactly one
    /// burned-cycle row, even for an amount of 0.
    pub async fn on_instance_shutdown(
        &self,
        raw_id: &str,
        burned_amount: u32,
    ) -> Result<InstanceBurnedCycle, LifecycleError> {
        let id = parse_instance_id(raw_id)?;
        let instance = self.transition(id, LifecycleEvent::Shutdown, false, "").await?;
        let burned = self.ledger.record_burned_cycle(id, burned_amount).await?;
        tracing::info!(
            "instance {} shut down ({}), burned {} cycle(s)",
            id,
            instance.status.as_str(),
            burned_amount
        );
        Ok(burned)
    }

    /// Callback by which an instance reports successfully served cycles.
    pub async fn report_cycles(&self, raw_id: &str, amount: u32) -> Result<InstanceCycle, LifecycleError> {
        let id = parse_instance_id(raw_id)?;
        if self.instances.get(id).await?.is_none() {
            return Err(LifecycleError::not_found("Instance not found"));
        }
        self.ledger.record_cycle(id, amount).await
    }

    /// Owned instances merged with the provider's live view of each resource.
    /// A describe failure degrades every entry to an unknown provider state.
    pub async fn list_for_owner(&self, owner_email: &str) -> Result<Vec<InstanceView>, LifecycleError> {
        let instances = self.instances.list_owned(owner_email).await?;
        if instances.is_empty() {
            return Ok(Vec::new());
        }

        let real_ids: Vec<String> = instances.iter().map(|i| i.real_id.clone()).collect();
        let mut live: HashMap<String, (String, String)> = match self.gateway.describe(&real_ids).await {
            Ok(descriptions) => descriptions
                .into_iter()
                .map(|d| (d.external_id, (d.state, d.public_ip)))
                .collect(),
            Err(e) => {
                tracing::warn!(
                    "describe failed while listing {} instance(s) for {}: {:#}",
                    real_ids.len(),
                    owner_email,
                    e
                );
                HashMap::new()
            }
        };

        Ok(instances
            .into_iter()
            .map(|instance| match live.remove(&instance.real_id) {
                Some((provider_state, provider_public_ip)) => InstanceView {
                    instance,
                    provider_state,
                    provider_public_ip,
                },
                None => InstanceView::unknown(instance),
            })
            .collect())
    }

    pub async fn usage_summary(&self, raw_id: &str, owner_email: &str) -> Result<UsageSummary, LifecycleError> {
        let id = parse_instance_id(raw_id)?;
        if self.instances.get_owned(owner_email, id).await?.is_none() {
            return Err(LifecycleError::not_found("Instance not found"));
        }
        Ok(UsageSummary {
            instance_id: id,
            cycles: self.ledger.cycles_sum(id).await?,
            burned_cycles: self.ledger.burned_cycles_sum(id).await?,
        })
    }

    async fn owned_for(
        &self,
        raw_id: &str,
        owner_email: &str,
        event: LifecycleEvent,
    ) -> Result<Instance, LifecycleError> {
        let id = parse_instance_id(raw_id)?;
        let instance = self
            .instances
            .get_owned(owner_email, id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("Instance not found"))?;
        if state_machine::next_status(instance.status, event).is_none() {
            return Err(LifecycleError::invalid(format!(
                "Instance is {}",
                instance.status.as_str()
            )));
        }
        Ok(instance)
    }

    /// Apply a callback event with a compare-and-set on the current status, scoped by owner id.
    async fn transition(
        &self,
        id: i64,
        event: LifecycleEvent,
        ready: bool,
        public_ip: &str,
    ) -> Result<Instance, LifecycleError> {
        for attempt in 1..=READINESS_UPDATE_ATTEMPTS {
            let current = self
                .instances
                .get(id)
                .await?
                .ok_or_else(|| LifecycleError::not_found("Instance not found"))?;
            let next = state_machine::next_status(current.status, event).ok_or_else(|| {
                LifecycleError::invalid(format!("Instance is {}", current.status.as_str()))
            })?;

            let applied = self
                .instances
                .update_readiness(id, current.user_id, current.status, next, ready, public_ip)
                .await?;
            if applied {
                return Ok(Instance {
                    status: next,
                    ready,
                    public_ip: public_ip.to_string(),
                    ..current
                });
            }
            tracing::debug!(
                "instance {} changed during {:?} (attempt {}/{})",
                id,
                event,
                attempt,
                READINESS_UPDATE_ATTEMPTS
            );
        }

        let err = LifecycleError::Inconsistency(format!(
            "instance {} kept changing during {:?}",
            id, event
        ));
        tracing::error!("{}", err);
        Err(err)
    }
}

async fn provision(
    gateway: Arc<dyn CloudGateway>,
    instances: Arc<dyn InstanceRepository>,
    shape: ResourceShape,
    mut new: NewInstance,
) -> Result<Instance, LifecycleError> {
    let launched = gateway.launch(&shape).await.map_err(|e| {
        tracing::warn!(
            "launch failed for user {} type {}: {:#}",
            new.user_id,
            shape.instance_type,
            e
        );
        LifecycleError::provider("Unable to create instance", e)
    })?;
    tracing::info!(
        "launched {} ({}) for user {}",
        launched.external_id,
        shape.instance_type,
        new.user_id
    );

    let external_id = launched.external_id;
    new.real_id = external_id.clone();
    match instances.insert(new).await {
        Ok(instance) => Ok(instance),
        Err(err) => {
            tracing::warn!(
                "persisting {} failed, terminating it: {}",
                external_id,
                err
            );
            if let Err(comp) = gateway.terminate(&[external_id.clone()]).await {
                tracing::error!(
                    "orphaned resource {}: compensating terminate failed: {:#}",
                    external_id,
                    comp
                );
            }
            Err(match err {
                e @ LifecycleError::PersistenceFailure(_) => e,
                other => LifecycleError::PersistenceFailure(other.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use gshub_common::{InstanceStatus, Plan, ServiceConfigurations, User, UserRole};
    use gshub_providers::mock::{GatewayCall, GatewayOp, MockGateway};

    const ALICE: &str = "alice@example.com";
    const BOB: &str = "bob@example.com";

    struct Fixture {
        gw: Arc<MockGateway>,
        store: Arc<InMemoryStore>,
        orch: Orchestrator,
        alice: User,
        plan: Plan,
    }

    fn fixture() -> Fixture {
        let presets: ServiceConfigurations = serde_json::from_value(serde_json::json!({
            "minecraft": {
                "name": "Minecraft",
                "nameLong": "Minecraft: Java Edition",
                "image": "itzg/minecraft-server",
                "minMem": 1024,
                "recMem": 2048
            }
        }))
        .unwrap();
        let store = Arc::new(InMemoryStore::with_presets(presets));
        let alice = store.seed_user(ALICE, UserRole::User);
        store.seed_user(BOB, UserRole::User);
        let plan = store.seed_plan("starter", "DEV1-S", 4096, true);
        store.seed_service("minecraft", "itzg/minecraft-server", 1024, 2048);

        let gw = Arc::new(MockGateway::new());
        let orch = Orchestrator::with_store(gw.clone(), store.clone());
        Fixture {
            gw,
            store,
            orch,
            alice,
            plan,
        }
    }

    #[tokio::test]
    async fn create_persists_provisioning_row_with_external_id() {
        let f = fixture();
        let inst = f.orch.create(f.alice.id, f.plan.id).await.unwrap();

        assert!(!inst.real_id.is_empty());
        assert!(!inst.ready);
        assert_eq!(inst.public_ip, "");
        assert_eq!(inst.status, InstanceStatus::Provisioning);
        assert_eq!(inst.user_id, f.alice.id);
        assert_eq!(f.gw.resource_state(&inst.real_id).as_deref(), Some("running"));
        assert_eq!(f.store.instance_count(), 1);
    }

    #[tokio::test]
    async fn launch_failure_leaves_no_row() {
        let f = fixture();
        f.gw.fail(GatewayOp::Launch, "out of capacity");

        let err = f.orch.create(f.alice.id, f.plan.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ProviderFailure { .. }));
        assert_eq!(err.public_message(), "Unable to create instance");
        assert_eq!(f.store.instance_count(), 0);
        assert_eq!(f.gw.count(GatewayOp::Terminate), 0);
    }

    #[tokio::test]
    async fn persist_failure_terminates_the_launched_resource_once() {
        let f = fixture();
        f.store.fail_next_insert("disk full");

        let err = f.orch.create(f.alice.id, f.plan.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::PersistenceFailure(_)));
        assert_eq!(f.store.instance_count(), 0);

        let calls = f.gw.calls();
        let terminates: Vec<_> = calls
            .iter()
            .filter(|c| c.op() == GatewayOp::Terminate)
            .collect();
        assert_eq!(terminates.len(), 1);
        assert_eq!(terminates[0], &GatewayCall::Terminate(vec!["mock-1".to_string()]));
        assert_eq!(f.gw.resource_state("mock-1").as_deref(), Some("terminated"));
    }

    #[tokio::test]
    async fn compensation_failure_still_reports_persistence_error() {
        let f = fixture();
        f.store.fail_next_insert("disk full");
        f.gw.fail(GatewayOp::Terminate, "api down");

        let err = f.orch.create(f.alice.id, f.plan.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::PersistenceFailure(_)));
        assert_eq!(f.gw.count(GatewayOp::Terminate), 1);
    }

    #[tokio::test]
    async fn invalid_plans_never_reach_the_gateway() {
        let f = fixture();
        let disabled = f.store.seed_plan("legacy", "DEV1-S", 2048, false);
        let exotic = f.store.seed_plan("gpu", "GPU-3070", 16384, true);
        f.gw.reject_instance_type("GPU-3070");

        for plan_id in [9_999, disabled.id, exotic.id] {
            let err = f.orch.create(f.alice.id, plan_id).await.unwrap_err();
            assert!(matches!(err, LifecycleError::InvalidInput(_)), "plan {}", plan_id);
        }
        let err = f.orch.create(f.alice.id, 9_999).await.unwrap_err();
        assert_eq!(err.public_message(), "Invalid plan");
        assert_eq!(f.gw.count(GatewayOp::Launch), 0);
    }

    #[tokio::test]
    async fn create_for_unknown_owner_is_invalid() {
        let f = fixture();
        let err = f
            .orch
            .create_for_owner("nobody@example.com", f.plan.id)
            .await
            .unwrap_err();
        assert_eq!(err.public_message(), "Invalid user");
        assert!(f.gw.calls().is_empty());
    }

    #[tokio::test]
    async fn cross_tenant_terminate_is_not_found_without_gateway_call() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();

        let err = f.orch.terminate(&inst.id.to_string(), BOB).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
        assert_eq!(f.gw.count(GatewayOp::Terminate), 0);
        assert!(f.store.raw_instance(inst.id).unwrap().deleted_at.is_none());
    }

    #[tokio::test]
    async fn terminate_soft_deletes_and_hides_the_row() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        let id = inst.id.to_string();

        f.orch.terminate(&id, ALICE).await.unwrap();
        let row = f.store.raw_instance(inst.id).unwrap();
        assert_eq!(row.status, InstanceStatus::Terminated);
        assert!(row.deleted_at.is_some());
        assert_eq!(f.gw.resource_state(&inst.real_id).as_deref(), Some("terminated"));

        let again = f.orch.terminate(&id, ALICE).await.unwrap_err();
        assert!(matches!(again, LifecycleError::NotFound(_)));
        assert_eq!(f.gw.count(GatewayOp::Terminate), 1);
        assert!(f.orch.list_for_owner(ALICE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminate_provider_failure_keeps_the_row() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        f.gw.fail(GatewayOp::Terminate, "locked");

        let err = f.orch.terminate(&inst.id.to_string(), ALICE).await.unwrap_err();
        assert_eq!(err.public_message(), "Unable to terminate instance");
        assert!(f.store.raw_instance(inst.id).unwrap().deleted_at.is_none());
    }

    #[tokio::test]
    async fn malformed_ids_are_rejected_before_any_io() {
        let f = fixture();
        for raw in ["abc", "-1", "4294967296", ""] {
            let err = f.orch.start(raw, ALICE).await.unwrap_err();
            assert!(matches!(err, LifecycleError::InvalidInput(_)), "{:?}", raw);
        }
        assert!(matches!(
            f.orch.on_instance_shutdown("x", 1).await.unwrap_err(),
            LifecycleError::InvalidInput(_)
        ));
        assert!(f.gw.calls().is_empty());
    }

    #[tokio::test]
    async fn power_changes_do_not_touch_readiness() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        let id = inst.id.to_string();
        f.orch.on_instance_startup(&id, "51.15.1.2", 0).await.unwrap();

        f.orch.stop(&id, ALICE).await.unwrap();
        f.orch.start(&id, ALICE).await.unwrap();
        let row = f.store.raw_instance(inst.id).unwrap();
        assert!(row.ready);
        assert_eq!(row.public_ip, "51.15.1.2");
        assert_eq!(row.status, InstanceStatus::Ready);
    }

    #[tokio::test]
    async fn start_failure_is_a_provider_failure() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        f.gw.fail(GatewayOp::Start, "status=409 body=conflict");

        let err = f.orch.start(&inst.id.to_string(), ALICE).await.unwrap_err();
        assert_eq!(err.public_message(), "Unable to start instance");
        assert!(!err.public_message().contains("conflict"));
    }

    #[tokio::test]
    async fn startup_is_idempotent() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        let id = inst.id.to_string();

        let first = f.orch.on_instance_startup(&id, "51.15.1.2", 0).await.unwrap();
        let second = f.orch.on_instance_startup(&id, "51.15.1.2", 0).await.unwrap();
        assert_eq!(first.owner_id, second.owner_id);
        assert_eq!(first.cycles, second.cycles);

        let row = f.store.raw_instance(inst.id).unwrap();
        assert!(row.ready);
        assert_eq!(row.public_ip, "51.15.1.2");
        assert_eq!(row.status, InstanceStatus::Ready);
        assert!(f.store.burned_cycles_for(inst.id).is_empty());
    }

    #[tokio::test]
    async fn startup_records_failed_cycles_when_reported() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        f.orch
            .on_instance_startup(&inst.id.to_string(), "51.15.1.2", 3)
            .await
            .unwrap();

        let burned = f.store.burned_cycles_for(inst.id);
        assert_eq!(burned.len(), 1);
        assert_eq!(burned[0].amount, 3);
    }

    #[tokio::test]
    async fn startup_requires_a_real_address() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        for ip in ["", "not-an-ip", "300.1.1.1"] {
            let err = f
                .orch
                .on_instance_startup(&inst.id.to_string(), ip, 0)
                .await
                .unwrap_err();
            assert!(matches!(err, LifecycleError::InvalidInput(_)), "{:?}", ip);
        }
        assert!(!f.store.raw_instance(inst.id).unwrap().ready);
    }

    #[tokio::test]
    async fn callbacks_for_unknown_instances_are_not_found() {
        let f = fixture();
        assert!(matches!(
            f.orch.on_instance_startup("4242", "10.0.0.1", 0).await.unwrap_err(),
            LifecycleError::NotFound(_)
        ));
        assert!(matches!(
            f.orch.on_instance_shutdown("4242", 0).await.unwrap_err(),
            LifecycleError::NotFound(_)
        ));
        assert!(matches!(
            f.orch.report_cycles("4242", 1).await.unwrap_err(),
            LifecycleError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn shutdown_always_appends_one_burned_row() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        let id = inst.id.to_string();

        let zero = f.orch.on_instance_shutdown(&id, 0).await.unwrap();
        assert_eq!(zero.amount, 0);
        f.orch.on_instance_shutdown(&id, 0).await.unwrap();
        assert_eq!(f.store.burned_cycles_for(inst.id).len(), 2);

        // Never reported ready, so the run counts as failed.
        let row = f.store.raw_instance(inst.id).unwrap();
        assert_eq!(row.status, InstanceStatus::Failed);
        assert!(!row.ready);
    }

    #[tokio::test]
    async fn create_startup_shutdown_scenario() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        let id = inst.id.to_string();

        f.orch.report_cycles(&id, 7).await.unwrap();
        let handshake = f.orch.on_instance_startup(&id, "51.15.1.2", 2).await.unwrap();
        assert_eq!(handshake.instance_memory, 4096);
        assert_eq!(handshake.owner_id, f.alice.id);
        assert_eq!(handshake.cycles, 7);
        assert_eq!(handshake.services.len(), 1);
        assert!(handshake.service_configs.contains_key("minecraft"));

        let burned = f.orch.on_instance_shutdown(&id, 5).await.unwrap();
        assert_eq!(burned.amount, 5);

        let row = f.store.raw_instance(inst.id).unwrap();
        assert_eq!(row.status, InstanceStatus::Stopped);
        assert!(!row.ready);
        assert_eq!(row.public_ip, "");

        let usage = f.orch.usage_summary(&id, ALICE).await.unwrap();
        assert_eq!(usage.cycles, 7);
        assert_eq!(usage.burned_cycles, 7);
    }

    #[tokio::test]
    async fn usage_summary_is_zero_for_fresh_instances_and_owner_scoped() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        let id = inst.id.to_string();

        let usage = f.orch.usage_summary(&id, ALICE).await.unwrap();
        assert_eq!(
            usage,
            UsageSummary {
                instance_id: inst.id,
                cycles: 0,
                burned_cycles: 0
            }
        );
        assert!(matches!(
            f.orch.usage_summary(&id, BOB).await.unwrap_err(),
            LifecycleError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_for_owner_only_returns_own_instances() {
        let f = fixture();
        f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        f.orch.create_for_owner(BOB, f.plan.id).await.unwrap();

        assert_eq!(f.orch.list_for_owner(ALICE).await.unwrap().len(), 2);
        assert_eq!(f.orch.list_for_owner(BOB).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_for_owner_merges_live_provider_state() {
        let f = fixture();
        let running = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        let stopped = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        f.orch.stop(&stopped.id.to_string(), ALICE).await.unwrap();

        let views = f.orch.list_for_owner(ALICE).await.unwrap();
        let by_id = |id: i64| views.iter().find(|v| v.instance.id == id).unwrap();

        let r = by_id(running.id);
        assert_eq!(r.provider_state, "running");
        assert!(!r.provider_public_ip.is_empty());
        // The stored record is untouched: readiness only comes from callbacks.
        assert!(!r.instance.ready);
        assert_eq!(r.instance.public_ip, "");

        let s = by_id(stopped.id);
        assert_eq!(s.provider_state, "stopped");
        assert_eq!(s.provider_public_ip, "");

        let describes: Vec<_> = f
            .gw
            .calls()
            .into_iter()
            .filter(|c| c.op() == GatewayOp::Describe)
            .collect();
        assert_eq!(describes.len(), 1);
        assert!(matches!(&describes[0], GatewayCall::Describe(ids) if ids.len() == 2));
    }

    #[tokio::test]
    async fn list_for_owner_degrades_to_unknown_when_describe_fails() {
        let f = fixture();
        let inst = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();
        f.gw.fail(GatewayOp::Describe, "api down");

        let views = f.orch.list_for_owner(ALICE).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].instance.id, inst.id);
        assert_eq!(views[0].provider_state, gshub_common::PROVIDER_STATE_UNKNOWN);
        assert_eq!(views[0].provider_public_ip, "");
    }

    #[tokio::test]
    async fn list_for_owner_marks_vanished_resources_unknown() {
        let f = fixture();
        // A record whose resource the provider no longer knows about.
        f.store
            .insert(NewInstance {
                real_id: "gone-1".to_string(),
                name: "starter".to_string(),
                plan_id: f.plan.id,
                user_id: f.alice.id,
                service_id: None,
            })
            .await
            .unwrap();
        let live = f.orch.create_for_owner(ALICE, f.plan.id).await.unwrap();

        let views = f.orch.list_for_owner(ALICE).await.unwrap();
        assert_eq!(views.len(), 2);
        for v in &views {
            let expected = if v.instance.id == live.id { "running" } else { "unknown" };
            assert_eq!(v.provider_state, expected);
        }
    }

    #[tokio::test]
    async fn empty_listing_skips_the_gateway() {
        let f = fixture();
        assert!(f.orch.list_for_owner(ALICE).await.unwrap().is_empty());
        assert_eq!(f.gw.count(GatewayOp::Describe), 0);
    }

    /// Delegates to the mock but holds every launch long enough for a caller to give up.
    struct SlowLaunch(Arc<MockGateway>);

    #[async_trait::async_trait]
    impl CloudGateway for SlowLaunch {
        async fn launch(&self, shape: &ResourceShape) -> anyhow::Result<gshub_providers::inventory::LaunchedResource> {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            self.0.launch(shape).await
        }
        async fn describe(&self, ids: &[String]) -> anyhow::Result<Vec<gshub_providers::inventory::ResourceDescription>> {
            self.0.describe(ids).await
        }
        async fn start(&self, ids: &[String]) -> anyhow::Result<()> {
            self.0.start(ids).await
        }
        async fn stop(&self, ids: &[String]) -> anyhow::Result<()> {
            self.0.stop(ids).await
        }
        async fn terminate(&self, ids: &[String]) -> anyhow::Result<()> {
            self.0.terminate(ids).await
        }
        async fn list_running(&self) -> anyhow::Result<Vec<String>> {
            self.0.list_running().await
        }
        async fn run_remote_command(&self, ids: &[String], script: &str) -> anyhow::Result<String> {
            self.0.run_remote_command(ids, script).await
        }
        async fn command_status(
            &self,
            command_id: &str,
            external_id: &str,
        ) -> anyhow::Result<gshub_providers::inventory::CommandStatus> {
            self.0.command_status(command_id, external_id).await
        }
    }

    #[tokio::test]
    async fn compensation_survives_a_cancelled_caller() {
        let f = fixture();
        let orch = Orchestrator::with_store(Arc::new(SlowLaunch(f.gw.clone())), f.store.clone());
        f.store.fail_next_insert("disk full");

        let dropped = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            orch.create(f.alice.id, f.plan.id),
        )
        .await;
        assert!(dropped.is_err(), "create should still be launching");
        assert_eq!(f.gw.count(GatewayOp::Launch), 0);

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(f.gw.count(GatewayOp::Launch), 1);
        assert_eq!(f.gw.count(GatewayOp::Terminate), 1);
        assert_eq!(f.gw.resource_state("mock-1").as_deref(), Some("terminated"));
        assert_eq!(f.store.instance_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_caller_still_gets_its_row_persisted() {
        let f = fixture();
        let orch = Orchestrator::with_store(Arc::new(SlowLaunch(f.gw.clone())), f.store.clone());

        let dropped = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            orch.create(f.alice.id, f.plan.id),
        )
        .await;
        assert!(dropped.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(f.store.instance_count(), 1);
        assert_eq!(f.gw.count(GatewayOp::Terminate), 0);
    }
}
