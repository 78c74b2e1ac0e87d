use crate::catalog::CatalogReader;
use crate::ledger::UsageLedger;
use crate::repository::InstanceRepository;
use async_trait::async_trait;
use chrono::Utc;
use gshub_common::{
    Instance, InstanceBurnedCycle, InstanceCycle, InstanceStatus, LifecycleError, NewInstance,
    Plan, Service, ServiceConfigurations, User, UserRole,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    users: Vec<User>,
    plans: BTreeMap<i64, Plan>,
    services: Vec<Service>,
    presets: ServiceConfigurations,
    instances: BTreeMap<i64, Instance>,
    cycles: Vec<InstanceCycle>,
    burned: Vec<InstanceBurnedCycle>,
    next_id: i64,
    fail_next_insert: Option<String>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn owner_id(&self, email: &str) -> Option<i64> {
        self.users.iter().find(|u| u.email == email).map(|u| u.id)
    }
}

/// Process-local backend for every storage trait. Used with `STORAGE=memory` and in tests.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_presets(presets: ServiceConfigurations) -> Self {
        let store = Self::default();
        store.state().presets = presets;
        store
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn seed_user(&self, email: &str, role: UserRole) -> User {
        let mut st = self.state();
        let user = User {
            id: st.next_id(),
            email: email.to_string(),
            role,
            created_at: Utc::now(),
        };
        st.users.push(user.clone());
        user
    }

    pub fn seed_plan(&self, name: &str, instance_type: &str, memory: i32, enabled: bool) -> Plan {
        let mut st = self.state();
        let plan = Plan {
            id: st.next_id(),
            name: name.to_string(),
            instance_type: instance_type.to_string(),
            v_cores: 2,
            memory,
            price: 4.99,
            disk: 20,
            enabled,
        };
        st.plans.insert(plan.id, plan.clone());
        plan
    }

    pub fn seed_service(&self, name_id: &str, image: &str, min_mem: i32, rec_mem: i32) -> Service {
        let mut st = self.state();
        let service = Service {
            id: st.next_id(),
            name_id: name_id.to_string(),
            name: name_id.to_string(),
            name_long: name_id.to_string(),
            image: image.to_string(),
            min_mem,
            rec_mem,
        };
        st.services.push(service.clone());
        service
    }

    /// The next `insert` fails with a persistence error.
    pub fn fail_next_insert(&self, message: &str) {
        self.state().fail_next_insert = Some(message.to_string());
    }

    /// Row lookup that also sees soft-deleted instances.
    pub fn raw_instance(&self, id: i64) -> Option<Instance> {
        self.state().instances.get(&id).cloned()
    }

    pub fn instance_count(&self) -> usize {
        self.state().instances.len()
    }

    pub fn cycles_for(&self, instance_id: i64) -> Vec<InstanceCycle> {
        self.state()
            .cycles
            .iter()
            .filter(|c| c.instance_id == instance_id)
            .cloned()
            .collect()
    }

    pub fn burned_cycles_for(&self, instance_id: i64) -> Vec<InstanceBurnedCycle> {
        self.state()
            .burned
            .iter()
            .filter(|c| c.instance_id == instance_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl InstanceRepository for InMemoryStore {
    async fn find_owner(&self, email: &str) -> Result<Option<User>, LifecycleError> {
        Ok(self.state().users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, new: NewInstance) -> Result<Instance, LifecycleError> {
        let mut st = self.state();
        if let Some(msg) = st.fail_next_insert.take() {
            return Err(LifecycleError::PersistenceFailure(msg));
        }
        if !st.plans.contains_key(&new.plan_id) {
            return Err(LifecycleError::PersistenceFailure(format!(
                "plan {} does not exist",
                new.plan_id
            )));
        }
        if !st.users.iter().any(|u| u.id == new.user_id) {
            return Err(LifecycleError::PersistenceFailure(format!(
                "user {} does not exist",
                new.user_id
            )));
        }

        let now = Utc::now();
        let instance = Instance {
            id: st.next_id(),
            real_id: new.real_id,
            name: new.name,
            ready: false,
            public_ip: String::new(),
            status: InstanceStatus::Provisioning,
            plan_id: new.plan_id,
            user_id: new.user_id,
            service_id: new.service_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        st.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn get(&self, id: i64) -> Result<Option<Instance>, LifecycleError> {
        Ok(self
            .state()
            .instances
            .get(&id)
            .filter(|i| i.deleted_at.is_none())
            .cloned())
    }

    async fn get_owned(&self, owner_email: &str, id: i64) -> Result<Option<Instance>, LifecycleError> {
        let st = self.state();
        let Some(owner_id) = st.owner_id(owner_email) else {
            return Ok(None);
        };
        Ok(st
            .instances
            .get(&id)
            .filter(|i| i.deleted_at.is_none() && i.user_id == owner_id)
            .cloned())
    }

    async fn list_owned(&self, owner_email: &str) -> Result<Vec<Instance>, LifecycleError> {
        let st = self.state();
        let Some(owner_id) = st.owner_id(owner_email) else {
            return Ok(vec![]);
        };
        Ok(st
            .instances
            .values()
            .filter(|i| i.deleted_at.is_none() && i.user_id == owner_id)
            .cloned()
            .collect())
    }

    async fn update_readiness(
        &self,
        id: i64,
        owner_id: i64,
        expected: InstanceStatus,
        next: InstanceStatus,
        ready: bool,
        public_ip: &str,
    ) -> Result<bool, LifecycleError> {
        let mut st = self.state();
        match st.instances.get_mut(&id) {
            Some(i) if i.deleted_at.is_none() && i.user_id == owner_id && i.status == expected => {
                i.status = next;
                i.ready = ready;
                i.public_ip = public_ip.to_string();
                i.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_owned(&self, owner_email: &str, id: i64) -> Result<u64, LifecycleError> {
        let mut st = self.state();
        let Some(owner_id) = st.owner_id(owner_email) else {
            return Ok(0);
        };
        match st.instances.get_mut(&id) {
            Some(i) if i.deleted_at.is_none() && i.user_id == owner_id => {
                let now = Utc::now();
                i.status = InstanceStatus::Terminated;
                i.ready = false;
                i.public_ip.clear();
                i.deleted_at = Some(now);
                i.updated_at = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[async_trait]
impl UsageLedger for InMemoryStore {
    async fn record_cycle(&self, instance_id: i64, amount: u32) -> Result<InstanceCycle, LifecycleError> {
        let mut st = self.state();
        let row = InstanceCycle {
            id: st.next_id(),
            instance_id,
            amount: i64::from(amount),
            created_at: Utc::now(),
        };
        st.cycles.push(row.clone());
        Ok(row)
    }

    async fn record_burned_cycle(
        &self,
        instance_id: i64,
        amount: u32,
    ) -> Result<InstanceBurnedCycle, LifecycleError> {
        let mut st = self.state();
        let row = InstanceBurnedCycle {
            id: st.next_id(),
            instance_id,
            amount: i64::from(amount),
            created_at: Utc::now(),
        };
        st.burned.push(row.clone());
        Ok(row)
    }

    async fn cycles_sum(&self, instance_id: i64) -> Result<i64, LifecycleError> {
        Ok(self
            .state()
            .cycles
            .iter()
            .filter(|c| c.instance_id == instance_id)
            .map(|c| c.amount)
            .sum())
    }

    async fn burned_cycles_sum(&self, instance_id: i64) -> Result<i64, LifecycleError> {
        Ok(self
            .state()
            .burned
            .iter()
            .filter(|c| c.instance_id == instance_id)
            .map(|c| c.amount)
            .sum())
    }
}

#[async_trait]
impl CatalogReader for InMemoryStore {
    async fn get_plan(&self, id: i64) -> Result<Option<Plan>, LifecycleError> {
        Ok(self.state().plans.get(&id).cloned())
    }

    async fn list_services(&self) -> Result<Vec<Service>, LifecycleError> {
        Ok(self.state().services.clone())
    }

    async fn service_configurations(&self) -> Result<ServiceConfigurations, LifecycleError> {
        Ok(self.state().presets.clone())
    }
}
