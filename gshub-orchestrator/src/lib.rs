//! Instance lifecycle orchestration: provisioning saga, instance callbacks, usage ledger and
//! fleet rollouts, over pluggable storage (Postgres or in-memory) and cloud gateways.

pub mod catalog;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod provider_manager;
pub mod repository;
pub mod rollout;
pub mod state_machine;

pub use catalog::{load_service_presets, CatalogReader, PgCatalog};
pub use ledger::{PgUsageLedger, UsageLedger};
pub use lifecycle::{parse_instance_id, Orchestrator};
pub use memory::InMemoryStore;
pub use provider_manager::ProviderManager;
pub use repository::{InstanceRepository, PgInstanceRepository};
pub use rollout::{FileScriptSource, RolloutCoordinator, RolloutError, RolloutReport, ScriptSource};
