use anyhow::Context;
use async_trait::async_trait;
use gshub_common::{LifecycleError, Plan, Service, ServiceConfigurations};
use sqlx::{Pool, Postgres};
use std::path::Path;
use std::sync::Arc;

/// Read-only view over plans, services and the service presets handed to instances.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn get_plan(&self, id: i64) -> Result<Option<Plan>, LifecycleError>;

    async fn list_services(&self) -> Result<Vec<Service>, LifecycleError>;

    async fn service_configurations(&self) -> Result<ServiceConfigurations, LifecycleError>;
}

/// Load the service presets JSON file (map of service name id to configuration).
pub fn load_service_presets(path: impl AsRef<Path>) -> anyhow::Result<ServiceConfigurations> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read service presets from {}", path.display()))?;
    let presets: ServiceConfigurations = serde_json::from_str(&raw)
        .with_context(|| format!("invalid service presets in {}", path.display()))?;
    Ok(presets)
}

pub struct PgCatalog {
    db: Pool<Postgres>,
    presets: Arc<ServiceConfigurations>,
}

impl PgCatalog {
    pub fn new(db: Pool<Postgres>, presets: ServiceConfigurations) -> Self {
        Self {
            db,
            presets: Arc::new(presets),
        }
    }
}

#[async_trait]
impl CatalogReader for PgCatalog {
    async fn get_plan(&self, id: i64) -> Result<Option<Plan>, LifecycleError> {
        let plan = sqlx::query_as::<_, Plan>(
            "SELECT id, name, instance_type, v_cores, memory, price, disk, enabled
             FROM plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(plan)
    }

    async fn list_services(&self) -> Result<Vec<Service>, LifecycleError> {
        let services = sqlx::query_as::<_, Service>(
            "SELECT id, name_id, name, name_long, image, min_mem, rec_mem
             FROM services ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(services)
    }

    async fn service_configurations(&self) -> Result<ServiceConfigurations, LifecycleError> {
        Ok((*self.presets).clone())
    }
}
