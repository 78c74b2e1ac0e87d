use async_trait::async_trait;
use gshub_common::{InstanceBurnedCycle, InstanceCycle, LifecycleError};
use sqlx::{Pool, Postgres};

/// Append-only usage ledger.
///
/// Normal cycles are usage served successfully; burned cycles are usage consumed by runs that
/// failed or were cut short. Rows are never updated or deleted.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn record_cycle(&self, instance_id: i64, amount: u32) -> Result<InstanceCycle, LifecycleError>;

    async fn record_burned_cycle(
        &self,
        instance_id: i64,
        amount: u32,
    ) -> Result<InstanceBurnedCycle, LifecycleError>;

    /// Sum of normal cycles, `0` when none were recorded.
    async fn cycles_sum(&self, instance_id: i64) -> Result<i64, LifecycleError>;

    async fn burned_cycles_sum(&self, instance_id: i64) -> Result<i64, LifecycleError>;
}

pub struct PgUsageLedger {
    db: Pool<Postgres>,
}

impl PgUsageLedger {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsageLedger for PgUsageLedger {
    async fn record_cycle(&self, instance_id: i64, amount: u32) -> Result<InstanceCycle, LifecycleError> {
        let row = sqlx::query_as::<_, InstanceCycle>(
            "INSERT INTO instance_cycles (instance_id, amount)
             VALUES ($1, $2)
             RETURNING id, instance_id, amount, created_at",
        )
        .bind(instance_id)
        .bind(i64::from(amount))
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn record_burned_cycle(
        &self,
        instance_id: i64,
        amount: u32,
    ) -> Result<InstanceBurnedCycle, LifecycleError> {
        let row = sqlx::query_as::<_, InstanceBurnedCycle>(
            "INSERT INTO instance_burned_cycles (instance_id, amount)
             VALUES ($1, $2)
             RETURNING id, instance_id, amount, created_at",
        )
        .bind(instance_id)
        .bind(i64::from(amount))
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn cycles_sum(&self, instance_id: i64) -> Result<i64, LifecycleError> {
        // SUM(bigint) is numeric in Postgres; cast back so it decodes as i64.
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM instance_cycles WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_one(&self.db)
        .await?;
        Ok(sum)
    }

    async fn burned_cycles_sum(&self, instance_id: i64) -> Result<i64, LifecycleError> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM instance_burned_cycles WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_one(&self.db)
        .await?;
        Ok(sum)
    }
}
