use async_trait::async_trait;
use gshub_common::{Instance, InstanceStatus, LifecycleError, NewInstance, User};
use sqlx::{Pool, Postgres};

/// Persistence for instance records and their owners.
///
/// Every user-facing read or mutation is scoped by owner email so one tenant can never see or
/// touch another tenant's row. Soft-deleted rows are invisible to all reads.
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn find_owner(&self, email: &str) -> Result<Option<User>, LifecycleError>;

    /// Insert a freshly launched instance (`ready=false`, `public_ip=""`, `provisioning`).
    async fn insert(&self, new: NewInstance) -> Result<Instance, LifecycleError>;

    /// Unscoped lookup, used by instance callbacks which carry no user principal.
    async fn get(&self, id: i64) -> Result<Option<Instance>, LifecycleError>;

    async fn get_owned(&self, owner_email: &str, id: i64) -> Result<Option<Instance>, LifecycleError>;

    async fn list_owned(&self, owner_email: &str) -> Result<Vec<Instance>, LifecycleError>;

    /// Compare-and-set on status, scoped by owner id.
    /// Returns `false` when the row is gone or its status is no longer `expected`.
    async fn update_readiness(
        &self,
        id: i64,
        owner_id: i64,
        expected: InstanceStatus,
        next: InstanceStatus,
        ready: bool,
        public_ip: &str,
    ) -> Result<bool, LifecycleError>;

    /// Soft delete. Returns the number of rows affected (0 or 1).
    async fn delete_owned(&self, owner_email: &str, id: i64) -> Result<u64, LifecycleError>;
}

const INSTANCE_COLUMNS: &str = "i.id, i.real_id, i.name, i.ready, i.public_ip, i.status, \
     i.plan_id, i.user_id, i.service_id, i.created_at, i.updated_at, i.deleted_at";

pub struct PgInstanceRepository {
    db: Pool<Postgres>,
}

impl PgInstanceRepository {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl InstanceRepository for PgInstanceRepository {
    async fn find_owner(&self, email: &str) -> Result<Option<User>, LifecycleError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, role, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, new: NewInstance) -> Result<Instance, LifecycleError> {
        let sql = format!(
            "INSERT INTO instances AS i (real_id, name, ready, public_ip, status, plan_id, user_id, service_id)
             VALUES ($1, $2, false, '', 'provisioning', $3, $4, $5)
             RETURNING {}",
            INSTANCE_COLUMNS
        );
        let instance = sqlx::query_as::<_, Instance>(&sql)
            .bind(&new.real_id)
            .bind(&new.name)
            .bind(new.plan_id)
            .bind(new.user_id)
            .bind(new.service_id)
            .fetch_one(&self.db)
            .await?;
        Ok(instance)
    }

    async fn get(&self, id: i64) -> Result<Option<Instance>, LifecycleError> {
        let sql = format!(
            "SELECT {} FROM instances i WHERE i.id = $1 AND i.deleted_at IS NULL",
            INSTANCE_COLUMNS
        );
        let instance = sqlx::query_as::<_, Instance>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(instance)
    }

    async fn get_owned(&self, owner_email: &str, id: i64) -> Result<Option<Instance>, LifecycleError> {
        let sql = format!(
            "SELECT {} FROM instances i
             JOIN users u ON u.id = i.user_id
             WHERE i.id = $1 AND u.email = $2 AND i.deleted_at IS NULL",
            INSTANCE_COLUMNS
        );
        let instance = sqlx::query_as::<_, Instance>(&sql)
            .bind(id)
            .bind(owner_email)
            .fetch_optional(&self.db)
            .await?;
        Ok(instance)
    }

    async fn list_owned(&self, owner_email: &str) -> Result<Vec<Instance>, LifecycleError> {
        let sql = format!(
            "SELECT {} FROM instances i
             JOIN users u ON u.id = i.user_id
             WHERE u.email = $1 AND i.deleted_at IS NULL
             ORDER BY i.id",
            INSTANCE_COLUMNS
        );
        let rows = sqlx::query_as::<_, Instance>(&sql)
            .bind(owner_email)
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
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
        let res = sqlx::query(
            "UPDATE instances
             SET status = $4, ready = $5, public_ip = $6, updated_at = NOW()
             WHERE id = $1 AND user_id = $2 AND status = $3 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(owner_id)
        .bind(expected)
        .bind(next)
        .bind(ready)
        .bind(public_ip)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_owned(&self, owner_email: &str, id: i64) -> Result<u64, LifecycleError> {
        let res = sqlx::query(
            "UPDATE instances
             SET status = 'terminated', ready = false, public_ip = '',
                 deleted_at = NOW(), updated_at = NOW()
             WHERE id = $1
               AND deleted_at IS NULL
               AND user_id = (SELECT id FROM users WHERE email = $2)",
        )
        .bind(id)
        .bind(owner_email)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected())
    }
}
