use sqlx::Pool;
use sqlx::Postgres;

/// Run database migrations, tolerating a failed run when the schema is already in place
/// (migrations applied by hand or by another replica).
pub async fn run_migrations(pool: &Pool<Postgres>) -> Result<(), sqlx::migrate::MigrateError> {
    if let Err(e) = sqlx::migrate!("../sqlx-migrations").run(pool).await {
        tracing::warn!("migration error (safe to ignore if applied manually): {}", e);

        let instances_exist: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = 'instances')",
        )
        .fetch_one(pool)
        .await
        .unwrap_or(false);

        if !instances_exist {
            tracing::error!("table 'instances' does not exist, migrations must be applied");
            return Err(e);
        }
        tracing::info!("critical tables exist, continuing despite migration error");
    }
    Ok(())
}
