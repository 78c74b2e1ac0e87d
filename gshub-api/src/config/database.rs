use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::time::Duration;

/// Connect the Postgres pool used by the instance repository, ledger and catalog.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<Pool<Postgres>, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}
