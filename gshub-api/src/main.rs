use anyhow::Context;
use gshub_api::app::{create_cors, AppState};
use gshub_api::config::{self, AppConfig, StorageBackend};
use gshub_api::{routes, setup};
use gshub_orchestrator::{
    load_service_presets, FileScriptSource, InMemoryStore, Orchestrator, PgCatalog,
    PgInstanceRepository, PgUsageLedger, ProviderManager, RolloutCoordinator,
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let cfg = AppConfig::from_env()?;

    let gateway = ProviderManager::get_gateway(&cfg.provider)
        .with_context(|| format!("provider '{}' could not be initialised", cfg.provider))?;
    tracing::info!("cloud provider: {}", cfg.provider);

    let presets = load_service_presets(&cfg.service_presets_path)?;

    let orchestrator = match &cfg.storage {
        StorageBackend::Postgres {
            database_url,
            max_connections,
        } => {
            let pool = config::database::create_pool(database_url, *max_connections)
                .await
                .context("failed to connect to Postgres")?;
            setup::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;
            setup::maybe_seed_catalog(&pool, cfg.seed_demo_catalog, &presets)
                .await
                .context("failed to seed the demo catalog")?;
            setup::ensure_dev_admin(&pool, &cfg.dev_admin_email).await;
            Orchestrator::new(
                gateway.clone(),
                Arc::new(PgInstanceRepository::new(pool.clone())),
                Arc::new(PgUsageLedger::new(pool.clone())),
                Arc::new(PgCatalog::new(pool, presets)),
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("STORAGE=memory: state is lost on restart");
            let store = Arc::new(InMemoryStore::with_presets(presets.clone()));
            setup::seed_memory_store(&store, &presets, &cfg.dev_admin_email);
            Orchestrator::with_store(gateway.clone(), store)
        }
    };

    let rollout = RolloutCoordinator::new(
        gateway,
        Arc::new(FileScriptSource::new(cfg.rollout_script_path.clone())),
    )
    .with_timing(cfg.rollout_poll_interval, cfg.rollout_target_timeout);

    let redis_client = config::redis::create_client(cfg.redis_url.as_deref())
        .context("invalid REDIS_URL")?;
    if redis_client.is_none() {
        tracing::info!("REDIS_URL not set, usage events are not published");
    }

    let state = AppState::new(
        orchestrator,
        rollout,
        redis_client,
        cfg.instance_callback_token.clone(),
    );
    let app = routes::create_router(state.clone())
        .layer(create_cors())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}
