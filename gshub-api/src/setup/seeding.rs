use gshub_common::{ServiceConfigurations, UserRole};
use gshub_orchestrator::InMemoryStore;
use sqlx::{Pool, Postgres};

struct DemoPlan {
    name: &'static str,
    instance_type: &'static str,
    v_cores: i32,
    memory: i32,
    price: f64,
    disk: i32,
}

const DEMO_PLANS: [DemoPlan; 3] = [
    DemoPlan { name: "starter", instance_type: "DEV1-S", v_cores: 2, memory: 2048, price: 4.99, disk: 20 },
    DemoPlan { name: "standard", instance_type: "DEV1-M", v_cores: 3, memory: 4096, price: 9.99, disk: 40 },
    DemoPlan { name: "pro", instance_type: "DEV1-L", v_cores: 4, memory: 8192, price: 19.99, disk: 80 },
];

/// Fill a fresh in-memory store with the demo catalog and an admin principal.
pub fn seed_memory_store(store: &InMemoryStore, presets: &ServiceConfigurations, admin_email: &str) {
    for plan in &DEMO_PLANS {
        store.seed_plan(plan.name, plan.instance_type, plan.memory, true);
    }
    for (name_id, preset) in presets {
        store.seed_service(name_id, &preset.image, preset.min_mem, preset.rec_mem);
    }
    store.seed_user(admin_email, UserRole::Admin);
    tracing::info!(
        "memory store seeded: {} plan(s), {} service(s), admin {}",
        DEMO_PLANS.len(),
        presets.len(),
        admin_email
    );
}

/// Dev convenience: insert the demo plans and one service per preset.
/// Re-runnable; rows that already exist (plans by name, services by `name_id`) are left alone.
pub async fn maybe_seed_catalog(
    db: &Pool<Postgres>,
    enabled: bool,
    presets: &ServiceConfigurations,
) -> Result<(), sqlx::Error> {
    if !enabled {
        return Ok(());
    }

    let mut plans = 0u64;
    for plan in &DEMO_PLANS {
        plans += sqlx::query(
            r#"INSERT INTO plans (name, instance_type, v_cores, memory, price, disk, enabled)
               SELECT $1, $2, $3, $4, $5, $6, TRUE
               WHERE NOT EXISTS (SELECT 1 FROM plans WHERE name = $1)"#,
        )
        .bind(plan.name)
        .bind(plan.instance_type)
        .bind(plan.v_cores)
        .bind(plan.memory)
        .bind(plan.price)
        .bind(plan.disk)
        .execute(db)
        .await?
        .rows_affected();
    }

    let mut services = 0u64;
    for (name_id, preset) in presets {
        services += sqlx::query(
            r#"INSERT INTO services (name_id, name, name_long, image, min_mem, rec_mem)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (name_id) DO NOTHING"#,
        )
        .bind(name_id)
        .bind(&preset.name)
        .bind(&preset.name_long)
        .bind(&preset.image)
        .bind(preset.min_mem)
        .bind(preset.rec_mem)
        .execute(db)
        .await?
        .rows_affected();
    }

    tracing::info!(
        "AUTO_SEED_CATALOG: inserted {} plan(s) and {} service(s)",
        plans,
        services
    );
    Ok(())
}

/// Make sure an admin user exists so rollouts can be triggered on a fresh database.
pub async fn ensure_dev_admin(db: &Pool<Postgres>, email: &str) {
    let res = sqlx::query(
        "INSERT INTO users (email, role) VALUES ($1, 'admin') ON CONFLICT (email) DO NOTHING",
    )
    .bind(email)
    .execute(db)
    .await;
    match res {
        Ok(r) if r.rows_affected() > 0 => tracing::info!("bootstrap admin created: {}", email),
        Ok(_) => tracing::debug!("bootstrap admin already present: {}", email),
        Err(e) => tracing::warn!("bootstrap admin failed for {}: {}", email, e),
    }
}
