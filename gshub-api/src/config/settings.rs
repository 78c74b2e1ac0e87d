use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres { database_url: String, max_connections: u32 },
    /// Process-local storage, seeded with a demo catalog. Data is lost on restart.
    Memory,
}

/// Process configuration, read once at start-up from the environment (after `.env`).
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub storage: StorageBackend,
    pub redis_url: Option<String>,
    pub provider: String,
    pub rollout_script_path: PathBuf,
    pub rollout_poll_interval: Duration,
    pub rollout_target_timeout: Duration,
    pub service_presets_path: PathBuf,
    pub instance_callback_token: Option<String>,
    pub dev_admin_email: String,
    /// Insert the demo plans and the preset services into Postgres at start-up.
    pub seed_demo_catalog: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let secret = |k: &str| {
            get(&format!("{}_FILE", k))
                .and_then(|path| std::fs::read_to_string(path).ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| get(k))
        };
        let flag = |k: &str| {
            get(k)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false)
        };
        let secs = |k: &str, default: u64| -> Result<Duration> {
            match get(k) {
                Some(v) => {
                    let n: u64 = v
                        .parse()
                        .with_context(|| format!("{} must be a number of seconds", k))?;
                    if n == 0 {
                        bail!("{} must be greater than 0", k);
                    }
                    Ok(Duration::from_secs(n))
                }
                None => Ok(Duration::from_secs(default)),
            }
        };

        let storage = match get("STORAGE").as_deref().unwrap_or("postgres") {
            "memory" => StorageBackend::Memory,
            "postgres" => StorageBackend::Postgres {
                database_url: secret("DATABASE_URL")
                    .context("DATABASE_URL must be set (or STORAGE=memory)")?,
                max_connections: get("DATABASE_MAX_CONNECTIONS")
                    .map(|v| v.parse::<u32>())
                    .transpose()
                    .context("DATABASE_MAX_CONNECTIONS must be a number")?
                    .unwrap_or(5),
            },
            other => bail!("unknown STORAGE '{}' (expected postgres|memory)", other),
        };

        let port = get("PORT")
            .map(|v| v.parse::<u16>())
            .transpose()
            .context("PORT must be a valid port number")?
            .unwrap_or(8080);

        Ok(Self {
            port,
            storage,
            redis_url: get("REDIS_URL"),
            provider: get("PROVIDER").unwrap_or_else(|| "mock".to_string()),
            rollout_script_path: get("ROLLOUT_SCRIPT_PATH")
                .unwrap_or_else(|| "./scripts/instance-update.sh".to_string())
                .into(),
            rollout_poll_interval: secs("ROLLOUT_POLL_INTERVAL_SECS", 5)?,
            rollout_target_timeout: secs("ROLLOUT_TARGET_TIMEOUT_SECS", 10 * 60)?,
            service_presets_path: get("SERVICE_PRESETS_PATH")
                .unwrap_or_else(|| "./service-presets/service-configurations.json".to_string())
                .into(),
            instance_callback_token: secret("INSTANCE_CALLBACK_TOKEN"),
            dev_admin_email: get("DEV_ADMIN_EMAIL").unwrap_or_else(|| "admin@gshub.local".to_string()),
            seed_demo_catalog: flag("AUTO_SEED_CATALOG"),
        })
    }
}
