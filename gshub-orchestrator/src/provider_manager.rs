use anyhow::Result;
use gshub_providers::CloudGateway;
use std::sync::Arc;

pub struct ProviderManager;

impl ProviderManager {
    /// Build the gateway for `provider_name`. A missing or incomplete configuration is an error;
    /// callers treat it as fatal at start-up.
    pub fn get_gateway(provider_name: &str) -> Result<Arc<dyn CloudGateway>> {
        match provider_name.to_lowercase().as_str() {
            #[cfg(feature = "provider-scaleway")]
            "scaleway" => {
                let settings = scaleway_settings_from(|k| std::env::var(k).ok())?;
                Ok(Arc::new(gshub_providers::scaleway::ScalewayGateway::new(
                    settings,
                )?))
            }
            #[cfg(feature = "provider-mock")]
            "mock" => Ok(Arc::new(gshub_providers::mock::MockGateway::new())),
            other => Err(anyhow::anyhow!(
                "unknown or disabled provider '{}'",
                other
            )),
        }
    }
}

/// Read Scaleway settings through `lookup` (the process environment in production).
/// Secrets prefer `*_FILE` paths (Docker/K8s friendly) and fall back to plain variables.
#[cfg(feature = "provider-scaleway")]
pub fn scaleway_settings_from(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<gshub_providers::scaleway::ScalewaySettings> {
    let non_empty = |k: &str| lookup(k).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let from_file = |k: &str| {
        non_empty(k)
            .and_then(|path| std::fs::read_to_string(path).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let project_id = non_empty("SCALEWAY_PROJECT_ID")
        .ok_or_else(|| anyhow::anyhow!("SCALEWAY_PROJECT_ID is not set"))?;
    let secret_key = from_file("SCALEWAY_SECRET_KEY_FILE")
        .or_else(|| non_empty("SCALEWAY_SECRET_KEY"))
        .ok_or_else(|| anyhow::anyhow!("SCALEWAY_SECRET_KEY(_FILE) is not set"))?;
    let image_id = non_empty("SCALEWAY_IMAGE_ID")
        .ok_or_else(|| anyhow::anyhow!("SCALEWAY_IMAGE_ID is not set"))?;
    let ssh_timeout_secs = non_empty("SCALEWAY_SSH_TIMEOUT_SECS")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(900);

    Ok(gshub_providers::scaleway::ScalewaySettings {
        api_base: non_empty("SCALEWAY_API_URL")
            .unwrap_or_else(|| gshub_providers::scaleway::DEFAULT_API_BASE.to_string()),
        zone: non_empty("SCALEWAY_ZONE").unwrap_or_else(|| "fr-par-1".to_string()),
        project_id,
        secret_key,
        image_id,
        cloud_init: from_file("SCALEWAY_CLOUD_INIT_FILE"),
        ssh_user: non_empty("SCALEWAY_SSH_USER").unwrap_or_else(|| "root".to_string()),
        ssh_key_path: non_empty("SCALEWAY_SSH_KEY_FILE")
            .unwrap_or_else(|| "/app/.ssh/gshub-key".to_string()),
        ssh_timeout: std::time::Duration::from_secs(ssh_timeout_secs),
    })
}
