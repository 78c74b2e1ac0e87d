use crate::inventory::{
    CommandStatus, LaunchedResource, ResourceDescription, ResourceShape, STATE_RUNNING,
};
use crate::CloudGateway;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const DEFAULT_API_BASE: &str = "https://api.scaleway.com/instance/v1";

/// Connection settings for the Scaleway Instances API and the SSH channel used for remote commands.
#[derive(Clone, Debug)]
pub struct ScalewaySettings {
    /// Instance API root, without the `/zones/...` suffix.
    pub api_base: String,
    pub zone: String,
    pub project_id: String,
    pub secret_key: String,
    pub image_id: String,
    pub cloud_init: Option<String>,
    pub ssh_user: String,
    pub ssh_key_path: String,
    pub ssh_timeout: Duration,
}

type CommandTable = Arc<Mutex<HashMap<(String, String), CommandStatus>>>;

pub struct ScalewayGateway {
    client: Client,
    settings: ScalewaySettings,
    commands: CommandTable,
}

impl ScalewayGateway {
    pub fn new(settings: ScalewaySettings) -> Result<Self> {
        // Default reqwest client has no overall timeout; a stalled API call would hang a request.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .context("failed to build Scaleway http client")?;
        let settings = ScalewaySettings {
            api_base: settings.api_base.trim().trim_end_matches('/').to_string(),
            zone: settings.zone.trim().to_string(),
            project_id: settings.project_id.trim().to_string(),
            secret_key: settings.secret_key.trim().to_string(),
            cloud_init: settings
                .cloud_init
                .filter(|s| !s.trim().is_empty()),
            ..settings
        };
        Ok(Self {
            client,
            settings,
            commands: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "X-Auth-Token",
            reqwest::header::HeaderValue::from_str(&self.settings.secret_key)
                .context("Scaleway secret key is not a valid header value")?,
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        Ok(headers)
    }

    fn server_url(&self, server_id: &str) -> String {
        format!(
            "{}/zones/{}/servers/{}",
            self.settings.api_base, self.settings.zone, server_id
        )
    }

    fn servers_url(&self) -> String {
        format!("{}/zones/{}/servers", self.settings.api_base, self.settings.zone)
    }

    /// Plain delete; only valid while the server is stopped (volumes are kept by Scaleway).
    async fn delete_server(&self, server_id: &str) -> Result<()> {
        let url = self.server_url(server_id);
        tracing::info!("[Scaleway API] DELETE {}", url);
        let resp = self.client.delete(&url).headers(self.headers()?).send().await?;
        let status = resp.status();
        if !status.is_success() && status.as_u16() != 404 {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Scaleway delete server failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }
        Ok(())
    }

    async fn server_action(&self, server_id: &str, action: &str) -> Result<()> {
        let url = format!("{}/action", self.server_url(server_id));
        tracing::info!("[Scaleway API] POST {} action={}", url, action);

        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&json!({ "action": action }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(
                "[Scaleway API] POST {} failed: status={} response={}",
                url,
                status.as_u16(),
                text
            );
            return Err(anyhow::anyhow!(
                "Scaleway {} failed: status={} body={}",
                action,
                status.as_u16(),
                text
            ));
        }
        tracing::info!("[Scaleway API] POST {} succeeded: status={}", url, status.as_u16());
        Ok(())
    }

    async fn get_server(&self, server_id: &str) -> Result<Option<serde_json::Value>> {
        let url = self.server_url(server_id);
        tracing::debug!("[Scaleway API] GET {}", url);

        let resp = self.client.get(&url).headers(self.headers()?).send().await?;
        let status = resp.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Scaleway get server failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(Some(body["server"].clone()))
    }

    async fn set_cloud_init(&self, server_id: &str, cloud_init: &str) -> Result<()> {
        let url = format!("{}/user_data/cloud-init", self.server_url(server_id));
        let resp = self
            .client
            .patch(&url)
            .headers(self.headers()?)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(cloud_init.to_string())
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Scaleway set cloud-init failed: status={} body={}",
                status,
                text
            ));
        }
        Ok(())
    }

    fn set_command_status(commands: &CommandTable, command_id: &str, target: &str, status: CommandStatus) {
        commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((command_id.to_string(), target.to_string()), status);
    }
}

/// Convert a Scaleway server JSON object into a resource description.
fn describe_server(server_id: &str, server: &serde_json::Value) -> ResourceDescription {
    let state = server["state"].as_str().unwrap_or("unknown").to_string();
    let public_ip = if state == STATE_RUNNING {
        server["public_ip"]["address"]
            .as_str()
            .or_else(|| {
                server["public_ips"]
                    .as_array()
                    .and_then(|ips| ips.first())
                    .and_then(|ip| ip["address"].as_str())
            })
            .unwrap_or("")
            .to_string()
    } else {
        String::new()
    };
    ResourceDescription {
        external_id: server_id.to_string(),
        state,
        public_ip,
    }
}

fn tail_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

async fn run_ssh_script(
    user: &str,
    key_path: &str,
    ip: &str,
    script: &str,
    timeout: Duration,
) -> CommandStatus {
    let target = format!("{}@{}", user, ip);
    let mut child = match Command::new("ssh")
        .arg("-i")
        .arg(key_path)
        .arg("-o")
        .arg("StrictHostKeyChecking=no")
        .arg("-o")
        .arg("UserKnownHostsFile=/dev/null")
        .arg("-o")
        .arg("ConnectTimeout=10")
        .arg(&target)
        .arg("bash -s")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            return CommandStatus::Failed {
                detail: format!("ssh spawn failed: {}", e),
            }
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(script.as_bytes()).await {
            return CommandStatus::Failed {
                detail: format!("ssh stdin write failed: {}", e),
            };
        }
    }

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => CommandStatus::Success,
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            CommandStatus::Failed {
                detail: format!("exit={}: {}", output.status, tail_str(&stderr, 2000)),
            }
        }
        Ok(Err(e)) => CommandStatus::Failed {
            detail: format!("ssh wait failed: {}", e),
        },
        Err(_) => CommandStatus::Cancelled,
    }
}

#[async_trait]
impl CloudGateway for ScalewayGateway {
    async fn launch(&self, shape: &ResourceShape) -> Result<LaunchedResource> {
        let url = self.servers_url();
        let name = format!("gshub-{}", uuid::Uuid::new_v4());
        let body = json!({
            "name": name,
            "commercial_type": shape.instance_type,
            "project": self.settings.project_id,
            "image": self.settings.image_id,
            "tags": ["gshub", "game-server"],
            "dynamic_ip_required": true
        });

        tracing::info!(
            "[Scaleway API] POST {} type={} zone={}",
            url,
            shape.instance_type,
            self.settings.zone
        );
        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(
                "[Scaleway API] POST {} failed: status={} response={}",
                url,
                status.as_u16(),
                text
            );
            return Err(anyhow::anyhow!(
                "Scaleway create server failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }

        let json_resp: serde_json::Value = resp.json().await?;
        let server_id = json_resp["server"]["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("No server id in create response"))?
            .to_string();
        tracing::info!("[Scaleway API] server created: id={}", server_id);

        if let Some(ci) = self.settings.cloud_init.as_deref() {
            if let Err(e) = self.set_cloud_init(&server_id, ci).await {
                tracing::warn!("[Scaleway API] cloud-init upload failed for {}: {}", server_id, e);
            }
        }

        // The caller only learns the id on success, so a server that cannot boot is removed here.
        if let Err(e) = self.server_action(&server_id, "poweron").await {
            match self.delete_server(&server_id).await {
                Ok(()) => tracing::info!(
                    "[Scaleway API] deleted {} after failed poweron",
                    server_id
                ),
                Err(cleanup) => tracing::error!(
                    "[Scaleway API] orphaned server {}: delete after failed poweron failed: {:#}",
                    server_id,
                    cleanup
                ),
            }
            return Err(e);
        }

        Ok(LaunchedResource {
            external_id: server_id,
            state: "starting".to_string(),
        })
    }

    async fn describe(&self, external_ids: &[String]) -> Result<Vec<ResourceDescription>> {
        let mut out = Vec::with_capacity(external_ids.len());
        for id in external_ids {
            if let Some(server) = self.get_server(id).await? {
                out.push(describe_server(id, &server));
            }
        }
        Ok(out)
    }

    async fn start(&self, external_ids: &[String]) -> Result<()> {
        for id in external_ids {
            self.server_action(id, "poweron").await?;
        }
        Ok(())
    }

    async fn stop(&self, external_ids: &[String]) -> Result<()> {
        for id in external_ids {
            self.server_action(id, "poweroff").await?;
        }
        Ok(())
    }

    async fn terminate(&self, external_ids: &[String]) -> Result<()> {
        // "terminate" powers off and deletes the server together with its local volumes.
        for id in external_ids {
            self.server_action(id, "terminate").await?;
        }
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<String>> {
        let url = self.servers_url();
        let mut ids = Vec::new();
        let mut page = 1u32;
        loop {
            let resp = self
                .client
                .get(&url)
                .headers(self.headers()?)
                .query(&[
                    ("state", STATE_RUNNING.to_string()),
                    ("project", self.settings.project_id.clone()),
                    ("per_page", "100".to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await?;
            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                return Err(anyhow::anyhow!(
                    "Scaleway list servers failed: status={} body={}",
                    status,
                    text
                ));
            }
            let body: serde_json::Value = resp.json().await?;
            let servers = body["servers"].as_array().cloned().unwrap_or_default();
            let count = servers.len();
            ids.extend(
                servers
                    .iter()
                    .filter_map(|s| s["id"].as_str().map(|s| s.to_string())),
            );
            if count < 100 {
                break;
            }
            page += 1;
        }
        tracing::debug!("[Scaleway API] {} running server(s)", ids.len());
        Ok(ids)
    }

    async fn run_remote_command(&self, external_ids: &[String], script: &str) -> Result<String> {
        let command_id = uuid::Uuid::new_v4().to_string();

        // Resolve every address up front so a dispatch failure is reported before any script runs.
        let mut targets = Vec::with_capacity(external_ids.len());
        for id in external_ids {
            let desc = self
                .get_server(id)
                .await?
                .map(|s| describe_server(id, &s))
                .ok_or_else(|| anyhow::anyhow!("server {} not found", id))?;
            if desc.public_ip.is_empty() {
                return Err(anyhow::anyhow!("server {} has no public address", id));
            }
            targets.push((id.clone(), desc.public_ip));
        }

        for (id, ip) in targets {
            Self::set_command_status(&self.commands, &command_id, &id, CommandStatus::InProgress);
            let commands = self.commands.clone();
            let command_id = command_id.clone();
            let script = script.to_string();
            let user = self.settings.ssh_user.clone();
            let key_path = self.settings.ssh_key_path.clone();
            let timeout = self.settings.ssh_timeout;
            tokio::spawn(async move {
                let status = run_ssh_script(&user, &key_path, &ip, &script, timeout).await;
                tracing::info!(
                    "[Scaleway SSH] command {} on {} finished: {:?}",
                    command_id,
                    id,
                    status
                );
                Self::set_command_status(&commands, &command_id, &id, status);
            });
        }
        Ok(command_id)
    }

    async fn command_status(&self, command_id: &str, external_id: &str) -> Result<CommandStatus> {
        let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        let key = (command_id.to_string(), external_id.to_string());
        let status = commands.get(&key).cloned().ok_or_else(|| {
            anyhow::anyhow!("unknown command {} for server {}", command_id, external_id)
        })?;
        // A finished status is reported once, then forgotten.
        if status.is_terminal() {
            commands.remove(&key);
        }
        Ok(status)
    }

    fn supports_shape(&self, shape: &ResourceShape) -> bool {
        let t = shape.instance_type.trim();
        !t.is_empty() && !t.contains(char::is_whitespace)
    }
}
