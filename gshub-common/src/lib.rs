use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod bus;
pub mod error;

pub use error::LifecycleError;

// --- Enums ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type, utoipa::ToSchema)]
#[sqlx(type_name = "instance_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Provisioning, // Launched at the provider, waiting for the startup callback
    Ready,        // Resource reported its service reachable
    Stopped,      // Resource reported a shutdown after having been ready
    Failed,       // Resource shut down before ever becoming ready
    Terminated,   // Destroyed at the provider, record soft-deleted
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Provisioning => "provisioning",
            InstanceStatus::Ready => "ready",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Terminated => "terminated",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type, utoipa::ToSchema)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

// --- Entities (SQLx Mapped) ---

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

/// Catalog entry picked at creation time. Read-only for the orchestrator.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: i64,
    pub name: String,
    /// Provider commercial type used as the resource shape (e.g. "DEV1-S").
    pub instance_type: String,
    pub v_cores: i32,
    /// Memory in MB, handed to the instance during the startup handshake.
    pub memory: i32,
    pub price: f64,
    pub disk: i32,
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: i64,
    pub name_id: String,
    pub name: String,
    pub name_long: String,
    #[serde(skip_serializing, default)] // container image stays server-side
    pub image: String,
    pub min_mem: i32,
    pub rec_mem: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: i64,
    /// External resource id returned by the gateway at launch. Never reassigned.
    pub real_id: String,
    pub name: String,
    pub ready: bool,
    pub public_ip: String,
    pub status: InstanceStatus,
    pub plan_id: i64,
    pub user_id: i64,
    pub service_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Row to insert once the gateway has launched the resource.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub real_id: String,
    pub name: String,
    pub plan_id: i64,
    pub user_id: i64,
    pub service_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCycle {
    pub id: i64,
    pub instance_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceBurnedCycle {
    pub id: i64,
    pub instance_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

// --- Service configuration presets (file-backed, not in DB) ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfiguration {
    pub name: String,
    pub name_long: String,
    pub image: String,
    pub min_mem: i32,
    pub rec_mem: i32,
    #[serde(default)]
    pub env: Vec<ServiceEnv>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default)]
    pub volumes: Vec<ServiceVolume>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEnv {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub values: Vec<ServiceEnvValue>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct ServiceEnvValue {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct ServicePort {
    pub host: i64,
    pub container: i64,
    pub protocol: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct ServiceVolume {
    pub host: String,
    pub destination: String,
}

/// Presets keyed by `Service::name_id`.
pub type ServiceConfigurations = BTreeMap<String, ServiceConfiguration>;

// --- Callback / read-model payloads ---

/// Reply to the startup callback: everything the instance needs to boot its workload.
#[derive(Debug, Serialize, Deserialize, Clone, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartupHandshake {
    pub instance_memory: i32,
    pub owner_id: i64,
    pub cycles: i64,
    pub services: Vec<Service>,
    #[schema(value_type = Object)]
    pub service_configs: ServiceConfigurations,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub instance_id: i64,
    pub cycles: i64,
    pub burned_cycles: i64,
}

/// Provider state reported when the gateway cannot describe a resource.
pub const PROVIDER_STATE_UNKNOWN: &str = "unknown";

/// Listing entry: the stored record plus what the provider reports for it right now.
#[derive(Debug, Serialize, Deserialize, Clone, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    #[serde(flatten)]
    pub instance: Instance,
    pub provider_state: String,
    /// Empty unless the resource is running.
    pub provider_public_ip: String,
}

impl InstanceView {
    pub fn unknown(instance: Instance) -> Self {
        Self {
            instance,
            provider_state: PROVIDER_STATE_UNKNOWN.to_string(),
            provider_public_ip: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_serializes_camel_case_without_deleted_at() {
        let now = Utc::now();
        let instance = Instance {
            id: 1,
            real_id: "x-1".to_string(),
            name: String::new(),
            ready: false,
            public_ip: String::new(),
            status: InstanceStatus::Provisioning,
            plan_id: 1,
            user_id: 7,
            service_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let v = serde_json::to_value(&instance).unwrap();
        assert_eq!(v["realId"], "x-1");
        assert_eq!(v["publicIp"], "");
        assert_eq!(v["status"], "provisioning");
        assert!(v.get("deletedAt").is_none());
    }

    #[test]
    fn instance_view_flattens_the_record() {
        let now = Utc::now();
        let view = InstanceView::unknown(Instance {
            id: 3,
            real_id: "x-3".to_string(),
            name: "starter".to_string(),
            ready: true,
            public_ip: "10.0.0.3".to_string(),
            status: InstanceStatus::Ready,
            plan_id: 1,
            user_id: 7,
            service_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        });
        let v = serde_json::to_value(&view).unwrap();
        assert_eq!(v["id"], 3);
        assert_eq!(v["realId"], "x-3");
        assert_eq!(v["providerState"], "unknown");
        assert_eq!(v["providerPublicIp"], "");
        assert!(v.get("instance").is_none());
    }

    #[test]
    fn service_image_is_not_serialized() {
        let service = Service {
            id: 1,
            name_id: "minecraft".to_string(),
            name: "Minecraft".to_string(),
            name_long: "Minecraft: Java Edition".to_string(),
            image: "itzg/minecraft-server".to_string(),
            min_mem: 1024,
            rec_mem: 2048,
        };
        let v = serde_json::to_value(&service).unwrap();
        assert!(v.get("image").is_none());
        assert_eq!(v["nameId"], "minecraft");
    }

    #[test]
    fn presets_parse_with_missing_optional_lists() {
        let raw = r#"{
            "minecraft": {
                "name": "Minecraft",
                "nameLong": "Minecraft: Java Edition",
                "image": "itzg/minecraft-server",
                "minMem": 1024,
                "recMem": 2048,
                "ports": [{"host": 25565, "container": 25565, "protocol": "tcp"}]
            }
        }"#;
        let presets: ServiceConfigurations = serde_json::from_str(raw).unwrap();
        let mc = &presets["minecraft"];
        assert_eq!(mc.ports.len(), 1);
        assert!(mc.env.is_empty());
        assert!(mc.volumes.is_empty());
    }
}
