use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -----------------------------------------------------------------------------
// Channels
// -----------------------------------------------------------------------------

pub const CHANNEL_USAGE_EVENTS: &str = "usage_events";

// -----------------------------------------------------------------------------
// Usage domain events (EVT:*)
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum UsageEventType {
    #[serde(rename = "EVT:INSTANCE_CREATED")]
    InstanceCreated,
    #[serde(rename = "EVT:INSTANCE_READY")]
    InstanceReady,
    #[serde(rename = "EVT:INSTANCE_TERMINATED")]
    InstanceTerminated,
    #[serde(rename = "EVT:CYCLE_RECORDED")]
    CycleRecorded,
    #[serde(rename = "EVT:BURNED_CYCLE_RECORDED")]
    BurnedCycleRecorded,
}

impl UsageEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageEventType::InstanceCreated => "EVT:INSTANCE_CREATED",
            UsageEventType::InstanceReady => "EVT:INSTANCE_READY",
            UsageEventType::InstanceTerminated => "EVT:INSTANCE_TERMINATED",
            UsageEventType::CycleRecorded => "EVT:CYCLE_RECORDED",
            UsageEventType::BurnedCycleRecorded => "EVT:BURNED_CYCLE_RECORDED",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UsageEventEnvelope {
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: UsageEventType,
    pub occurred_at: DateTime<Utc>,
    pub instance_id: i64,
    pub payload: serde_json::Value,
    pub source: String,
}

impl UsageEventEnvelope {
    pub fn new(
        event_type: UsageEventType,
        instance_id: i64,
        payload: serde_json::Value,
        source: &str,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            occurred_at: Utc::now(),
            instance_id,
            payload,
            source: source.to_string(),
        }
    }
}
