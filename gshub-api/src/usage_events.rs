use gshub_common::bus::{UsageEventEnvelope, UsageEventType, CHANNEL_USAGE_EVENTS};
use redis::AsyncCommands;

use crate::app::AppState;

const EVENT_SOURCE: &str = "gshub-api";

pub async fn publish_usage_event(
    client: &redis::Client,
    event: &UsageEventEnvelope,
) -> anyhow::Result<()> {
    let payload = serde_json::to_string(event)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    conn.publish::<_, _, ()>(CHANNEL_USAGE_EVENTS, payload).await?;
    Ok(())
}

/// Fire-and-forget publish. A no-op without Redis; failures are logged and never reach the
/// caller, since the ledger row is already committed.
pub fn emit_usage_event(
    state: &AppState,
    event_type: UsageEventType,
    instance_id: i64,
    payload: serde_json::Value,
) {
    let Some(client) = state.redis_client.clone() else {
        return;
    };
    let event = UsageEventEnvelope::new(event_type, instance_id, payload, EVENT_SOURCE);
    tokio::spawn(async move {
        match publish_usage_event(&client, &event).await {
            Ok(()) => tracing::debug!(
                "published {} for instance {}",
                event.event_type.as_str(),
                event.instance_id
            ),
            Err(e) => tracing::warn!(
                "failed to publish {} for instance {}: {:#}",
                event.event_type.as_str(),
                event.instance_id,
                e
            ),
        }
    });
}
