use anyhow::Result;
use tracing::info;

use agora_db::Database;
use agora_types::events::ServerEvent;

use crate::registry::Registry;

/// Upsert the persisted presence record and tell every connected client.
///
/// The broadcast goes to all authenticated connections, not just contacts;
/// clients filter by relevance. Called from the status endpoint and from
/// connection teardown (offline, last connection only).
pub async fn set_online(
    db: &Database,
    registry: &Registry,
    user_id: i64,
    is_online: bool,
) -> Result<()> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || db.upsert_presence(user_id, is_online)).await??;

    info!(
        "user {} is now {}",
        user_id,
        if is_online { "online" } else { "offline" }
    );

    registry
        .broadcast(&ServerEvent::PresenceChanged { user_id, is_online }, None)
        .await;

    Ok(())
}
