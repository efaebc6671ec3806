use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::debug;

use agora_db::Database;
use agora_db::models::{NotificationRow, parse_timestamp};
use agora_gateway::registry::Registry;
use agora_types::api::{
    Claims, NotificationListResponse, NotificationView, OkResponse, SettingsResponse, SettingsView,
    UnreadCountResponse, UpdateSettingsRequest,
};
use agora_types::events::{NotificationKind, NotificationPush, ServerEvent};

use crate::error::{ApiError, run_blocking};
use crate::state::AppState;

// -- Notification pipeline --
//
// Both producers (chat message send, comment creation in the external CRUD
// layer) come through `notify`: preference check, then persist, then push.

/// Create and deliver a notification, honoring the recipient's preferences.
///
/// A disabled preference is a hard gate: the call returns `Ok(None)` having
/// created no row and pushed nothing — the event leaves no trace for the
/// recipient. Returns the new notification id otherwise.
pub async fn notify(
    db: &Database,
    registry: &Registry,
    recipient_id: i64,
    push: NotificationPush,
) -> anyhow::Result<Option<i64>> {
    let settings = {
        let db = db.clone();
        tokio::task::spawn_blocking(move || db.ensure_settings(recipient_id)).await??
    };

    let enabled = match push.kind {
        NotificationKind::Message => settings.chat_notification,
        NotificationKind::Comment => settings.comment_notification,
        NotificationKind::Other => true,
    };
    if !enabled {
        debug!(
            "notification for user {} suppressed by {} preference",
            recipient_id,
            push.kind.as_str()
        );
        return Ok(None);
    }

    let payload = payload_json(&push);
    let id = {
        let db = db.clone();
        let title = push.title.clone();
        let kind = push.kind;
        let room_id = push.room_id;
        tokio::task::spawn_blocking(move || {
            db.insert_notification(recipient_id, &title, &payload, kind.as_str(), room_id)
        })
        .await??
    };

    registry
        .send_to_user(recipient_id, &ServerEvent::Notification { notification: push })
        .await;

    Ok(Some(id))
}

/// The stored payload: everything the push carries except title/type, under
/// the field names clients already parse.
fn payload_json(push: &NotificationPush) -> String {
    let mut payload = serde_json::Map::new();
    payload.insert("message".into(), push.message.clone().into());
    if let Some(v) = push.room_id {
        payload.insert("roomId".into(), v.into());
    }
    if let Some(v) = push.sender_id {
        payload.insert("senderId".into(), v.into());
    }
    if let Some(v) = &push.sender_name {
        payload.insert("senderName".into(), v.clone().into());
    }
    if let Some(v) = push.post_id {
        payload.insert("postId".into(), v.into());
    }
    if let Some(v) = push.comment_id {
        payload.insert("commentId".into(), v.into());
    }
    serde_json::Value::Object(payload).to_string()
}

/// Payload-weighted unread sum: a payload carrying `messageCount` contributes
/// that value, anything else (including unparsable payloads) contributes 1.
/// This is the exposed contract — not a plain row count.
pub fn unread_count(db: &Database, user_id: i64) -> anyhow::Result<i64> {
    let payloads = db.unread_payloads(user_id)?;
    Ok(payloads.iter().map(|p| payload_weight(p)).sum())
}

fn payload_weight(payload: &str) -> i64 {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(v) => v
            .get("messageCount")
            .and_then(|c| c.as_i64())
            .filter(|&n| n != 0)
            .unwrap_or(1),
        Err(_) => 1,
    }
}

// -- REST handlers --

pub async fn get_unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let count = run_blocking(move || unread_count(&db, user_id)).await?;
    Ok(Json(UnreadCountResponse {
        success: true,
        unread_count: count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<NotificationListResponse>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let limit = query.limit.min(200);
    let rows = run_blocking(move || db.list_notifications(user_id, limit)).await?;
    Ok(Json(NotificationListResponse {
        success: true,
        notifications: rows.into_iter().map(view_of).collect(),
    }))
}

/// Message notifications that collapsed several messages into one payload get
/// their title rewritten to show the count.
fn view_of(row: NotificationRow) -> NotificationView {
    let mut title = row.title;
    if row.kind == "message" {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&row.message) {
            if let Some(count) = v.get("messageCount").and_then(|c| c.as_i64()) {
                if count > 1 {
                    title = format!("New messages ({count})");
                }
            }
        }
    }
    NotificationView {
        id: row.id,
        title,
        message: row.message,
        kind: row.kind,
        is_read: row.read_status,
        created_at: parse_timestamp(&row.created_at),
    }
}

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let row = run_blocking(move || db.ensure_settings(user_id)).await?;
    Ok(Json(SettingsResponse {
        success: true,
        message: None,
        settings: SettingsView {
            user_id: row.user_id,
            browser_notification: row.browser_notification,
            chat_notification: row.chat_notification,
            comment_notification: row.comment_notification,
        },
    }))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let row = run_blocking(move || {
        db.update_settings(user_id, req.chat_notification, req.comment_notification)
    })
    .await?;
    Ok(Json(SettingsResponse {
        success: true,
        message: Some("Notification settings saved.".to_string()),
        settings: SettingsView {
            user_id: row.user_id,
            browser_notification: row.browser_notification,
            chat_notification: row.chat_notification,
            comment_notification: row.comment_notification,
        },
    }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<OkResponse>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let affected = run_blocking(move || db.mark_notification_read(user_id, id)).await?;
    if affected == 0 {
        return Err(ApiError::NotFound("Notification not found.".to_string()));
    }
    Ok(Json(OkResponse::with_message("Notification marked as read.")))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<OkResponse>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    run_blocking(move || db.mark_all_notifications_read(user_id)).await?;
    Ok(Json(OkResponse::with_message(
        "All notifications marked as read.",
    )))
}

/// Invoked when the recipient opens a specific conversation: only that
/// room's message notifications clear.
pub async fn mark_room_read(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<OkResponse>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    run_blocking(move || db.mark_room_notifications_read(user_id, room_id)).await?;
    Ok(Json(OkResponse::with_message(
        "Chat room notifications marked as read.",
    )))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<OkResponse>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let affected = run_blocking(move || db.delete_notification(user_id, id)).await?;
    if affected == 0 {
        return Err(ApiError::NotFound("Notification not found.".to_string()));
    }
    Ok(Json(OkResponse::with_message("Notification deleted.")))
}

pub async fn clear_all(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<OkResponse>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;
    run_blocking(move || db.delete_all_notifications(user_id)).await?;
    Ok(Json(OkResponse::with_message("All notifications deleted.")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_db::Database;
    use agora_gateway::registry::Registry;

    fn message_push(room_id: i64, sender_id: i64, text: &str) -> NotificationPush {
        NotificationPush {
            title: "New message".to_string(),
            message: text.to_string(),
            kind: NotificationKind::Message,
            room_id: Some(room_id),
            sender_id: Some(sender_id),
            sender_name: Some("Sender".to_string()),
            post_id: None,
            comment_id: None,
        }
    }

    fn comment_push(post_id: i64, comment_id: i64) -> NotificationPush {
        NotificationPush {
            title: "New comment".to_string(),
            message: "Someone commented on your post.".to_string(),
            kind: NotificationKind::Comment,
            room_id: None,
            sender_id: None,
            sender_name: None,
            post_id: Some(post_id),
            comment_id: Some(comment_id),
        }
    }

    #[test]
    fn unread_count_is_payload_weighted() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("nora", "Nora", None).unwrap();

        db.insert_notification(user, "t", r#"{"messageCount":5,"roomId":1}"#, "message", Some(1))
            .unwrap();
        db.insert_notification(user, "t", r#"{"postId":2}"#, "comment", None)
            .unwrap();
        db.insert_notification(user, "t", "not json at all", "comment", None)
            .unwrap();

        // 5 (messageCount) + 1 (no count) + 1 (unparsable)
        assert_eq!(unread_count(&db, user).unwrap(), 7);
    }

    #[test]
    fn payload_weight_treats_zero_count_as_one() {
        assert_eq!(payload_weight(r#"{"messageCount":0}"#), 1);
        assert_eq!(payload_weight(r#"{"messageCount":3}"#), 3);
        assert_eq!(payload_weight(r#"{}"#), 1);
        assert_eq!(payload_weight("garbage"), 1);
    }

    #[tokio::test]
    async fn disabled_preference_leaves_no_trace() {
        let db = Database::open_in_memory().unwrap();
        let registry = Registry::new();
        let user = db.create_user("omar", "Omar", None).unwrap();
        db.update_settings(user, false, true).unwrap();

        let (conn, mut rx) = registry.register().await;
        registry.bind_identity(conn, user).await;

        let created = notify(&db, &registry, user, message_push(1, 2, "hi"))
            .await
            .unwrap();

        assert!(created.is_none());
        assert_eq!(unread_count(&db, user).unwrap(), 0);
        assert!(db.unread_payloads(user).unwrap().is_empty());
        assert!(rx.try_recv().is_err(), "no frame must be pushed");
    }

    #[tokio::test]
    async fn comment_notifications_respect_their_own_flag() {
        let db = Database::open_in_memory().unwrap();
        let registry = Registry::new();
        let author = db.create_user("pia", "Pia", None).unwrap();
        db.update_settings(author, true, false).unwrap();

        let (conn, mut rx) = registry.register().await;
        registry.bind_identity(conn, author).await;

        let created = notify(&db, &registry, author, comment_push(10, 44))
            .await
            .unwrap();
        assert!(created.is_none());
        assert_eq!(unread_count(&db, author).unwrap(), 0);
        assert!(rx.try_recv().is_err());

        // chat flag stayed on, so message notifications still flow
        let created = notify(&db, &registry, author, message_push(3, 9, "yo"))
            .await
            .unwrap();
        assert!(created.is_some());
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerEvent::Notification { .. })
        ));
    }

    #[tokio::test]
    async fn missing_settings_default_to_enabled() {
        let db = Database::open_in_memory().unwrap();
        let registry = Registry::new();
        let user = db.create_user("quinn", "Quinn", None).unwrap();

        let (conn, mut rx) = registry.register().await;
        registry.bind_identity(conn, user).await;

        let created = notify(&db, &registry, user, comment_push(1, 2)).await.unwrap();
        assert!(created.is_some());
        assert_eq!(unread_count(&db, user).unwrap(), 1);

        match rx.try_recv() {
            Ok(ServerEvent::Notification { notification }) => {
                assert_eq!(notification.kind, NotificationKind::Comment);
                assert_eq!(notification.post_id, Some(1));
            }
            other => panic!("expected notification frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stored_payload_carries_room_for_scoped_read() {
        let db = Database::open_in_memory().unwrap();
        let registry = Registry::new();
        let user = db.create_user("rhea", "Rhea", None).unwrap();

        notify(&db, &registry, user, message_push(7, 2, "one"))
            .await
            .unwrap();
        notify(&db, &registry, user, message_push(8, 2, "two"))
            .await
            .unwrap();

        assert_eq!(unread_count(&db, user).unwrap(), 2);
        db.mark_room_notifications_read(user, 7).unwrap();
        assert_eq!(unread_count(&db, user).unwrap(), 1);

        let payloads = db.unread_payloads(user).unwrap();
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].contains(r#""roomId":8"#));
    }

    #[test]
    fn message_titles_are_rewritten_for_collapsed_payloads() {
        let row = NotificationRow {
            id: 1,
            user_id: 1,
            title: "New message".to_string(),
            message: r#"{"messageCount":4,"roomId":2}"#.to_string(),
            kind: "message".to_string(),
            room_id: Some(2),
            read_status: false,
            created_at: "2026-08-07 10:00:00".to_string(),
        };
        assert_eq!(view_of(row).title, "New messages (4)");

        let single = NotificationRow {
            id: 2,
            user_id: 1,
            title: "New message".to_string(),
            message: r#"{"roomId":2}"#.to_string(),
            kind: "message".to_string(),
            room_id: Some(2),
            read_status: false,
            created_at: "2026-08-07 10:00:00".to_string(),
        };
        assert_eq!(view_of(single).title, "New message");
    }
}
