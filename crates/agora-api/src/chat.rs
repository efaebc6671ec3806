use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::warn;

use agora_db::Database;
use agora_db::models::{MessageRow, parse_timestamp};
use agora_gateway::{presence, registry::Registry};
use agora_types::api::{
    ChatMessageView, Claims, CreateRoomRequest, CreateRoomResponse, MessageHistoryResponse,
    OkResponse, RoomListResponse, RoomSummary, SearchResponse, SendMessageRequest,
    SendMessageResponse, StatusUpdateRequest, UserRef, UserSummary,
};
use agora_types::events::{ChatMessagePush, NotificationKind, NotificationPush, ServerEvent};

use crate::error::{ApiError, run_blocking};
use crate::notifications;
use crate::state::AppState;

/// Preview length for message notification payloads.
const PREVIEW_CHARS: usize = 100;

// -- Chat relay core --

/// The message-send pipeline: validate, persist, then fan out.
///
/// The recipient gets the `chat_message` push unconditionally; the
/// notification is suppressed while any of their connections is viewing this
/// room (their unread state for the room is cleared instead, so nothing goes
/// stale). Failures on the fan-out side never fail the send.
pub async fn send_room_message(
    db: &Database,
    registry: &Registry,
    sender_id: i64,
    room_id: i64,
    content: &str,
) -> Result<MessageRow, ApiError> {
    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::Validation("Message content is empty.".to_string()));
    }

    let (room, sender) = {
        let db = db.clone();
        run_blocking(move || Ok((db.get_room(room_id)?, db.get_user_by_id(sender_id)?))).await?
    };
    let room = room.ok_or_else(|| ApiError::NotFound("Chat room not found.".to_string()))?;
    let sender =
        sender.ok_or_else(|| ApiError::NotFound("User not found.".to_string()))?;
    if !room.has_participant(sender_id) {
        return Err(ApiError::Forbidden(
            "You cannot access this chat room.".to_string(),
        ));
    }

    let message = {
        let db = db.clone();
        let content = content.clone();
        run_blocking(move || {
            let row = db.insert_message(room_id, sender_id, &content)?;
            db.touch_room(room_id)?;
            Ok(row)
        })
        .await?
    };

    let recipient = room.other_participant(sender_id);

    if registry.is_viewing(recipient, room_id).await {
        // Recipient is looking at this room: no toast, but their unread
        // notifications for the room clear so state stays consistent.
        let db = db.clone();
        let cleared =
            tokio::task::spawn_blocking(move || db.mark_room_notifications_read(recipient, room_id))
                .await
                .map_err(anyhow::Error::from)
                .and_then(|r| r);
        if let Err(e) = cleared {
            warn!(
                "failed to clear room {} notifications for user {}: {:#}",
                room_id, recipient, e
            );
        }
    } else {
        let push = NotificationPush {
            title: "New message".to_string(),
            message: preview(&content),
            kind: NotificationKind::Message,
            room_id: Some(room_id),
            sender_id: Some(sender_id),
            sender_name: Some(sender.name.clone()),
            post_id: None,
            comment_id: None,
        };
        if let Err(e) = notifications::notify(db, registry, recipient, push).await {
            warn!(
                "notification push after message send failed for user {}: {:#}",
                recipient, e
            );
        }
    }

    // Direct push regardless of suppression, so an open-but-not-viewing
    // client updates live. Clients deduplicate by message id.
    registry
        .send_to_user(
            recipient,
            &ServerEvent::ChatMessage {
                conversation_id: room_id,
                message: ChatMessagePush {
                    id: message.id,
                    sender_id,
                    content: message.content.clone(),
                    created_at: parse_timestamp(&message.created_at),
                },
            },
        )
        .await;

    Ok(message)
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        content.to_string()
    } else {
        let mut cut: String = content.chars().take(PREVIEW_CHARS).collect();
        cut.push('…');
        cut
    }
}

// -- REST handlers --

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: Option<String>,
}

pub async fn search_users(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = params.query.unwrap_or_default().trim().to_string();
    if query.chars().count() < 2 {
        return Ok(Json(SearchResponse {
            success: true,
            users: vec![],
        }));
    }

    let db = state.db.clone();
    let caller = claims.sub;
    let rows = run_blocking(move || db.search_users(&query, caller, 20)).await?;

    Ok(Json(SearchResponse {
        success: true,
        users: rows
            .into_iter()
            .map(|row| UserSummary {
                id: row.id,
                name: row.name,
                username: row.username,
                profile_image: row.profile_image,
                is_online: row.is_online,
                last_seen: parse_timestamp(&row.last_seen),
            })
            .collect(),
    }))
}

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<RoomListResponse>, ApiError> {
    let db = state.db.clone();
    let caller = claims.sub;
    let rows = run_blocking(move || db.list_rooms(caller)).await?;

    Ok(Json(RoomListResponse {
        success: true,
        rooms: rows
            .into_iter()
            .map(|row| RoomSummary {
                room_id: row.room_id,
                other_user_id: row.other_user_id,
                other_user_name: row.other_user_name,
                other_user_username: row.other_user_username,
                other_user_profile: row.other_user_profile,
                other_user_online: row.other_user_online,
                other_user_last_seen: parse_timestamp(&row.other_user_last_seen),
                last_message: row.last_message,
                last_message_time: row.last_message_time.as_deref().map(parse_timestamp),
                last_message_sender_id: row.last_message_sender_id,
                unread_count: 0,
            })
            .collect(),
    }))
}

pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, ApiError> {
    if req.other_user_id == claims.sub {
        return Err(ApiError::Validation(
            "You cannot chat with yourself.".to_string(),
        ));
    }

    let other = {
        let db = state.db.clone();
        let other_id = req.other_user_id;
        run_blocking(move || db.get_user_by_id(other_id)).await?
    }
    .ok_or_else(|| ApiError::NotFound("User not found.".to_string()))?;

    let room = {
        let db = state.db.clone();
        let caller = claims.sub;
        let other_id = other.id;
        run_blocking(move || db.get_or_create_room(caller, other_id)).await?
    };

    Ok(Json(CreateRoomResponse {
        success: true,
        room_id: room.id,
        other_user: UserRef {
            id: other.id,
            name: other.name,
            username: other.username,
        },
    }))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageHistoryResponse>, ApiError> {
    let room = {
        let db = state.db.clone();
        run_blocking(move || db.get_room(room_id)).await?
    }
    .ok_or_else(|| ApiError::NotFound("Chat room not found.".to_string()))?;
    if !room.has_participant(claims.sub) {
        return Err(ApiError::Forbidden(
            "You cannot access this chat room.".to_string(),
        ));
    }

    let rows = {
        let db = state.db.clone();
        run_blocking(move || db.room_messages(room_id)).await?
    };

    Ok(Json(MessageHistoryResponse {
        success: true,
        messages: rows
            .into_iter()
            .map(|row| ChatMessageView {
                id: row.id,
                content: row.content,
                sender_id: row.sender_id,
                sender_name: row.sender_name,
                sender_username: row.sender_username,
                created_at: parse_timestamp(&row.created_at),
            })
            .collect(),
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let message = send_room_message(
        &state.db,
        &state.registry,
        claims.sub,
        req.room_id,
        &req.message,
    )
    .await?;

    Ok(Json(SendMessageResponse {
        success: true,
        message_id: message.id,
    }))
}

/// Explicit online/offline status change from the client. The other half of
/// presence (offline on last disconnect) lives in the gateway teardown.
pub async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    presence::set_online(&state.db, &state.registry, claims.sub, req.is_online).await?;
    Ok(Json(OkResponse::new()))
}
