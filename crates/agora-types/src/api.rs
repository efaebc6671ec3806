use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// -- JWT Claims --

/// JWT claims shared across agora-api (REST middleware) and agora-gateway
/// (WebSocket `auth` frame). Canonical definition lives here in agora-types
/// to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Requests --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoomRequest {
    #[serde(rename = "otherUserId")]
    pub other_user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(rename = "roomId")]
    pub room_id: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusUpdateRequest {
    #[serde(rename = "isOnline")]
    pub is_online: bool,
}

/// Preference flags historically arrive as `true`, `1` or `"1"` depending on
/// the caller; `flexible_bool` normalizes them once, at the boundary.
#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    #[serde(deserialize_with = "flexible_bool")]
    pub chat_notification: bool,
    #[serde(deserialize_with = "flexible_bool")]
    pub comment_notification: bool,
}

pub fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64() == Some(1),
        serde_json::Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

// -- Responses --
//
// Every REST response carries the uniform `{success, message?, ...}` envelope.

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OkResponse {
    pub fn new() -> Self {
        Self { success: true, message: None }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self { success: true, message: Some(message.into()) }
    }
}

impl Default for OkResponse {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub success: bool,
    #[serde(rename = "unreadCount")]
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub success: bool,
    pub notifications: Vec<NotificationView>,
}

/// One row of the notification list. `kind` is the raw stored type string so
/// unknown categories survive the round trip.
#[derive(Debug, Serialize)]
pub struct NotificationView {
    pub id: i64,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub settings: SettingsView,
}

#[derive(Debug, Serialize)]
pub struct SettingsView {
    pub user_id: i64,
    pub browser_notification: bool,
    pub chat_notification: bool,
    pub comment_notification: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub users: Vec<UserSummary>,
}

/// A user as seen in search results. `username` serializes as `user_id`
/// (the public handle) for compatibility with existing clients; `id` is the
/// stable numeric identity.
#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
    #[serde(rename = "user_id")]
    pub username: String,
    pub profile_image: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RoomListResponse {
    pub success: bool,
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Serialize)]
pub struct RoomSummary {
    pub room_id: i64,
    pub other_user_id: i64,
    pub other_user_name: String,
    #[serde(rename = "other_user_user_id")]
    pub other_user_username: String,
    pub other_user_profile: Option<String>,
    pub other_user_online: bool,
    pub other_user_last_seen: DateTime<Utc>,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_message_sender_id: Option<i64>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub success: bool,
    #[serde(rename = "roomId")]
    pub room_id: i64,
    #[serde(rename = "otherUser")]
    pub other_user: UserRef,
}

#[derive(Debug, Serialize)]
pub struct UserRef {
    pub id: i64,
    pub name: String,
    #[serde(rename = "user_id")]
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct MessageHistoryResponse {
    pub success: bool,
    pub messages: Vec<ChatMessageView>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageView {
    pub id: i64,
    #[serde(rename = "message")]
    pub content: String,
    pub sender_id: i64,
    pub sender_name: String,
    #[serde(rename = "sender_user_id")]
    pub sender_username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    #[serde(rename = "messageId")]
    pub message_id: i64,
}
