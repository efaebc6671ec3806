/// Database row types — these map directly to SQLite rows.
/// Distinct from agora-types API models to keep the DB layer independent.
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub profile_image: Option<String>,
    pub created_at: String,
}

pub struct PresenceRow {
    pub user_id: i64,
    pub is_online: bool,
    pub last_seen: String,
}

pub struct SettingsRow {
    pub user_id: i64,
    pub browser_notification: bool,
    pub chat_notification: bool,
    pub comment_notification: bool,
}

pub struct NotificationRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    /// JSON payload, stored verbatim as handed to the client
    pub message: String,
    pub kind: String,
    pub room_id: Option<i64>,
    pub read_status: bool,
    pub created_at: String,
}

pub struct RoomRow {
    pub id: i64,
    pub user1_id: i64,
    pub user2_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl RoomRow {
    pub fn has_participant(&self, user_id: i64) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The participant that is not `user_id`. Caller must have checked
    /// membership first.
    pub fn other_participant(&self, user_id: i64) -> i64 {
        if self.user1_id == user_id {
            self.user2_id
        } else {
            self.user1_id
        }
    }
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: i64,
    pub room_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: String,
}

/// A message joined with its sender for history responses.
pub struct MessageWithSenderRow {
    pub id: i64,
    pub content: String,
    pub sender_id: i64,
    pub sender_name: String,
    pub sender_username: String,
    pub created_at: String,
}

/// One entry of a user's room listing: the other participant, their
/// persisted presence, and the latest message if any.
pub struct RoomListingRow {
    pub room_id: i64,
    pub other_user_id: i64,
    pub other_user_name: String,
    pub other_user_username: String,
    pub other_user_profile: Option<String>,
    pub other_user_online: bool,
    pub other_user_last_seen: String,
    pub last_message: Option<String>,
    pub last_message_time: Option<String>,
    pub last_message_sender_id: Option<i64>,
}

pub struct UserSearchRow {
    pub id: i64,
    pub name: String,
    pub username: String,
    pub profile_image: Option<String>,
    pub is_online: bool,
    pub last_seen: String,
}

/// SQLite stores timestamps as `YYYY-MM-DD HH:MM:SS` (UTC) without a
/// timezone marker. Accept RFC 3339 too for rows written by other tools.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", s, e);
            DateTime::default()
        })
}
