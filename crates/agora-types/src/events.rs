use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Control frames sent FROM client TO server over the WebSocket.
///
/// Field names are the wire contract — clients send exactly these shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authenticate the connection with a signed token
    Auth { token: String },

    /// Declare which chat room this connection currently has open.
    /// `roomId: null` (or omitted) clears it.
    ViewingRoom {
        #[serde(rename = "roomId", default)]
        room_id: Option<i64>,
    },
}

/// Events pushed FROM server TO clients over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Reply to a successful `auth` frame
    AuthSuccess,

    /// Reply to a failed `auth` frame — the connection stays open
    AuthError { message: String },

    /// A user's persisted online/offline state changed
    PresenceChanged {
        #[serde(rename = "userId")]
        user_id: i64,
        #[serde(rename = "isOnline")]
        is_online: bool,
    },

    /// A new notification was created for the receiving user
    Notification { notification: NotificationPush },

    /// A chat message was sent in a room the receiving user participates in.
    /// Delivered independently of the notification push; clients deduplicate
    /// by message id since a list refresh can reference the same message.
    ChatMessage {
        #[serde(rename = "conversationId")]
        conversation_id: i64,
        message: ChatMessagePush,
    },
}

/// Payload of a `notification` push. Mirrors the persisted payload so the
/// client can render and route without a follow-up fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPush {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub room_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub post_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub comment_id: Option<i64>,
}

/// The message body of a `chat_message` push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePush {
    pub id: i64,
    pub sender_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Notification category. Gates delivery through per-user preference flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Message,
    Comment,
    Other,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Comment => "comment",
            Self::Other => "other",
        }
    }

    /// Stored type strings outside the two known categories map to `Other`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "message" => Self::Message,
            "comment" => Self::Comment,
            _ => Self::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_frame_wire_shape() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"auth","token":"abc"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Auth { ref token } if token == "abc"));
    }

    #[test]
    fn viewing_room_accepts_null_and_missing() {
        let set: ClientFrame =
            serde_json::from_str(r#"{"type":"viewing_room","roomId":7}"#).unwrap();
        assert!(matches!(set, ClientFrame::ViewingRoom { room_id: Some(7) }));

        let cleared: ClientFrame =
            serde_json::from_str(r#"{"type":"viewing_room","roomId":null}"#).unwrap();
        assert!(matches!(cleared, ClientFrame::ViewingRoom { room_id: None }));

        let omitted: ClientFrame =
            serde_json::from_str(r#"{"type":"viewing_room"}"#).unwrap();
        assert!(matches!(omitted, ClientFrame::ViewingRoom { room_id: None }));
    }

    #[test]
    fn server_event_tags() {
        let json = serde_json::to_value(&ServerEvent::AuthSuccess).unwrap();
        assert_eq!(json, serde_json::json!({"type": "auth_success"}));

        let json = serde_json::to_value(&ServerEvent::PresenceChanged {
            user_id: 3,
            is_online: false,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "presence_changed", "userId": 3, "isOnline": false})
        );
    }

    #[test]
    fn notification_push_omits_absent_fields() {
        let push = NotificationPush {
            title: "New comment".into(),
            message: "someone commented".into(),
            kind: NotificationKind::Comment,
            room_id: None,
            sender_id: None,
            sender_name: None,
            post_id: Some(12),
            comment_id: Some(99),
        };
        let json = serde_json::to_value(&ServerEvent::Notification { notification: push }).unwrap();
        assert_eq!(json["type"], "notification");
        assert_eq!(json["notification"]["postId"], 12);
        assert_eq!(json["notification"]["type"], "comment");
        assert!(json["notification"].get("roomId").is_none());
    }
}
