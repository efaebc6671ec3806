use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension};

use crate::Database;
use crate::models::{
    MessageRow, MessageWithSenderRow, NotificationRow, PresenceRow, RoomListingRow, RoomRow,
    SettingsRow, UserRow, UserSearchRow,
};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        username: &str,
        name: &str,
        profile_image: Option<&str>,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, name, profile_image) VALUES (?1, ?2, ?3)",
                (username, name, profile_image),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Name/handle search for starting a conversation. Excludes the caller,
    /// online users first, capped at `limit`.
    pub fn search_users(
        &self,
        query: &str,
        exclude_user_id: i64,
        limit: u32,
    ) -> Result<Vec<UserSearchRow>> {
        let pattern = format!("%{}%", query);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, u.username, u.profile_image,
                        COALESCE(us.is_online, 0) AS is_online,
                        COALESCE(us.last_seen, u.created_at) AS last_seen
                 FROM users u
                 LEFT JOIN user_status us ON u.id = us.user_id
                 WHERE u.id != ?1 AND (u.name LIKE ?2 OR u.username LIKE ?2)
                 ORDER BY is_online DESC, u.name ASC
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map((exclude_user_id, &pattern, limit), |row| {
                    Ok(UserSearchRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        username: row.get(2)?,
                        profile_image: row.get(3)?,
                        is_online: row.get(4)?,
                        last_seen: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Presence --

    /// Upsert the presence record, last write wins. `last_seen` always moves
    /// to now, even when the flag is unchanged.
    pub fn upsert_presence(&self, user_id: i64, is_online: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO user_status (user_id, is_online, last_seen)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(user_id) DO UPDATE SET
                    is_online = excluded.is_online,
                    last_seen = datetime('now')",
                (user_id, is_online),
            )?;
            Ok(())
        })
    }

    pub fn get_presence(&self, user_id: i64) -> Result<Option<PresenceRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, is_online, last_seen FROM user_status WHERE user_id = ?1",
                    [user_id],
                    |row| {
                        Ok(PresenceRow {
                            user_id: row.get(0)?,
                            is_online: row.get(1)?,
                            last_seen: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Notification settings --

    /// Fetch the settings row, creating the all-enabled default on first use.
    pub fn ensure_settings(&self, user_id: i64) -> Result<SettingsRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO notification_settings (user_id) VALUES (?1)
                 ON CONFLICT(user_id) DO NOTHING",
                [user_id],
            )?;
            query_settings(conn, user_id)?.ok_or_else(|| anyhow!("settings row missing after insert"))
        })
    }

    /// Update the two caller-controlled flags. `browser_notification` is
    /// always stored enabled.
    pub fn update_settings(
        &self,
        user_id: i64,
        chat_notification: bool,
        comment_notification: bool,
    ) -> Result<SettingsRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO notification_settings
                    (user_id, browser_notification, chat_notification, comment_notification)
                 VALUES (?1, 1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                    chat_notification = excluded.chat_notification,
                    comment_notification = excluded.comment_notification",
                (user_id, chat_notification, comment_notification),
            )?;
            query_settings(conn, user_id)?.ok_or_else(|| anyhow!("settings row missing after upsert"))
        })
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        user_id: i64,
        title: &str,
        payload: &str,
        kind: &str,
        room_id: Option<i64>,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO notifications (user_id, title, message, type, room_id, read_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                (user_id, title, payload, kind, room_id),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Payloads of all unread notifications, for the weighted unread sum.
    pub fn unread_payloads(&self, user_id: i64) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message FROM notifications WHERE user_id = ?1 AND read_status = 0",
            )?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_notifications(&self, user_id: i64, limit: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, message, type, room_id, read_status, created_at
                 FROM notifications
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map((user_id, limit), |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        title: row.get(2)?,
                        message: row.get(3)?,
                        kind: row.get(4)?,
                        room_id: row.get(5)?,
                        read_status: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Owner-checked single read transition. Returns affected row count.
    pub fn mark_notification_read(&self, user_id: i64, id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET read_status = 1 WHERE id = ?1 AND user_id = ?2",
                (id, user_id),
            )?;
            Ok(n)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET read_status = 1 WHERE user_id = ?1 AND read_status = 0",
                [user_id],
            )?;
            Ok(n)
        })
    }

    /// Flip every unread message notification for one room. Same filter the
    /// original expressed as a JSON path; here `room_id` is a real column.
    pub fn mark_room_notifications_read(&self, user_id: i64, room_id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET read_status = 1
                 WHERE user_id = ?1 AND type = 'message' AND read_status = 0 AND room_id = ?2",
                (user_id, room_id),
            )?;
            Ok(n)
        })
    }

    pub fn delete_notification(&self, user_id: i64, id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                (id, user_id),
            )?;
            Ok(n)
        })
    }

    pub fn delete_all_notifications(&self, user_id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM notifications WHERE user_id = ?1", [user_id])?;
            Ok(n)
        })
    }

    // -- Chat rooms --

    pub fn get_room(&self, room_id: i64) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room_by_id(conn, room_id))
    }

    /// Atomic find-or-create for the unordered participant pair. The pair is
    /// stored normalized (lower id first) under a UNIQUE constraint, so two
    /// concurrent openers converge on the same row.
    pub fn get_or_create_room(&self, a: i64, b: i64) -> Result<RoomRow> {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        self.with_conn_mut(|conn| {
            if let Some(room) = query_room_by_pair(conn, a, b)? {
                return Ok(room);
            }
            conn.execute(
                "INSERT INTO chat_rooms (user1_id, user2_id) VALUES (?1, ?2)
                 ON CONFLICT(user1_id, user2_id) DO NOTHING",
                (lo, hi),
            )?;
            query_room_by_pair(conn, a, b)?.ok_or_else(|| anyhow!("room missing after insert"))
        })
    }

    /// Bump `updated_at`; drives room list ordering.
    pub fn touch_room(&self, room_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE chat_rooms SET updated_at = datetime('now') WHERE id = ?1",
                [room_id],
            )?;
            Ok(())
        })
    }

    /// Rooms the user participates in, most recently updated first, each with
    /// the other participant, their persisted presence and the latest message.
    pub fn list_rooms(&self, user_id: i64) -> Result<Vec<RoomListingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT cr.id,
                        u.id, u.name, u.username, u.profile_image,
                        COALESCE(us.is_online, 0),
                        COALESCE(us.last_seen, u.created_at),
                        lm.content, lm.created_at, lm.user_id
                 FROM chat_rooms cr
                 JOIN users u
                   ON u.id = CASE WHEN cr.user1_id = ?1 THEN cr.user2_id ELSE cr.user1_id END
                 LEFT JOIN user_status us ON us.user_id = u.id
                 LEFT JOIN chat_messages lm ON lm.id = (
                     SELECT id FROM chat_messages
                     WHERE room_id = cr.id
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1)
                 WHERE cr.user1_id = ?1 OR cr.user2_id = ?1
                 ORDER BY cr.updated_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(RoomListingRow {
                        room_id: row.get(0)?,
                        other_user_id: row.get(1)?,
                        other_user_name: row.get(2)?,
                        other_user_username: row.get(3)?,
                        other_user_profile: row.get(4)?,
                        other_user_online: row.get(5)?,
                        other_user_last_seen: row.get(6)?,
                        last_message: row.get(7)?,
                        last_message_time: row.get(8)?,
                        last_message_sender_id: row.get(9)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Chat messages --

    pub fn insert_message(&self, room_id: i64, user_id: i64, content: &str) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chat_messages (room_id, user_id, content) VALUES (?1, ?2, ?3)",
                (room_id, user_id, content),
            )?;
            let id = conn.last_insert_rowid();
            let row = conn.query_row(
                "SELECT id, room_id, user_id, content, created_at
                 FROM chat_messages WHERE id = ?1",
                [id],
                |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        room_id: row.get(1)?,
                        user_id: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )?;
            Ok(row)
        })
    }

    /// Full history for a room, oldest first, with sender identity joined in.
    pub fn room_messages(&self, room_id: i64) -> Result<Vec<MessageWithSenderRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT cm.id, cm.content, cm.user_id, u.name, u.username, cm.created_at
                 FROM chat_messages cm
                 JOIN users u ON cm.user_id = u.id
                 WHERE cm.room_id = ?1
                 ORDER BY cm.created_at ASC, cm.id ASC",
            )?;

            let rows = stmt
                .query_map([room_id], |row| {
                    Ok(MessageWithSenderRow {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        sender_id: row.get(2)?,
                        sender_name: row.get(3)?,
                        sender_username: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            "SELECT id, username, name, profile_image, created_at FROM users WHERE id = ?1",
            [id],
            |row| {
                Ok(UserRow {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    name: row.get(2)?,
                    profile_image: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn query_settings(conn: &Connection, user_id: i64) -> Result<Option<SettingsRow>> {
    let row = conn
        .query_row(
            "SELECT user_id, browser_notification, chat_notification, comment_notification
             FROM notification_settings WHERE user_id = ?1",
            [user_id],
            |row| {
                Ok(SettingsRow {
                    user_id: row.get(0)?,
                    browser_notification: row.get(1)?,
                    chat_notification: row.get(2)?,
                    comment_notification: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn query_room_by_id(conn: &Connection, room_id: i64) -> Result<Option<RoomRow>> {
    let row = conn
        .query_row(
            "SELECT id, user1_id, user2_id, created_at, updated_at
             FROM chat_rooms WHERE id = ?1",
            [room_id],
            map_room_row,
        )
        .optional()?;
    Ok(row)
}

/// Lookup accepts both orderings; legacy rows may predate normalization.
fn query_room_by_pair(conn: &Connection, a: i64, b: i64) -> Result<Option<RoomRow>> {
    let row = conn
        .query_row(
            "SELECT id, user1_id, user2_id, created_at, updated_at
             FROM chat_rooms
             WHERE (user1_id = ?1 AND user2_id = ?2) OR (user1_id = ?2 AND user2_id = ?1)",
            (a, b),
            map_room_row,
        )
        .optional()?;
    Ok(row)
}

fn map_room_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        user1_id: row.get(1)?,
        user2_id: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn seed_user(db: &Database, handle: &str) -> i64 {
        db.create_user(handle, handle, None).unwrap()
    }

    #[test]
    fn room_creation_is_idempotent_across_orderings() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let first = db.get_or_create_room(alice, bob).unwrap();
        let second = db.get_or_create_room(bob, alice).unwrap();
        assert_eq!(first.id, second.id);

        // normalized storage: lower id first
        assert!(first.user1_id < first.user2_id);
    }

    #[test]
    fn mark_room_read_only_touches_matching_room() {
        let db = Database::open_in_memory().unwrap();
        let carol = seed_user(&db, "carol");

        db.insert_notification(carol, "New message", r#"{"roomId":1}"#, "message", Some(1))
            .unwrap();
        db.insert_notification(carol, "New message", r#"{"roomId":2}"#, "message", Some(2))
            .unwrap();
        db.insert_notification(carol, "New comment", r#"{"postId":9}"#, "comment", None)
            .unwrap();

        let flipped = db.mark_room_notifications_read(carol, 1).unwrap();
        assert_eq!(flipped, 1);

        let unread = db.unread_payloads(carol).unwrap();
        assert_eq!(unread.len(), 2);
        assert!(unread.iter().all(|p| !p.contains(r#""roomId":1"#)));
    }

    #[test]
    fn read_transitions_are_owner_checked() {
        let db = Database::open_in_memory().unwrap();
        let dan = seed_user(&db, "dan");
        let eve = seed_user(&db, "eve");

        let id = db
            .insert_notification(dan, "New comment", "{}", "comment", None)
            .unwrap();

        assert_eq!(db.mark_notification_read(eve, id).unwrap(), 0);
        assert_eq!(db.delete_notification(eve, id).unwrap(), 0);
        assert_eq!(db.mark_notification_read(dan, id).unwrap(), 1);
        assert_eq!(db.delete_notification(dan, id).unwrap(), 1);
    }

    #[test]
    fn settings_default_to_all_enabled() {
        let db = Database::open_in_memory().unwrap();
        let fay = seed_user(&db, "fay");

        let settings = db.ensure_settings(fay).unwrap();
        assert!(settings.browser_notification);
        assert!(settings.chat_notification);
        assert!(settings.comment_notification);

        let updated = db.update_settings(fay, false, true).unwrap();
        assert!(!updated.chat_notification);
        assert!(updated.comment_notification);
        // browser flag is not caller-controlled
        assert!(updated.browser_notification);
    }

    #[test]
    fn presence_upsert_is_last_write_wins() {
        let db = Database::open_in_memory().unwrap();
        let gil = seed_user(&db, "gil");

        assert!(db.get_presence(gil).unwrap().is_none());

        db.upsert_presence(gil, true).unwrap();
        assert!(db.get_presence(gil).unwrap().unwrap().is_online);

        db.upsert_presence(gil, false).unwrap();
        assert!(!db.get_presence(gil).unwrap().unwrap().is_online);
    }

    #[test]
    fn room_listing_carries_other_participant_and_last_message() {
        let db = Database::open_in_memory().unwrap();
        let hana = seed_user(&db, "hana");
        let ivan = seed_user(&db, "ivan");

        let room = db.get_or_create_room(hana, ivan).unwrap();
        db.insert_message(room.id, ivan, "first").unwrap();
        db.insert_message(room.id, ivan, "second").unwrap();

        let rooms = db.list_rooms(hana).unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].other_user_id, ivan);
        assert_eq!(rooms[0].last_message.as_deref(), Some("second"));
        assert_eq!(rooms[0].last_message_sender_id, Some(ivan));

        // the other side sees hana
        let rooms = db.list_rooms(ivan).unwrap();
        assert_eq!(rooms[0].other_user_id, hana);
    }

    #[test]
    fn history_is_oldest_first_with_sender_join() {
        let db = Database::open_in_memory().unwrap();
        let june = seed_user(&db, "june");
        let kent = seed_user(&db, "kent");

        let room = db.get_or_create_room(june, kent).unwrap();
        db.insert_message(room.id, june, "hello").unwrap();
        db.insert_message(room.id, kent, "hi back").unwrap();

        let history = db.room_messages(room.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[0].sender_username, "june");
        assert_eq!(history[1].sender_id, kent);
    }
}
