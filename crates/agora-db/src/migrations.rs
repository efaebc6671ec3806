use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            username        TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL,
            profile_image   TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per user, last write wins. No history.
        CREATE TABLE IF NOT EXISTS user_status (
            user_id     INTEGER PRIMARY KEY REFERENCES users(id),
            is_online   INTEGER NOT NULL DEFAULT 0,
            last_seen   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS notification_settings (
            user_id                 INTEGER PRIMARY KEY REFERENCES users(id),
            browser_notification    INTEGER NOT NULL DEFAULT 1,
            chat_notification       INTEGER NOT NULL DEFAULT 1,
            comment_notification    INTEGER NOT NULL DEFAULT 1
        );

        -- message holds the JSON payload delivered to clients; room_id is
        -- extracted from it at insert time so read-by-room filters on an
        -- indexed column instead of a JSON path.
        CREATE TABLE IF NOT EXISTS notifications (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            title       TEXT NOT NULL,
            message     TEXT NOT NULL,
            type        TEXT NOT NULL,
            room_id     INTEGER,
            read_status INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_unread
            ON notifications(user_id, read_status);

        CREATE INDEX IF NOT EXISTS idx_notifications_room
            ON notifications(user_id, type, room_id);

        -- Participant pair is stored normalized (user1_id < user2_id) so the
        -- UNIQUE constraint makes find-or-create race-free.
        CREATE TABLE IF NOT EXISTS chat_rooms (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user1_id    INTEGER NOT NULL REFERENCES users(id),
            user2_id    INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user1_id, user2_id)
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id     INTEGER NOT NULL REFERENCES chat_rooms(id),
            user_id     INTEGER NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_room
            ON chat_messages(room_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
