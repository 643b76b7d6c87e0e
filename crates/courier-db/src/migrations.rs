use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            auth_token  TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS dialogs (
            id          INTEGER PRIMARY KEY,
            token       TEXT NOT NULL UNIQUE,
            user_a      INTEGER NOT NULL REFERENCES users(id),
            user_b      INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_a, user_b),
            CHECK(user_a < user_b)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY,
            dialog_id   INTEGER NOT NULL REFERENCES dialogs(id),
            sender_id   INTEGER NOT NULL REFERENCES users(id),
            text        TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_dialog
            ON messages(dialog_id, created_at);

        CREATE TABLE IF NOT EXISTS notifications (
            id            INTEGER PRIMARY KEY,
            recipient_id  INTEGER NOT NULL REFERENCES users(id),
            type          TEXT NOT NULL,
            content       TEXT NOT NULL,
            is_read       INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_unread
            ON notifications(recipient_id, is_read, updated_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
