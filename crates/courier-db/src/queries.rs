use crate::Database;
use crate::models::{DialogRow, MessageRow, NotificationRow, UserRow};
use anyhow::{Result, anyhow};
use rusqlite::Connection;
use uuid::Uuid;

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, auth_token: &str) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, auth_token) VALUES (?1, ?2)",
                (username, auth_token),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    // -- Dialogs & messages --

    /// Fetches the dialog for an unordered pair, creating it on first use.
    pub fn get_or_create_dialog(&self, a: i64, b: i64) -> Result<DialogRow> {
        self.with_conn_mut(|conn| query_or_create_dialog(conn, a, b))
    }

    /// Stores a message, creating the pair's dialog in the same transaction
    /// when it does not exist yet.
    pub fn create_message(&self, sender_id: i64, opponent_id: i64, text: &str) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let dialog = query_or_create_dialog(&tx, sender_id, opponent_id)?;
            tx.execute(
                "INSERT INTO messages (dialog_id, sender_id, text) VALUES (?1, ?2, ?3)",
                rusqlite::params![dialog.id, sender_id, text],
            )?;
            let id = tx.last_insert_rowid();
            let row = query_message(&tx, id)?
                .ok_or_else(|| anyhow!("Message {} missing inside its own transaction", id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        recipient_id: i64,
        kind: &str,
        content: &str,
    ) -> Result<NotificationRow> {
        self.with_conn_mut(|conn| {
            let now = now_text();
            conn.execute(
                "INSERT INTO notifications (recipient_id, type, content, is_read, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                rusqlite::params![recipient_id, kind, content, now],
            )?;
            let id = conn.last_insert_rowid();
            query_notification(conn, id)?
                .ok_or_else(|| anyhow!("Notification {} missing after insert", id))
        })
    }

    /// Rewrites a notification's kind and content in place, bumping
    /// `updated_at` so the row stays the newest of its squash scope.
    pub fn update_notification_content(
        &self,
        id: i64,
        kind: &str,
        content: &str,
    ) -> Result<NotificationRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE notifications SET type = ?2, content = ?3, updated_at = ?4 WHERE id = ?1",
                rusqlite::params![id, kind, content, now_text()],
            )?;
            query_notification(conn, id)?
                .ok_or_else(|| anyhow!("Notification {} missing after update", id))
        })
    }

    /// The newest unread notification of either kind in a squash family,
    /// optionally narrowed to rows whose content carries a matching scope
    /// value, e.g. `("submission_id", 42)`.
    pub fn latest_unread_notification(
        &self,
        recipient_id: i64,
        kinds: [&str; 2],
        scope: Option<(&str, i64)>,
    ) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| match scope {
            Some((field, value)) => {
                let mut stmt = conn.prepare(
                    "SELECT id, recipient_id, type, content, is_read, created_at, updated_at
                     FROM notifications
                     WHERE recipient_id = ?1 AND is_read = 0 AND type IN (?2, ?3)
                       AND json_extract(content, ?4) = ?5
                     ORDER BY updated_at DESC, id DESC
                     LIMIT 1",
                )?;
                stmt.query_row(
                    rusqlite::params![recipient_id, kinds[0], kinds[1], format!("$.{field}"), value],
                    map_notification,
                )
                .optional()
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, recipient_id, type, content, is_read, created_at, updated_at
                     FROM notifications
                     WHERE recipient_id = ?1 AND is_read = 0 AND type IN (?2, ?3)
                     ORDER BY updated_at DESC, id DESC
                     LIMIT 1",
                )?;
                stmt.query_row(
                    rusqlite::params![recipient_id, kinds[0], kinds[1]],
                    map_notification,
                )
                .optional()
            }
        })
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| query_notification(conn, id))
    }

    pub fn mark_notification_read(&self, id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE notifications SET is_read = 1, updated_at = ?2 WHERE id = ?1",
                rusqlite::params![id, now_text()],
            )?;
            Ok(())
        })
    }

    pub fn unread_notifications_for(&self, recipient_id: i64) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recipient_id, type, content, is_read, created_at, updated_at
                 FROM notifications
                 WHERE recipient_id = ?1 AND is_read = 0
                 ORDER BY updated_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([recipient_id], map_notification)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_notifications_for(&self, recipient_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1",
                [recipient_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

/// Millisecond-precision timestamps; `datetime('now')` only resolves to
/// seconds, which is too coarse to order squash lookups within a burst.
fn now_text() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, auth_token, created_at FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                auth_token: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_or_create_dialog(conn: &Connection, a: i64, b: i64) -> Result<DialogRow> {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    if let Some(dialog) = query_dialog(conn, lo, hi)? {
        return Ok(dialog);
    }

    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO dialogs (token, user_a, user_b) VALUES (?1, ?2, ?3)",
        rusqlite::params![token, lo, hi],
    )?;
    query_dialog(conn, lo, hi)?
        .ok_or_else(|| anyhow!("Dialog for ({}, {}) missing after insert", lo, hi))
}

fn query_dialog(conn: &Connection, lo: i64, hi: i64) -> Result<Option<DialogRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, token, user_a, user_b, created_at FROM dialogs WHERE user_a = ?1 AND user_b = ?2",
    )?;

    let row = stmt
        .query_row([lo, hi], |row| {
            Ok(DialogRow {
                id: row.get(0)?,
                token: row.get(1)?,
                user_a: row.get(2)?,
                user_b: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, dialog_id, sender_id, text, created_at FROM messages WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                dialog_id: row.get(1)?,
                sender_id: row.get(2)?,
                text: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_notification(conn: &Connection, id: i64) -> Result<Option<NotificationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, recipient_id, type, content, is_read, created_at, updated_at
         FROM notifications WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], map_notification).optional()?;

    Ok(row)
}

fn map_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        kind: row.get(2)?,
        content: row.get(3)?,
        is_read: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
