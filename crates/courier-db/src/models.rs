//! Row types mapping directly to SQLite rows, kept separate from the
//! wire models in courier-types.

#[derive(Debug)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub auth_token: String,
    pub created_at: String,
}

pub struct DialogRow {
    pub id: i64,
    pub token: String,
    pub user_a: i64,
    pub user_b: i64,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub dialog_id: i64,
    pub sender_id: i64,
    pub text: String,
    pub created_at: String,
}

pub struct NotificationRow {
    pub id: i64,
    pub recipient_id: i64,
    pub kind: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
    pub updated_at: String,
}
