use serde::{Deserialize, Serialize};

use crate::UserId;

/// In-band authentication for a chat socket. The socket is registered at
/// connect time but stays unvalidated until this frame carries the owner's
/// current token.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticateFrame {
    pub user_id: UserId,
    pub opponent_id: UserId,
    pub auth_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessageFrame {
    pub user_id: UserId,
    pub opponent_id: UserId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conversation_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IsTypingFrame {
    pub user_id: UserId,
    pub opponent_id: UserId,
    #[serde(default)]
    pub conversation_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchTokenFrame {
    pub user_id: UserId,
    pub opponent_id: UserId,
}

/// In-band authentication for a notification socket.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyAuthFrame {
    pub user_id: UserId,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadNotificationFrame {
    pub user_id: UserId,
    pub token: String,
    pub notification_id: i64,
}

/// Error families surfaced to clients. The wire value is the family name
/// in caps, e.g. `NOT_FOUND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Authorization,
    Validation,
    Warning,
}

/// Everything the server pushes to a socket. Clients dispatch on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "OK")]
    Ok {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_token: Option<String>,
    },
    #[serde(rename = "error")]
    Error { error_type: ErrorKind, message: String },
    #[serde(rename = "online-check")]
    OnlineCheck { is_online: bool },
    #[serde(rename = "opponent-typing")]
    OpponentTyping,
    #[serde(rename = "received-message")]
    ReceivedMessage {
        id: i64,
        sender_name: String,
        message: String,
        created: String,
    },
    #[serde(rename = "NOTIFICATION")]
    Notification { notification: serde_json::Value },
}

impl ServerFrame {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Ok {
            message: message.into(),
            conversation_token: None,
        }
    }

    pub fn ok_with_token(message: impl Into<String>, token: impl Into<String>) -> Self {
        Self::Ok {
            message: message.into(),
            conversation_token: Some(token.into()),
        }
    }

    pub fn error(error_type: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            error_type,
            message: message.into(),
        }
    }
}
