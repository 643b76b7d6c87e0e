use thiserror::Error;

use courier_db::Database;
use courier_db::models::UserRow;
use courier_types::UserId;
use courier_types::frames::ErrorKind;

/// Why a (sender, opponent) pair could not be resolved to two real users.
#[derive(Debug, Error)]
pub enum ParticipantError {
    #[error("User {0} does not exist!")]
    NotFound(UserId),
    #[error("You cannot open a chat with yourself!")]
    SelfPairing,
    #[error("Participant lookup failed: {0}")]
    Store(String),
}

impl ParticipantError {
    /// Error family shown to the client. Store failures hide behind
    /// NOT_FOUND; the detail stays in the logs.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::Store(_) => ErrorKind::NotFound,
            Self::SelfPairing => ErrorKind::Validation,
        }
    }
}

pub fn fetch_participants(
    db: &Database,
    owner_id: UserId,
    opponent_id: UserId,
) -> Result<(UserRow, UserRow), ParticipantError> {
    if owner_id == opponent_id {
        return Err(ParticipantError::SelfPairing);
    }
    let owner = db
        .get_user_by_id(owner_id)
        .map_err(|e| ParticipantError::Store(e.to_string()))?
        .ok_or(ParticipantError::NotFound(owner_id))?;
    let opponent = db
        .get_user_by_id(opponent_id)
        .map_err(|e| ParticipantError::Store(e.to_string()))?
        .ok_or(ParticipantError::NotFound(opponent_id))?;
    Ok((owner, opponent))
}
