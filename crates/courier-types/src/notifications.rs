//! Notification records and their content shapes.
//!
//! Every notification kind carries an exact set of content keys. The sum
//! type below makes any other shape unrepresentable in memory; rows loaded
//! from the store go through [`NotificationContent::from_stored`], which
//! rejects unknown kinds, missing keys and extra keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::UserId;

/// Wire tags for every notification kind, as stored in the `type` column
/// and echoed inside `NOTIFICATION` pushes.
pub mod kinds {
    pub const RECEIVE_FOLLOW: &str = "receive_follow";
    pub const RECEIVE_FOLLOW_SQUASHED: &str = "receive_follow_squashed";
    pub const RECEIVE_SUBMISSION_UPVOTE: &str = "receive_submission_upvote";
    pub const RECEIVE_SUBMISSION_UPVOTE_SQUASHED: &str = "receive_submission_upvote_squashed";
    pub const RECEIVE_NW_ITEM_LIKE: &str = "receive_nw_item_like";
    pub const RECEIVE_NW_ITEM_LIKE_SQUASHED: &str = "receive_nw_item_like_squashed";
    pub const RECEIVE_NW_ITEM_COMMENT: &str = "receive_nw_item_comment";
    pub const RECEIVE_NW_ITEM_COMMENT_SQUASHED: &str = "receive_nw_item_comment_squashed";
    pub const RECEIVE_NW_ITEM_COMMENT_REPLY: &str = "receive_nw_item_comment_reply";
    pub const RECEIVE_SUBMISSION_COMMENT: &str = "receive_submission_comment";
    pub const RECEIVE_SUBMISSION_COMMENT_REPLY: &str = "receive_submission_comment_reply";
    pub const RECEIVE_CHALLENGE_COMMENT_REPLY: &str = "receive_challenge_comment_reply";
    pub const NEW_CHALLENGE: &str = "new_challenge";
    pub const CHALLENGE_COMPLETED: &str = "challenge_completed";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FollowerEntry {
    pub follower_id: UserId,
    pub follower_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LikerEntry {
    pub liker_id: UserId,
    pub liker_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommenterEntry {
    pub commenter_id: UserId,
    pub commenter_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FollowSquashedContent {
    pub followers: Vec<FollowerEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmissionUpvoteContent {
    pub submission_id: i64,
    pub challenge_id: i64,
    pub challenge_name: String,
    pub liker_id: UserId,
    pub liker_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmissionUpvoteSquashedContent {
    pub submission_id: i64,
    pub challenge_id: i64,
    pub challenge_name: String,
    pub likers: Vec<LikerEntry>,
}

/// `nw_item_content` embeds a snapshot of the newsfeed item itself, whose
/// shape varies by item kind. It is carried opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NwItemLikeContent {
    pub nw_item_id: i64,
    pub nw_item_type: String,
    pub nw_item_content: Value,
    pub liker_id: UserId,
    pub liker_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NwItemLikeSquashedContent {
    pub nw_item_id: i64,
    pub nw_item_type: String,
    pub nw_item_content: Value,
    pub likers: Vec<LikerEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NwItemCommentContent {
    pub nw_item_id: i64,
    pub nw_item_type: String,
    pub nw_item_content: Value,
    pub commenter_id: UserId,
    pub commenter_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NwItemCommentSquashedContent {
    pub nw_item_id: i64,
    pub nw_item_type: String,
    pub nw_item_content: Value,
    pub commenters: Vec<CommenterEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NwCommentReplyContent {
    pub nw_comment_id: i64,
    pub commenter_id: UserId,
    pub commenter_name: String,
    pub comment_content: String,
}

/// Shared by `receive_submission_comment` and its reply counterpart, which
/// carry identical keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmissionCommentContent {
    pub submission_id: i64,
    pub challenge_id: i64,
    pub challenge_name: String,
    pub comment_id: i64,
    pub comment_content: String,
    pub commenter_id: UserId,
    pub commenter_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChallengeCommentReplyContent {
    pub challenge_id: i64,
    pub challenge_name: String,
    pub comment_id: i64,
    pub comment_content: String,
    pub commenter_id: UserId,
    pub commenter_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewChallengeContent {
    pub challenge_id: i64,
    pub challenge_name: String,
    pub challenge_subcategory_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChallengeCompletedContent {
    pub challenge_id: i64,
    pub challenge_name: String,
    pub submission_id: i64,
    pub score: i64,
}

/// One notification kind plus its content, as a closed sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content")]
pub enum NotificationContent {
    #[serde(rename = "receive_follow")]
    ReceiveFollow(FollowerEntry),
    #[serde(rename = "receive_follow_squashed")]
    ReceiveFollowSquashed(FollowSquashedContent),
    #[serde(rename = "receive_submission_upvote")]
    ReceiveSubmissionUpvote(SubmissionUpvoteContent),
    #[serde(rename = "receive_submission_upvote_squashed")]
    ReceiveSubmissionUpvoteSquashed(SubmissionUpvoteSquashedContent),
    #[serde(rename = "receive_nw_item_like")]
    ReceiveNwItemLike(NwItemLikeContent),
    #[serde(rename = "receive_nw_item_like_squashed")]
    ReceiveNwItemLikeSquashed(NwItemLikeSquashedContent),
    #[serde(rename = "receive_nw_item_comment")]
    ReceiveNwItemComment(NwItemCommentContent),
    #[serde(rename = "receive_nw_item_comment_squashed")]
    ReceiveNwItemCommentSquashed(NwItemCommentSquashedContent),
    #[serde(rename = "receive_nw_item_comment_reply")]
    ReceiveNwItemCommentReply(NwCommentReplyContent),
    #[serde(rename = "receive_submission_comment")]
    ReceiveSubmissionComment(SubmissionCommentContent),
    #[serde(rename = "receive_submission_comment_reply")]
    ReceiveSubmissionCommentReply(SubmissionCommentContent),
    #[serde(rename = "receive_challenge_comment_reply")]
    ReceiveChallengeCommentReply(ChallengeCommentReplyContent),
    #[serde(rename = "new_challenge")]
    NewChallenge(NewChallengeContent),
    #[serde(rename = "challenge_completed")]
    ChallengeCompleted(ChallengeCompletedContent),
}

/// A stored row whose content does not decode. Raised at the persistence
/// boundary and never past it.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("notification {kind:?} content is not valid JSON: {source}")]
    Malformed {
        kind: String,
        source: serde_json::Error,
    },
    #[error("notification {kind:?} content has the wrong shape: {source}")]
    Shape {
        kind: String,
        source: serde_json::Error,
    },
}

impl NotificationContent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReceiveFollow(_) => kinds::RECEIVE_FOLLOW,
            Self::ReceiveFollowSquashed(_) => kinds::RECEIVE_FOLLOW_SQUASHED,
            Self::ReceiveSubmissionUpvote(_) => kinds::RECEIVE_SUBMISSION_UPVOTE,
            Self::ReceiveSubmissionUpvoteSquashed(_) => kinds::RECEIVE_SUBMISSION_UPVOTE_SQUASHED,
            Self::ReceiveNwItemLike(_) => kinds::RECEIVE_NW_ITEM_LIKE,
            Self::ReceiveNwItemLikeSquashed(_) => kinds::RECEIVE_NW_ITEM_LIKE_SQUASHED,
            Self::ReceiveNwItemComment(_) => kinds::RECEIVE_NW_ITEM_COMMENT,
            Self::ReceiveNwItemCommentSquashed(_) => kinds::RECEIVE_NW_ITEM_COMMENT_SQUASHED,
            Self::ReceiveNwItemCommentReply(_) => kinds::RECEIVE_NW_ITEM_COMMENT_REPLY,
            Self::ReceiveSubmissionComment(_) => kinds::RECEIVE_SUBMISSION_COMMENT,
            Self::ReceiveSubmissionCommentReply(_) => kinds::RECEIVE_SUBMISSION_COMMENT_REPLY,
            Self::ReceiveChallengeCommentReply(_) => kinds::RECEIVE_CHALLENGE_COMMENT_REPLY,
            Self::NewChallenge(_) => kinds::NEW_CHALLENGE,
            Self::ChallengeCompleted(_) => kinds::CHALLENGE_COMPLETED,
        }
    }

    /// Whether this is the aggregated form of a squashing family.
    pub fn is_squashed(&self) -> bool {
        matches!(
            self,
            Self::ReceiveFollowSquashed(_)
                | Self::ReceiveSubmissionUpvoteSquashed(_)
                | Self::ReceiveNwItemLikeSquashed(_)
                | Self::ReceiveNwItemCommentSquashed(_)
        )
    }

    /// Splits into the stored representation: the kind tag and the bare
    /// content object.
    pub fn to_parts(&self) -> (&'static str, Value) {
        let content = match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("content").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        (self.kind(), content)
    }

    /// Rebuilds content from a stored `type` tag and content JSON text,
    /// validating the shape exactly.
    pub fn from_stored(kind: &str, content: &str) -> Result<Self, ContentError> {
        let content: Value = serde_json::from_str(content).map_err(|source| {
            ContentError::Malformed {
                kind: kind.to_owned(),
                source,
            }
        })?;
        let tagged = serde_json::json!({ "type": kind, "content": content });
        serde_json::from_value(tagged).map_err(|source| ContentError::Shape {
            kind: kind.to_owned(),
            source,
        })
    }
}

/// A notification as held in memory and pushed over the wire. Timestamps
/// are carried in their stored text form.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: UserId,
    pub content: NotificationContent,
    pub is_read: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Notification {
    /// The object embedded in a `NOTIFICATION` push.
    pub fn to_wire(&self) -> Value {
        let (kind, content) = self.content.to_parts();
        serde_json::json!({
            "id": self.id,
            "recipient_id": self.recipient_id,
            "type": kind,
            "content": content,
            "is_read": self.is_read,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}
