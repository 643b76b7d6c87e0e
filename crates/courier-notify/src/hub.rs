//! Domain-event intake for notifications.
//!
//! Each hook suppresses self-notification, folds the event into the latest
//! unread row of its squash family (or inserts a fresh singleton), and
//! queues newly created rows for push delivery. Hooks run synchronously on
//! the caller's write path; any failure abandons the event with nothing
//! partially persisted.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use courier_db::Database;
use courier_types::UserId;
use courier_types::notifications::{
    ChallengeCommentReplyContent, ChallengeCompletedContent, ContentError, FollowerEntry,
    NewChallengeContent, Notification, NotificationContent, NwCommentReplyContent,
    NwItemCommentContent, NwItemLikeContent, SubmissionCommentContent, SubmissionUpvoteContent,
};

use crate::squash::{self, SquashStep};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("You cannot follow yourself!")]
    SelfFollow,
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("notification store failed: {0}")]
    Store(String),
}

/// An acting user as reported by the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub username: String,
}

/// A challenge submission plus enough context to describe it in a push.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionRef {
    pub id: i64,
    pub author_id: UserId,
    pub challenge_id: i64,
    pub challenge_name: String,
}

/// A newsfeed item; `content` is the item snapshot, carried opaque.
#[derive(Debug, Clone, Deserialize)]
pub struct NwItemRef {
    pub id: i64,
    pub author_id: UserId,
    pub kind: String,
    pub content: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentRef {
    pub id: i64,
    pub author: Actor,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeRef {
    pub id: i64,
    pub name: String,
    pub subcategory_name: String,
}

pub struct NotificationHub {
    db: Arc<Database>,
    delivery_tx: mpsc::UnboundedSender<i64>,
}

impl NotificationHub {
    pub fn new(db: Arc<Database>, delivery_tx: mpsc::UnboundedSender<i64>) -> Self {
        Self { db, delivery_tx }
    }

    pub fn follow(
        &self,
        recipient_id: UserId,
        follower: &Actor,
    ) -> Result<Option<Notification>, NotifyError> {
        if follower.id == recipient_id {
            return Err(NotifyError::SelfFollow);
        }
        self.apply(
            recipient_id,
            NotificationContent::ReceiveFollow(FollowerEntry {
                follower_id: follower.id,
                follower_name: follower.username.clone(),
            }),
        )
        .map(Some)
    }

    pub fn submission_upvote(
        &self,
        submission: &SubmissionRef,
        liker: &Actor,
    ) -> Result<Option<Notification>, NotifyError> {
        if liker.id == submission.author_id {
            return Ok(None);
        }
        self.apply(
            submission.author_id,
            NotificationContent::ReceiveSubmissionUpvote(SubmissionUpvoteContent {
                submission_id: submission.id,
                challenge_id: submission.challenge_id,
                challenge_name: submission.challenge_name.clone(),
                liker_id: liker.id,
                liker_name: liker.username.clone(),
            }),
        )
        .map(Some)
    }

    pub fn nw_item_like(
        &self,
        item: &NwItemRef,
        liker: &Actor,
    ) -> Result<Option<Notification>, NotifyError> {
        if liker.id == item.author_id {
            return Ok(None);
        }
        self.apply(
            item.author_id,
            NotificationContent::ReceiveNwItemLike(NwItemLikeContent {
                nw_item_id: item.id,
                nw_item_type: item.kind.clone(),
                nw_item_content: item.content.clone(),
                liker_id: liker.id,
                liker_name: liker.username.clone(),
            }),
        )
        .map(Some)
    }

    pub fn nw_item_comment(
        &self,
        item: &NwItemRef,
        commenter: &Actor,
    ) -> Result<Option<Notification>, NotifyError> {
        if commenter.id == item.author_id {
            return Ok(None);
        }
        self.apply(
            item.author_id,
            NotificationContent::ReceiveNwItemComment(NwItemCommentContent {
                nw_item_id: item.id,
                nw_item_type: item.kind.clone(),
                nw_item_content: item.content.clone(),
                commenter_id: commenter.id,
                commenter_name: commenter.username.clone(),
            }),
        )
        .map(Some)
    }

    pub fn nw_item_comment_reply(
        &self,
        parent: &CommentRef,
        reply: &CommentRef,
    ) -> Result<Option<Notification>, NotifyError> {
        if reply.author.id == parent.author.id {
            return Ok(None);
        }
        self.apply(
            parent.author.id,
            NotificationContent::ReceiveNwItemCommentReply(NwCommentReplyContent {
                nw_comment_id: parent.id,
                commenter_id: reply.author.id,
                commenter_name: reply.author.username.clone(),
                comment_content: reply.content.clone(),
            }),
        )
        .map(Some)
    }

    pub fn submission_comment(
        &self,
        submission: &SubmissionRef,
        comment: &CommentRef,
    ) -> Result<Option<Notification>, NotifyError> {
        if comment.author.id == submission.author_id {
            return Ok(None);
        }
        self.apply(
            submission.author_id,
            NotificationContent::ReceiveSubmissionComment(SubmissionCommentContent {
                submission_id: submission.id,
                challenge_id: submission.challenge_id,
                challenge_name: submission.challenge_name.clone(),
                comment_id: comment.id,
                comment_content: comment.content.clone(),
                commenter_id: comment.author.id,
                commenter_name: comment.author.username.clone(),
            }),
        )
        .map(Some)
    }

    pub fn submission_comment_reply(
        &self,
        submission: &SubmissionRef,
        parent: &CommentRef,
        reply: &CommentRef,
    ) -> Result<Option<Notification>, NotifyError> {
        if reply.author.id == parent.author.id {
            return Ok(None);
        }
        self.apply(
            parent.author.id,
            NotificationContent::ReceiveSubmissionCommentReply(SubmissionCommentContent {
                submission_id: submission.id,
                challenge_id: submission.challenge_id,
                challenge_name: submission.challenge_name.clone(),
                comment_id: reply.id,
                comment_content: reply.content.clone(),
                commenter_id: reply.author.id,
                commenter_name: reply.author.username.clone(),
            }),
        )
        .map(Some)
    }

    pub fn challenge_comment_reply(
        &self,
        challenge: &ChallengeRef,
        parent: &CommentRef,
        reply: &CommentRef,
    ) -> Result<Option<Notification>, NotifyError> {
        if reply.author.id == parent.author.id {
            return Ok(None);
        }
        self.apply(
            parent.author.id,
            NotificationContent::ReceiveChallengeCommentReply(ChallengeCommentReplyContent {
                challenge_id: challenge.id,
                challenge_name: challenge.name.clone(),
                comment_id: reply.id,
                comment_content: reply.content.clone(),
                commenter_id: reply.author.id,
                commenter_name: reply.author.username.clone(),
            }),
        )
        .map(Some)
    }

    pub fn new_challenge(
        &self,
        recipient_id: UserId,
        challenge: &ChallengeRef,
    ) -> Result<Option<Notification>, NotifyError> {
        self.apply(
            recipient_id,
            NotificationContent::NewChallenge(NewChallengeContent {
                challenge_id: challenge.id,
                challenge_name: challenge.name.clone(),
                challenge_subcategory_name: challenge.subcategory_name.clone(),
            }),
        )
        .map(Some)
    }

    /// The grading task's completion signal.
    pub fn challenge_completed(
        &self,
        recipient_id: UserId,
        challenge: &ChallengeRef,
        submission_id: i64,
        score: i64,
    ) -> Result<Option<Notification>, NotifyError> {
        self.apply(
            recipient_id,
            NotificationContent::ChallengeCompleted(ChallengeCompletedContent {
                challenge_id: challenge.id,
                challenge_name: challenge.name.clone(),
                submission_id,
                score,
            }),
        )
        .map(Some)
    }

    /// Folds one event into the store and returns the row as it now stands.
    fn apply(
        &self,
        recipient_id: UserId,
        content: NotificationContent,
    ) -> Result<Notification, NotifyError> {
        let Some(profile) = squash::profile(&content) else {
            return self.create(recipient_id, content);
        };
        let existing = self
            .db
            .latest_unread_notification(recipient_id, profile.kinds, profile.scope)
            .map_err(|e| NotifyError::Store(e.to_string()))?;
        let Some(row) = existing else {
            return self.create(recipient_id, content);
        };
        let stored = NotificationContent::from_stored(&row.kind, &row.content)?;
        let merged = match squash::step(Some(&stored)) {
            SquashStep::Create => None,
            SquashStep::Convert => squash::convert(&stored, &content),
            SquashStep::Append => squash::append(&stored, &content),
        };
        let Some(merged) = merged else {
            return Err(NotifyError::Store(format!(
                "unread notification {} (kind {}) cannot absorb a {} event",
                row.id,
                row.kind,
                content.kind()
            )));
        };
        let (kind, body) = merged.to_parts();
        let updated = self
            .db
            .update_notification_content(row.id, kind, &body.to_string())
            .map_err(|e| NotifyError::Store(e.to_string()))?;
        Ok(Notification {
            id: updated.id,
            recipient_id: updated.recipient_id,
            content: merged,
            is_read: updated.is_read,
            created_at: updated.created_at,
            updated_at: updated.updated_at,
        })
    }

    /// Inserts a fresh singleton and queues it for push delivery. Only this
    /// path pushes; squash mutations reuse the already-delivered row.
    fn create(
        &self,
        recipient_id: UserId,
        content: NotificationContent,
    ) -> Result<Notification, NotifyError> {
        let (kind, body) = content.to_parts();
        let row = self
            .db
            .insert_notification(recipient_id, kind, &body.to_string())
            .map_err(|e| NotifyError::Store(e.to_string()))?;
        if self.delivery_tx.send(row.id).is_err() {
            debug!(
                "Delivery queue closed; notification {} stays store-only",
                row.id
            );
        }
        Ok(Notification {
            id: row.id,
            recipient_id: row.recipient_id,
            content,
            is_read: row.is_read,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::notifications::kinds;
    use tokio::sync::mpsc::error::TryRecvError;

    fn hub() -> (NotificationHub, mpsc::UnboundedReceiver<i64>, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        for i in 1..=9 {
            db.create_user(&format!("user-{i}"), &format!("token-{i}"))
                .unwrap();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        (NotificationHub::new(db.clone(), tx), rx, db)
    }

    fn actor(id: UserId) -> Actor {
        Actor {
            id,
            username: format!("user-{id}"),
        }
    }

    fn submission(id: i64, author_id: UserId) -> SubmissionRef {
        SubmissionRef {
            id,
            author_id,
            challenge_id: 3,
            challenge_name: "Two Sum".into(),
        }
    }

    fn nw_item(id: i64, author_id: UserId) -> NwItemRef {
        NwItemRef {
            id,
            author_id,
            kind: "snippet".into(),
            content: serde_json::json!({"text": "fn main() {}"}),
        }
    }

    #[test]
    fn three_follows_collapse_into_one_squashed_row() {
        let (hub, _rx, db) = hub();
        hub.follow(9, &actor(1)).unwrap();
        hub.follow(9, &actor(2)).unwrap();
        let third = hub.follow(9, &actor(3)).unwrap().unwrap();

        assert_eq!(db.count_notifications_for(9).unwrap(), 1);
        match third.content {
            NotificationContent::ReceiveFollowSquashed(content) => {
                let ids: Vec<i64> = content.followers.iter().map(|f| f.follower_id).collect();
                assert_eq!(ids, [1, 2, 3]);
            }
            other => panic!("expected squashed follow, got {:?}", other),
        }
    }

    #[test]
    fn following_yourself_is_a_typed_error() {
        let (hub, _rx, db) = hub();
        assert!(matches!(
            hub.follow(1, &actor(1)),
            Err(NotifyError::SelfFollow)
        ));
        assert_eq!(db.count_notifications_for(1).unwrap(), 0);
    }

    #[test]
    fn upvoting_your_own_submission_is_silent() {
        let (hub, mut rx, db) = hub();
        assert!(
            hub.submission_upvote(&submission(10, 4), &actor(4))
                .unwrap()
                .is_none()
        );
        assert_eq!(db.count_notifications_for(4).unwrap(), 0);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn marking_read_ends_the_squash_run() {
        let (hub, _rx, db) = hub();
        let first = hub.follow(9, &actor(1)).unwrap().unwrap();
        db.mark_notification_read(first.id).unwrap();
        let second = hub.follow(9, &actor(2)).unwrap().unwrap();

        assert_ne!(second.id, first.id);
        assert_eq!(db.count_notifications_for(9).unwrap(), 2);
        assert_eq!(second.content.kind(), kinds::RECEIVE_FOLLOW);
    }

    #[test]
    fn upvotes_on_different_submissions_stay_apart() {
        let (hub, _rx, db) = hub();
        hub.submission_upvote(&submission(10, 4), &actor(1)).unwrap();
        hub.submission_upvote(&submission(11, 4), &actor(2)).unwrap();

        assert_eq!(db.count_notifications_for(4).unwrap(), 2);
        let unread = db.unread_notifications_for(4).unwrap();
        assert!(
            unread
                .iter()
                .all(|row| row.kind == kinds::RECEIVE_SUBMISSION_UPVOTE)
        );
    }

    #[test]
    fn upvotes_on_one_submission_merge() {
        let (hub, _rx, db) = hub();
        hub.submission_upvote(&submission(10, 4), &actor(1)).unwrap();
        let merged = hub
            .submission_upvote(&submission(10, 4), &actor(2))
            .unwrap()
            .unwrap();

        assert_eq!(db.count_notifications_for(4).unwrap(), 1);
        match merged.content {
            NotificationContent::ReceiveSubmissionUpvoteSquashed(content) => {
                assert_eq!(content.submission_id, 10);
                let ids: Vec<i64> = content.likers.iter().map(|l| l.liker_id).collect();
                assert_eq!(ids, [1, 2]);
            }
            other => panic!("expected squashed upvote, got {:?}", other),
        }
    }

    #[test]
    fn likes_on_different_newsfeed_items_stay_apart() {
        let (hub, _rx, db) = hub();
        hub.nw_item_like(&nw_item(20, 4), &actor(1)).unwrap();
        hub.nw_item_like(&nw_item(21, 4), &actor(2)).unwrap();

        assert_eq!(db.count_notifications_for(4).unwrap(), 2);
        let unread = db.unread_notifications_for(4).unwrap();
        assert!(unread.iter().all(|row| row.kind == kinds::RECEIVE_NW_ITEM_LIKE));
    }

    #[test]
    fn only_creation_queues_a_push() {
        let (hub, mut rx, _db) = hub();
        let first = hub.follow(9, &actor(1)).unwrap().unwrap();
        hub.follow(9, &actor(2)).unwrap();
        hub.follow(9, &actor(3)).unwrap();

        assert_eq!(rx.try_recv(), Ok(first.id));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn replies_notify_the_parent_author() {
        let (hub, _rx, db) = hub();
        let parent = CommentRef {
            id: 30,
            author: actor(5),
            content: "nice approach".into(),
        };
        let reply = CommentRef {
            id: 31,
            author: actor(6),
            content: "thanks!".into(),
        };
        let pushed = hub.nw_item_comment_reply(&parent, &reply).unwrap().unwrap();

        assert_eq!(pushed.recipient_id, 5);
        match pushed.content {
            NotificationContent::ReceiveNwItemCommentReply(content) => {
                assert_eq!(content.nw_comment_id, 30);
                assert_eq!(content.commenter_id, 6);
                assert_eq!(content.comment_content, "thanks!");
            }
            other => panic!("expected comment reply, got {:?}", other),
        }
        assert_eq!(db.count_notifications_for(5).unwrap(), 1);
    }

    #[test]
    fn completion_signals_never_merge() {
        let (hub, mut rx, db) = hub();
        let challenge = ChallengeRef {
            id: 3,
            name: "Two Sum".into(),
            subcategory_name: "Arrays".into(),
        };
        hub.challenge_completed(4, &challenge, 10, 95).unwrap();
        hub.challenge_completed(4, &challenge, 11, 100).unwrap();

        assert_eq!(db.count_notifications_for(4).unwrap(), 2);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }
}
