//! Platform-facing event surface.
//!
//! The main application reports social activity as one tagged payload per
//! event; `dispatch` maps each onto its hub hook.

use serde::Deserialize;

use courier_types::UserId;
use courier_types::notifications::Notification;

use crate::hub::{
    Actor, ChallengeRef, CommentRef, NotificationHub, NotifyError, NwItemRef, SubmissionRef,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Follow {
        recipient_id: UserId,
        follower: Actor,
    },
    SubmissionUpvote {
        submission: SubmissionRef,
        liker: Actor,
    },
    NwItemLike {
        item: NwItemRef,
        liker: Actor,
    },
    NwItemComment {
        item: NwItemRef,
        commenter: Actor,
    },
    NwItemCommentReply {
        parent: CommentRef,
        reply: CommentRef,
    },
    SubmissionComment {
        submission: SubmissionRef,
        comment: CommentRef,
    },
    SubmissionCommentReply {
        submission: SubmissionRef,
        parent: CommentRef,
        reply: CommentRef,
    },
    ChallengeCommentReply {
        challenge: ChallengeRef,
        parent: CommentRef,
        reply: CommentRef,
    },
    NewChallenge {
        recipient_id: UserId,
        challenge: ChallengeRef,
    },
    ChallengeCompleted {
        recipient_id: UserId,
        challenge: ChallengeRef,
        submission_id: i64,
        score: i64,
    },
}

impl NotificationHub {
    /// Runs one reported event through its hook.
    pub fn dispatch(&self, event: DomainEvent) -> Result<Option<Notification>, NotifyError> {
        match event {
            DomainEvent::Follow {
                recipient_id,
                follower,
            } => self.follow(recipient_id, &follower),
            DomainEvent::SubmissionUpvote { submission, liker } => {
                self.submission_upvote(&submission, &liker)
            }
            DomainEvent::NwItemLike { item, liker } => self.nw_item_like(&item, &liker),
            DomainEvent::NwItemComment { item, commenter } => {
                self.nw_item_comment(&item, &commenter)
            }
            DomainEvent::NwItemCommentReply { parent, reply } => {
                self.nw_item_comment_reply(&parent, &reply)
            }
            DomainEvent::SubmissionComment {
                submission,
                comment,
            } => self.submission_comment(&submission, &comment),
            DomainEvent::SubmissionCommentReply {
                submission,
                parent,
                reply,
            } => self.submission_comment_reply(&submission, &parent, &reply),
            DomainEvent::ChallengeCommentReply {
                challenge,
                parent,
                reply,
            } => self.challenge_comment_reply(&challenge, &parent, &reply),
            DomainEvent::NewChallenge {
                recipient_id,
                challenge,
            } => self.new_challenge(recipient_id, &challenge),
            DomainEvent::ChallengeCompleted {
                recipient_id,
                challenge,
                submission_id,
                score,
            } => self.challenge_completed(recipient_id, &challenge, submission_id, score),
        }
    }
}
