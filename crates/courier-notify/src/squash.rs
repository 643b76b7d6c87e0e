//! Pure aggregation transforms over notification content.
//!
//! Repeated unread events of one family collapse into a single notification
//! whose content accumulates the individual actors. Everything here is a
//! function from content to content; loading and writing rows is the hub's
//! job.

use courier_types::notifications::{
    CommenterEntry, FollowSquashedContent, LikerEntry, NotificationContent,
    NwItemCommentContent, NwItemCommentSquashedContent, NwItemLikeContent,
    NwItemLikeSquashedContent, SubmissionUpvoteContent, SubmissionUpvoteSquashedContent, kinds,
};

/// Which mutation one incoming event performs, given the latest unread row
/// of its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquashStep {
    Create,
    Convert,
    Append,
}

pub fn step(existing: Option<&NotificationContent>) -> SquashStep {
    match existing {
        None => SquashStep::Create,
        Some(content) if content.is_squashed() => SquashStep::Append,
        Some(_) => SquashStep::Convert,
    }
}

/// How the store is searched for a squashable predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SquashProfile {
    /// Base and squashed kind tags of the family.
    pub kinds: [&'static str; 2],
    /// Content key that must match the incoming event, for families scoped
    /// to one domain object.
    pub scope: Option<(&'static str, i64)>,
}

/// The squash family of an incoming event, or `None` for kinds that never
/// aggregate.
pub fn profile(incoming: &NotificationContent) -> Option<SquashProfile> {
    match incoming {
        NotificationContent::ReceiveFollow(_) => Some(SquashProfile {
            kinds: [kinds::RECEIVE_FOLLOW, kinds::RECEIVE_FOLLOW_SQUASHED],
            scope: None,
        }),
        NotificationContent::ReceiveSubmissionUpvote(content) => Some(SquashProfile {
            kinds: [
                kinds::RECEIVE_SUBMISSION_UPVOTE,
                kinds::RECEIVE_SUBMISSION_UPVOTE_SQUASHED,
            ],
            scope: Some(("submission_id", content.submission_id)),
        }),
        NotificationContent::ReceiveNwItemLike(content) => Some(SquashProfile {
            kinds: [
                kinds::RECEIVE_NW_ITEM_LIKE,
                kinds::RECEIVE_NW_ITEM_LIKE_SQUASHED,
            ],
            scope: Some(("nw_item_id", content.nw_item_id)),
        }),
        NotificationContent::ReceiveNwItemComment(content) => Some(SquashProfile {
            kinds: [
                kinds::RECEIVE_NW_ITEM_COMMENT,
                kinds::RECEIVE_NW_ITEM_COMMENT_SQUASHED,
            ],
            scope: Some(("nw_item_id", content.nw_item_id)),
        }),
        _ => None,
    }
}

/// Turns an unread singleton plus a second event of its family into the
/// squashed form. Shared context comes from the incoming event; the entry
/// list keeps arrival order.
pub fn convert(
    existing: &NotificationContent,
    incoming: &NotificationContent,
) -> Option<NotificationContent> {
    match (existing, incoming) {
        (NotificationContent::ReceiveFollow(old), NotificationContent::ReceiveFollow(new)) => {
            Some(NotificationContent::ReceiveFollowSquashed(
                FollowSquashedContent {
                    followers: vec![old.clone(), new.clone()],
                },
            ))
        }
        (
            NotificationContent::ReceiveSubmissionUpvote(old),
            NotificationContent::ReceiveSubmissionUpvote(new),
        ) => Some(NotificationContent::ReceiveSubmissionUpvoteSquashed(
            SubmissionUpvoteSquashedContent {
                submission_id: new.submission_id,
                challenge_id: new.challenge_id,
                challenge_name: new.challenge_name.clone(),
                likers: vec![upvoter(old), upvoter(new)],
            },
        )),
        (
            NotificationContent::ReceiveNwItemLike(old),
            NotificationContent::ReceiveNwItemLike(new),
        ) => Some(NotificationContent::ReceiveNwItemLikeSquashed(
            NwItemLikeSquashedContent {
                nw_item_id: new.nw_item_id,
                nw_item_type: new.nw_item_type.clone(),
                nw_item_content: new.nw_item_content.clone(),
                likers: vec![liker(old), liker(new)],
            },
        )),
        (
            NotificationContent::ReceiveNwItemComment(old),
            NotificationContent::ReceiveNwItemComment(new),
        ) => Some(NotificationContent::ReceiveNwItemCommentSquashed(
            NwItemCommentSquashedContent {
                nw_item_id: new.nw_item_id,
                nw_item_type: new.nw_item_type.clone(),
                nw_item_content: new.nw_item_content.clone(),
                commenters: vec![commenter(old), commenter(new)],
            },
        )),
        _ => None,
    }
}

/// Pushes one more entry onto an already-squashed accumulator.
pub fn append(
    existing: &NotificationContent,
    incoming: &NotificationContent,
) -> Option<NotificationContent> {
    match (existing, incoming) {
        (
            NotificationContent::ReceiveFollowSquashed(agg),
            NotificationContent::ReceiveFollow(new),
        ) => {
            let mut agg = agg.clone();
            agg.followers.push(new.clone());
            Some(NotificationContent::ReceiveFollowSquashed(agg))
        }
        (
            NotificationContent::ReceiveSubmissionUpvoteSquashed(agg),
            NotificationContent::ReceiveSubmissionUpvote(new),
        ) => {
            let mut agg = agg.clone();
            agg.likers.push(upvoter(new));
            Some(NotificationContent::ReceiveSubmissionUpvoteSquashed(agg))
        }
        (
            NotificationContent::ReceiveNwItemLikeSquashed(agg),
            NotificationContent::ReceiveNwItemLike(new),
        ) => {
            let mut agg = agg.clone();
            agg.likers.push(liker(new));
            Some(NotificationContent::ReceiveNwItemLikeSquashed(agg))
        }
        (
            NotificationContent::ReceiveNwItemCommentSquashed(agg),
            NotificationContent::ReceiveNwItemComment(new),
        ) => {
            let mut agg = agg.clone();
            agg.commenters.push(commenter(new));
            Some(NotificationContent::ReceiveNwItemCommentSquashed(agg))
        }
        _ => None,
    }
}

fn upvoter(content: &SubmissionUpvoteContent) -> LikerEntry {
    LikerEntry {
        liker_id: content.liker_id,
        liker_name: content.liker_name.clone(),
    }
}

fn liker(content: &NwItemLikeContent) -> LikerEntry {
    LikerEntry {
        liker_id: content.liker_id,
        liker_name: content.liker_name.clone(),
    }
}

fn commenter(content: &NwItemCommentContent) -> CommenterEntry {
    CommenterEntry {
        commenter_id: content.commenter_id,
        commenter_name: content.commenter_name.clone(),
    }
}
