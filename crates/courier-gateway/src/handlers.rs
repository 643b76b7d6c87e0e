use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use courier_db::Database;
use courier_db::models::{NotificationRow, UserRow};
use courier_types::UserId;
use courier_types::frames::{
    AuthenticateFrame, ErrorKind, FetchTokenFrame, IsTypingFrame, NewMessageFrame,
    NotifyAuthFrame, ReadNotificationFrame, ServerFrame,
};
use courier_types::notifications::{Notification, NotificationContent};

use crate::participants::{ParticipantError, fetch_participants};
use crate::presence;
use crate::registry::{ConnectionKey, KeyState, PairPresence, Registry};

/// What a handler decided for one frame, before any effect runs.
#[derive(Debug, PartialEq)]
pub(crate) enum Verdict {
    /// Drop the frame without replying. Used when the claimed connection is
    /// not registered, so a forged frame learns nothing.
    Ignore,
    /// Push one frame back to the originating socket.
    Reply(ServerFrame),
    /// Guards passed; the loop runs the handler's effect.
    Proceed,
}

type Participants = Result<(UserRow, UserRow), ParticipantError>;

pub(crate) fn decide_authenticate(
    frame: &AuthenticateFrame,
    presence: PairPresence,
    participants: &Participants,
) -> Verdict {
    if !presence.sender.registered {
        return Verdict::Ignore;
    }
    let (owner, _) = match participants {
        Ok(pair) => pair,
        Err(e) => return Verdict::Reply(ServerFrame::error(e.error_kind(), e.to_string())),
    };
    if owner.auth_token != frame.auth_token {
        return Verdict::Reply(ServerFrame::error(ErrorKind::Authorization, "Invalid token!"));
    }
    Verdict::Proceed
}

/// The empty-text check runs before authorization on purpose: the reply
/// names the cheapest fix first.
pub(crate) fn decide_new_message(
    frame: &NewMessageFrame,
    presence: PairPresence,
    participants: &Participants,
) -> Verdict {
    if !presence.sender.registered {
        return Verdict::Ignore;
    }
    if frame.message.trim().is_empty() {
        return Verdict::Reply(ServerFrame::error(
            ErrorKind::Validation,
            "Message cannot be empty!",
        ));
    }
    if let Err(e) = participants {
        return Verdict::Reply(ServerFrame::error(e.error_kind(), e.to_string()));
    }
    if !presence.sender.valid {
        return Verdict::Reply(ServerFrame::error(
            ErrorKind::Authorization,
            "You need to authorize yourself by fetching a token!",
        ));
    }
    Verdict::Proceed
}

pub(crate) fn decide_is_typing(
    frame: &IsTypingFrame,
    presence: PairPresence,
    participants: &Participants,
) -> Verdict {
    if !presence.sender.registered {
        return Verdict::Ignore;
    }
    if let Err(e) = participants {
        return Verdict::Reply(ServerFrame::error(e.error_kind(), e.to_string()));
    }
    if !presence.sender.valid {
        return Verdict::Reply(ServerFrame::error(
            ErrorKind::Authorization,
            "You need to authorize yourself by fetching a token!",
        ));
    }
    if !presence.opponent_online {
        return Verdict::Reply(ServerFrame::error(
            ErrorKind::Warning,
            format!("User {} is offline!", frame.opponent_id),
        ));
    }
    Verdict::Proceed
}

pub(crate) fn decide_fetch_token(
    _frame: &FetchTokenFrame,
    presence: PairPresence,
    participants: &Participants,
) -> Verdict {
    if !presence.sender.registered {
        return Verdict::Ignore;
    }
    if let Err(e) = participants {
        return Verdict::Reply(ServerFrame::error(e.error_kind(), e.to_string()));
    }
    if !presence.sender.valid {
        return Verdict::Reply(ServerFrame::error(
            ErrorKind::Authorization,
            "You need to authorize yourself by fetching a token!",
        ));
    }
    Verdict::Proceed
}

pub(crate) fn decide_notify_auth(
    frame: &NotifyAuthFrame,
    state: KeyState,
    user: Option<&UserRow>,
) -> Verdict {
    if !state.registered {
        return Verdict::Ignore;
    }
    match user {
        None => Verdict::Reply(ServerFrame::error(
            ErrorKind::NotFound,
            format!("User {} does not exist!", frame.user_id),
        )),
        Some(user) if user.auth_token != frame.token => Verdict::Reply(ServerFrame::error(
            ErrorKind::Authorization,
            "Notification token is invalid or expired!",
        )),
        Some(_) => Verdict::Proceed,
    }
}

pub(crate) fn decide_read_notification(
    frame: &ReadNotificationFrame,
    state: KeyState,
    user: Option<&UserRow>,
    notification: Option<&NotificationRow>,
) -> Verdict {
    if !state.registered {
        return Verdict::Ignore;
    }
    if !state.valid {
        return Verdict::Reply(ServerFrame::error(
            ErrorKind::Authorization,
            "You must authenticate this connection first!",
        ));
    }
    let user = match user {
        Some(user) => user,
        None => {
            return Verdict::Reply(ServerFrame::error(
                ErrorKind::NotFound,
                format!("User {} does not exist!", frame.user_id),
            ));
        }
    };
    if user.auth_token != frame.token {
        return Verdict::Reply(ServerFrame::error(
            ErrorKind::Authorization,
            "Notification token is invalid or expired!",
        ));
    }
    let notification = match notification {
        Some(notification) => notification,
        None => {
            return Verdict::Reply(ServerFrame::error(
                ErrorKind::NotFound,
                format!("Notification {} does not exist!", frame.notification_id),
            ));
        }
    };
    if notification.recipient_id != frame.user_id {
        return Verdict::Reply(ServerFrame::error(
            ErrorKind::Authorization,
            "You are not the recipient of this notification!",
        ));
    }
    Verdict::Proceed
}

// -- Consumer loops --
//
// One task per frame family, alive for the whole process. Every store touch
// goes through spawn_blocking; every failure is logged and the loop moves
// on, so a poisoned frame can never take the family down.

pub(crate) async fn authenticate_loop(
    mut rx: mpsc::UnboundedReceiver<AuthenticateFrame>,
    db: Arc<Database>,
    registry: Registry,
) {
    while let Some(frame) = rx.recv().await {
        let key = ConnectionKey::Pair {
            owner: frame.user_id,
            opponent: frame.opponent_id,
        };
        let presence = registry.pair_presence(frame.user_id, frame.opponent_id).await;
        if !presence.sender.registered {
            debug!(
                "Ignoring authenticate for unregistered pair {}/{}",
                frame.user_id, frame.opponent_id
            );
            continue;
        }
        let Some(participants) = load_participants(&db, frame.user_id, frame.opponent_id).await
        else {
            continue;
        };
        match decide_authenticate(&frame, presence, &participants) {
            Verdict::Ignore => {}
            Verdict::Reply(reply) => {
                registry.send(key, reply).await;
            }
            Verdict::Proceed => {
                registry.validate(key).await;
                info!("Chat pair {}/{} authenticated", frame.user_id, frame.opponent_id);
                registry.send(key, ServerFrame::ok("AUTHENTICATED")).await;
                presence::announce_online(&registry, key).await;
            }
        }
    }
}

pub(crate) async fn new_message_loop(
    mut rx: mpsc::UnboundedReceiver<NewMessageFrame>,
    db: Arc<Database>,
    registry: Registry,
) {
    while let Some(frame) = rx.recv().await {
        let key = ConnectionKey::Pair {
            owner: frame.user_id,
            opponent: frame.opponent_id,
        };
        let presence = registry.pair_presence(frame.user_id, frame.opponent_id).await;
        if !presence.sender.registered {
            debug!(
                "Ignoring message for unregistered pair {}/{}",
                frame.user_id, frame.opponent_id
            );
            continue;
        }
        let Some(participants) = load_participants(&db, frame.user_id, frame.opponent_id).await
        else {
            continue;
        };
        match decide_new_message(&frame, presence, &participants) {
            Verdict::Ignore => {}
            Verdict::Reply(reply) => {
                registry.send(key, reply).await;
            }
            Verdict::Proceed => {
                let owner = match &participants {
                    Ok((owner, _)) => owner,
                    Err(_) => continue,
                };
                let store = db.clone();
                let (sender_id, opponent_id) = (frame.user_id, frame.opponent_id);
                let text = frame.message.clone();
                let stored = match tokio::task::spawn_blocking(move || {
                    store.create_message(sender_id, opponent_id, &text)
                })
                .await
                {
                    Ok(Ok(row)) => row,
                    Ok(Err(e)) => {
                        error!(
                            "Failed to store message from {} to {}: {}",
                            sender_id, opponent_id, e
                        );
                        continue;
                    }
                    Err(e) => {
                        error!("Message store task failed: {}", e);
                        continue;
                    }
                };
                let payload = ServerFrame::ReceivedMessage {
                    id: stored.id,
                    sender_name: owner.username.clone(),
                    message: stored.text,
                    created: stored.created_at,
                };
                presence::fan_out(&registry, key, payload).await;
            }
        }
    }
}

pub(crate) async fn is_typing_loop(
    mut rx: mpsc::UnboundedReceiver<IsTypingFrame>,
    db: Arc<Database>,
    registry: Registry,
) {
    while let Some(frame) = rx.recv().await {
        let key = ConnectionKey::Pair {
            owner: frame.user_id,
            opponent: frame.opponent_id,
        };
        let presence = registry.pair_presence(frame.user_id, frame.opponent_id).await;
        if !presence.sender.registered {
            continue;
        }
        let Some(participants) = load_participants(&db, frame.user_id, frame.opponent_id).await
        else {
            continue;
        };
        match decide_is_typing(&frame, presence, &participants) {
            Verdict::Ignore => {}
            Verdict::Reply(reply) => {
                registry.send(key, reply).await;
            }
            Verdict::Proceed => {
                if let Some(reciprocal) = key.reciprocal() {
                    // Re-checked at dispatch; the opponent may have left
                    // since the snapshot.
                    if !registry.send_if_valid(reciprocal, ServerFrame::OpponentTyping).await {
                        debug!("Typing ping for {:?} dropped; opponent left", reciprocal);
                    }
                }
            }
        }
    }
}

pub(crate) async fn fetch_token_loop(
    mut rx: mpsc::UnboundedReceiver<FetchTokenFrame>,
    db: Arc<Database>,
    registry: Registry,
) {
    while let Some(frame) = rx.recv().await {
        let key = ConnectionKey::Pair {
            owner: frame.user_id,
            opponent: frame.opponent_id,
        };
        let presence = registry.pair_presence(frame.user_id, frame.opponent_id).await;
        if !presence.sender.registered {
            continue;
        }
        let Some(participants) = load_participants(&db, frame.user_id, frame.opponent_id).await
        else {
            continue;
        };
        match decide_fetch_token(&frame, presence, &participants) {
            Verdict::Ignore => {}
            Verdict::Reply(reply) => {
                registry.send(key, reply).await;
            }
            Verdict::Proceed => {
                let store = db.clone();
                let (a, b) = (frame.user_id, frame.opponent_id);
                match tokio::task::spawn_blocking(move || store.get_or_create_dialog(a, b)).await {
                    Ok(Ok(dialog)) => {
                        registry
                            .send(
                                key,
                                ServerFrame::ok_with_token(
                                    "Conversation token issued.",
                                    dialog.token,
                                ),
                            )
                            .await;
                    }
                    Ok(Err(e)) => {
                        error!("Failed to issue conversation token for {}/{}: {}", a, b, e)
                    }
                    Err(e) => error!("Conversation token task failed: {}", e),
                }
            }
        }
    }
}

pub(crate) async fn notify_auth_loop(
    mut rx: mpsc::UnboundedReceiver<NotifyAuthFrame>,
    db: Arc<Database>,
    registry: Registry,
) {
    while let Some(frame) = rx.recv().await {
        let key = ConnectionKey::Recipient(frame.user_id);
        let state = registry.key_state(key).await;
        if !state.registered {
            debug!(
                "Ignoring authentication for absent recipient {}",
                frame.user_id
            );
            continue;
        }
        let Some(user) = load_user(&db, frame.user_id).await else {
            continue;
        };
        match decide_notify_auth(&frame, state, user.as_ref()) {
            Verdict::Ignore => {}
            Verdict::Reply(reply) => {
                registry.send(key, reply).await;
            }
            Verdict::Proceed => {
                registry.validate(key).await;
                info!("Notification socket for {} authenticated", frame.user_id);
                registry
                    .send(key, ServerFrame::ok("Successfully authenticated!"))
                    .await;
            }
        }
    }
}

pub(crate) async fn read_notification_loop(
    mut rx: mpsc::UnboundedReceiver<ReadNotificationFrame>,
    db: Arc<Database>,
    registry: Registry,
) {
    while let Some(frame) = rx.recv().await {
        let key = ConnectionKey::Recipient(frame.user_id);
        let state = registry.key_state(key).await;
        if !state.registered {
            debug!(
                "Ignoring read-notification for absent recipient {}",
                frame.user_id
            );
            continue;
        }
        let Some(user) = load_user(&db, frame.user_id).await else {
            continue;
        };
        let Some(notification) = load_notification(&db, frame.notification_id).await else {
            continue;
        };
        match decide_read_notification(&frame, state, user.as_ref(), notification.as_ref()) {
            Verdict::Ignore => {}
            Verdict::Reply(reply) => {
                registry.send(key, reply).await;
            }
            Verdict::Proceed => {
                let store = db.clone();
                let id = frame.notification_id;
                match tokio::task::spawn_blocking(move || store.mark_notification_read(id)).await {
                    Ok(Ok(())) => {
                        registry.send(key, ServerFrame::ok("Notification read.")).await;
                    }
                    Ok(Err(e)) => error!("Failed to mark notification {} read: {}", id, e),
                    Err(e) => error!("Read-notification task failed: {}", e),
                }
            }
        }
    }
}

/// Drains the internal delivery queue. Every id gets re-validated against
/// the store and the registry before anything reaches a socket.
pub(crate) async fn notification_receive_loop(
    mut rx: mpsc::UnboundedReceiver<i64>,
    db: Arc<Database>,
    registry: Registry,
) {
    while let Some(notification_id) = rx.recv().await {
        let Some(row) = load_notification(&db, notification_id).await else {
            continue;
        };
        let Some(row) = row else {
            debug!("Notification {} missing; push skipped", notification_id);
            continue;
        };
        if row.is_read {
            debug!("Notification {} already read; push skipped", row.id);
            continue;
        }
        let content = match NotificationContent::from_stored(&row.kind, &row.content) {
            Ok(content) => content,
            Err(e) => {
                error!("Refusing to push notification {}: {}", row.id, e);
                continue;
            }
        };
        let key = ConnectionKey::Recipient(row.recipient_id);
        if !registry.is_online(key).await {
            debug!(
                "Recipient {} offline or unauthenticated; push for {} skipped",
                row.recipient_id, row.id
            );
            continue;
        }
        let notification = Notification {
            id: row.id,
            recipient_id: row.recipient_id,
            content,
            is_read: row.is_read,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };
        registry
            .send(
                key,
                ServerFrame::Notification {
                    notification: notification.to_wire(),
                },
            )
            .await;
    }
}

async fn load_participants(
    db: &Arc<Database>,
    owner_id: UserId,
    opponent_id: UserId,
) -> Option<Participants> {
    let db = db.clone();
    match tokio::task::spawn_blocking(move || fetch_participants(&db, owner_id, opponent_id)).await
    {
        Ok(result) => Some(result),
        Err(e) => {
            error!("Participant lookup task failed: {}", e);
            None
        }
    }
}

async fn load_user(db: &Arc<Database>, id: UserId) -> Option<Option<UserRow>> {
    let db = db.clone();
    match tokio::task::spawn_blocking(move || db.get_user_by_id(id)).await {
        Ok(Ok(user)) => Some(user),
        Ok(Err(e)) => {
            error!("User lookup failed for {}: {}", id, e);
            None
        }
        Err(e) => {
            error!("User lookup task failed: {}", e);
            None
        }
    }
}

async fn load_notification(db: &Arc<Database>, id: i64) -> Option<Option<NotificationRow>> {
    let db = db.clone();
    match tokio::task::spawn_blocking(move || db.get_notification(id)).await {
        Ok(Ok(row)) => Some(row),
        Ok(Err(e)) => {
            error!("Notification lookup failed for {}: {}", id, e);
            None
        }
        Err(e) => {
            error!("Notification lookup task failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn user(id: UserId, name: &str, token: &str) -> UserRow {
        UserRow {
            id,
            username: name.into(),
            auth_token: token.into(),
            created_at: "2026-08-25 09:00:00".into(),
        }
    }

    fn both_users() -> Participants {
        Ok((user(1, "alice", "alice-token"), user(2, "bob", "bob-token")))
    }

    fn presence(registered: bool, valid: bool, opponent_online: bool) -> PairPresence {
        PairPresence {
            sender: KeyState { registered, valid },
            opponent_online,
        }
    }

    fn auth_frame(token: &str) -> AuthenticateFrame {
        AuthenticateFrame {
            user_id: 1,
            opponent_id: 2,
            auth_token: token.into(),
        }
    }

    fn message_frame(text: &str) -> NewMessageFrame {
        NewMessageFrame {
            user_id: 1,
            opponent_id: 2,
            message: text.into(),
            conversation_token: None,
        }
    }

    #[test]
    fn authenticate_is_ignored_for_absent_pairs() {
        let verdict = decide_authenticate(
            &auth_frame("alice-token"),
            presence(false, false, false),
            &both_users(),
        );
        assert_eq!(verdict, Verdict::Ignore);
    }

    #[test]
    fn authenticate_rejects_a_wrong_token() {
        let verdict = decide_authenticate(
            &auth_frame("stolen"),
            presence(true, false, false),
            &both_users(),
        );
        assert_eq!(
            verdict,
            Verdict::Reply(ServerFrame::error(ErrorKind::Authorization, "Invalid token!"))
        );
    }

    #[test]
    fn authenticate_reports_unknown_participants() {
        let verdict = decide_authenticate(
            &auth_frame("alice-token"),
            presence(true, false, false),
            &Err(ParticipantError::NotFound(2)),
        );
        match verdict {
            Verdict::Reply(ServerFrame::Error { error_type, message }) => {
                assert_eq!(error_type, ErrorKind::NotFound);
                assert!(message.contains('2'));
            }
            other => panic!("expected a NOT_FOUND reply, got {:?}", other),
        }
    }

    #[test]
    fn authenticate_accepts_the_owners_token() {
        let verdict = decide_authenticate(
            &auth_frame("alice-token"),
            presence(true, false, false),
            &both_users(),
        );
        assert_eq!(verdict, Verdict::Proceed);
    }

    #[test]
    fn blank_text_fails_validation_before_authorization() {
        // Unauthenticated sender with a blank message still sees VALIDATION.
        let verdict = decide_new_message(
            &message_frame("   "),
            presence(true, false, true),
            &both_users(),
        );
        assert_eq!(
            verdict,
            Verdict::Reply(ServerFrame::error(
                ErrorKind::Validation,
                "Message cannot be empty!"
            ))
        );
    }

    #[test]
    fn unauthenticated_senders_cannot_message() {
        let verdict = decide_new_message(
            &message_frame("hi"),
            presence(true, false, true),
            &both_users(),
        );
        assert_eq!(
            verdict,
            Verdict::Reply(ServerFrame::error(
                ErrorKind::Authorization,
                "You need to authorize yourself by fetching a token!"
            ))
        );
    }

    #[test]
    fn valid_messages_proceed_regardless_of_opponent_presence() {
        let verdict = decide_new_message(
            &message_frame("hi"),
            presence(true, true, false),
            &both_users(),
        );
        assert_eq!(verdict, Verdict::Proceed);
    }

    #[test]
    fn typing_warns_when_the_opponent_is_offline() {
        let frame = IsTypingFrame {
            user_id: 1,
            opponent_id: 2,
            conversation_token: None,
        };
        let verdict = decide_is_typing(&frame, presence(true, true, false), &both_users());
        assert_eq!(
            verdict,
            Verdict::Reply(ServerFrame::error(ErrorKind::Warning, "User 2 is offline!"))
        );

        let verdict = decide_is_typing(&frame, presence(true, true, true), &both_users());
        assert_eq!(verdict, Verdict::Proceed);
    }

    #[test]
    fn notify_auth_checks_token_against_the_stored_user() {
        let frame = NotifyAuthFrame {
            user_id: 1,
            token: "alice-token".into(),
        };
        let owner = user(1, "alice", "alice-token");

        let registered = KeyState {
            registered: true,
            valid: false,
        };
        assert_eq!(
            decide_notify_auth(&frame, registered, Some(&owner)),
            Verdict::Proceed
        );
        assert_eq!(
            decide_notify_auth(&frame, KeyState::default(), Some(&owner)),
            Verdict::Ignore
        );

        let wrong = NotifyAuthFrame {
            user_id: 1,
            token: "expired".into(),
        };
        assert_eq!(
            decide_notify_auth(&wrong, registered, Some(&owner)),
            Verdict::Reply(ServerFrame::error(
                ErrorKind::Authorization,
                "Notification token is invalid or expired!"
            ))
        );
    }

    #[test]
    fn reading_requires_a_validated_connection() {
        let frame = ReadNotificationFrame {
            user_id: 1,
            token: "alice-token".into(),
            notification_id: 3,
        };
        let verdict = decide_read_notification(
            &frame,
            KeyState {
                registered: true,
                valid: false,
            },
            Some(&user(1, "alice", "alice-token")),
            None,
        );
        assert_eq!(
            verdict,
            Verdict::Reply(ServerFrame::error(
                ErrorKind::Authorization,
                "You must authenticate this connection first!"
            ))
        );
    }

    #[test]
    fn reading_someone_elses_notification_is_refused() {
        let frame = ReadNotificationFrame {
            user_id: 1,
            token: "alice-token".into(),
            notification_id: 3,
        };
        let foreign = NotificationRow {
            id: 3,
            recipient_id: 2,
            kind: "receive_follow".into(),
            content: "{}".into(),
            is_read: false,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let verdict = decide_read_notification(
            &frame,
            KeyState {
                registered: true,
                valid: true,
            },
            Some(&user(1, "alice", "alice-token")),
            Some(&foreign),
        );
        assert_eq!(
            verdict,
            Verdict::Reply(ServerFrame::error(
                ErrorKind::Authorization,
                "You are not the recipient of this notification!"
            ))
        );
    }

    #[test]
    fn missing_notifications_are_reported_not_found() {
        let frame = ReadNotificationFrame {
            user_id: 1,
            token: "alice-token".into(),
            notification_id: 44,
        };
        let verdict = decide_read_notification(
            &frame,
            KeyState {
                registered: true,
                valid: true,
            },
            Some(&user(1, "alice", "alice-token")),
            None,
        );
        match verdict {
            Verdict::Reply(ServerFrame::Error { error_type, message }) => {
                assert_eq!(error_type, ErrorKind::NotFound);
                assert!(message.contains("44"));
            }
            other => panic!("expected a NOT_FOUND reply, got {:?}", other),
        }
    }

    async fn seeded_registry_pair(
        registry: &Registry,
    ) -> (
        mpsc::UnboundedReceiver<ServerFrame>,
        mpsc::UnboundedReceiver<ServerFrame>,
    ) {
        let (_, a_rx) = registry
            .register(ConnectionKey::Pair {
                owner: 1,
                opponent: 2,
            })
            .await
            .unwrap();
        let (_, b_rx) = registry
            .register(ConnectionKey::Pair {
                owner: 2,
                opponent: 1,
            })
            .await
            .unwrap();
        (a_rx, b_rx)
    }

    fn seeded_db() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", "alice-token").unwrap();
        db.create_user("bob", "bob-token").unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn authenticate_loop_validates_and_announces() {
        let registry = Registry::new();
        let db = seeded_db();
        let (mut a_rx, _b_rx) = seeded_registry_pair(&registry).await;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(authenticate_loop(rx, db, registry.clone()));
        tx.send(auth_frame("alice-token")).unwrap();

        let first = timeout(Duration::from_secs(2), a_rx.recv()).await.unwrap();
        assert_eq!(first, Some(ServerFrame::ok("AUTHENTICATED")));
        let second = timeout(Duration::from_secs(2), a_rx.recv()).await.unwrap();
        assert_eq!(second, Some(ServerFrame::OnlineCheck { is_online: false }));
        assert!(
            registry
                .is_online(ConnectionKey::Pair {
                    owner: 1,
                    opponent: 2
                })
                .await
        );
    }

    #[tokio::test]
    async fn new_message_loop_persists_and_fans_out() {
        let registry = Registry::new();
        let db = seeded_db();
        let (mut a_rx, mut b_rx) = seeded_registry_pair(&registry).await;
        registry
            .validate(ConnectionKey::Pair {
                owner: 1,
                opponent: 2,
            })
            .await;
        registry
            .validate(ConnectionKey::Pair {
                owner: 2,
                opponent: 1,
            })
            .await;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(new_message_loop(rx, db.clone(), registry.clone()));
        tx.send(message_frame("hello bob")).unwrap();

        let to_sender = timeout(Duration::from_secs(2), a_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let to_opponent = timeout(Duration::from_secs(2), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(to_sender, to_opponent);
        match to_sender {
            ServerFrame::ReceivedMessage {
                sender_name,
                message,
                ..
            } => {
                assert_eq!(sender_name, "alice");
                assert_eq!(message, "hello bob");
            }
            other => panic!("expected received-message, got {:?}", other),
        }

        let dialog = db.get_or_create_dialog(1, 2).unwrap();
        assert!(dialog.id > 0);
    }

    #[tokio::test]
    async fn receive_loop_skips_offline_recipients() {
        let registry = Registry::new();
        let db = seeded_db();
        let row = db
            .insert_notification(
                2,
                "receive_follow",
                &serde_json::json!({"follower_id": 1, "follower_name": "alice"}).to_string(),
            )
            .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(notification_receive_loop(rx, db.clone(), registry.clone()));

        // Nobody is connected: the push is dropped without an error.
        tx.send(row.id).unwrap();

        // Register and validate, then push again and expect delivery.
        let key = ConnectionKey::Recipient(2);
        let (_, mut rx_frames) = registry.register(key).await.unwrap();
        registry.validate(key).await;
        tx.send(row.id).unwrap();

        let frame = timeout(Duration::from_secs(2), rx_frames.recv())
            .await
            .unwrap()
            .unwrap();
        match frame {
            ServerFrame::Notification { notification } => {
                assert_eq!(notification["id"], serde_json::json!(row.id));
                assert_eq!(
                    notification["content"]["follower_name"],
                    serde_json::json!("alice")
                );
            }
            other => panic!("expected NOTIFICATION, got {:?}", other),
        }
    }
}
