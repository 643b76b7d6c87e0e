use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use courier_db::Database;
use courier_types::frames::{
    AuthenticateFrame, FetchTokenFrame, IsTypingFrame, NewMessageFrame, NotifyAuthFrame,
    ReadNotificationFrame,
};

use crate::handlers;
use crate::registry::Registry;

/// Routes raw chat frames onto the fixed per-type handler queues.
///
/// Transport junk never reaches a handler: frames that fail to parse are
/// logged and dropped here, unknown types likewise.
#[derive(Clone)]
pub struct ChatRouter {
    authenticate: mpsc::UnboundedSender<AuthenticateFrame>,
    new_message: mpsc::UnboundedSender<NewMessageFrame>,
    is_typing: mpsc::UnboundedSender<IsTypingFrame>,
    fetch_token: mpsc::UnboundedSender<FetchTokenFrame>,
}

impl ChatRouter {
    pub fn route(&self, raw: &str) {
        let Some((kind, value)) = parse_frame(raw, "chat") else {
            return;
        };
        match kind.as_str() {
            "authenticate" => enqueue(&self.authenticate, value, &kind),
            "new-message" => enqueue(&self.new_message, value, &kind),
            "is-typing" => enqueue(&self.is_typing, value, &kind),
            "fetch-token" => enqueue(&self.fetch_token, value, &kind),
            other => warn!("Dropping chat frame with unknown type {:?}", other),
        }
    }
}

/// Same table for the notification socket's two frame types.
#[derive(Clone)]
pub struct NotifyRouter {
    authentication: mpsc::UnboundedSender<NotifyAuthFrame>,
    read_notification: mpsc::UnboundedSender<ReadNotificationFrame>,
}

impl NotifyRouter {
    pub fn route(&self, raw: &str) {
        let Some((kind, value)) = parse_frame(raw, "notification") else {
            return;
        };
        match kind.as_str() {
            "authentication" => enqueue(&self.authentication, value, &kind),
            "read-notification" => enqueue(&self.read_notification, value, &kind),
            other => warn!("Dropping notification frame with unknown type {:?}", other),
        }
    }
}

fn parse_frame(raw: &str, family: &str) -> Option<(String, Value)> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            debug!("Dropping unparseable {} frame: {}", family, e);
            return None;
        }
    };
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        debug!("Dropping {} frame without a type field", family);
        return None;
    };
    Some((kind.to_owned(), value))
}

fn enqueue<F: DeserializeOwned>(queue: &mpsc::UnboundedSender<F>, value: Value, kind: &str) {
    match serde_json::from_value::<F>(value) {
        Ok(frame) => {
            if queue.send(frame).is_err() {
                warn!("Handler queue for {:?} frames is closed", kind);
            }
        }
        Err(e) => debug!("Dropping malformed {:?} frame: {}", kind, e),
    }
}

/// Spawns one long-running consumer per chat frame family and returns the
/// router that feeds them. Each queue keeps global arrival order for its
/// type.
pub fn start_chat_handlers(db: Arc<Database>, registry: Registry) -> ChatRouter {
    let (authenticate_tx, authenticate_rx) = mpsc::unbounded_channel();
    let (new_message_tx, new_message_rx) = mpsc::unbounded_channel();
    let (is_typing_tx, is_typing_rx) = mpsc::unbounded_channel();
    let (fetch_token_tx, fetch_token_rx) = mpsc::unbounded_channel();

    tokio::spawn(handlers::authenticate_loop(
        authenticate_rx,
        db.clone(),
        registry.clone(),
    ));
    tokio::spawn(handlers::new_message_loop(
        new_message_rx,
        db.clone(),
        registry.clone(),
    ));
    tokio::spawn(handlers::is_typing_loop(
        is_typing_rx,
        db.clone(),
        registry.clone(),
    ));
    tokio::spawn(handlers::fetch_token_loop(fetch_token_rx, db, registry));

    ChatRouter {
        authenticate: authenticate_tx,
        new_message: new_message_tx,
        is_typing: is_typing_tx,
        fetch_token: fetch_token_tx,
    }
}

pub fn start_notify_handlers(db: Arc<Database>, registry: Registry) -> NotifyRouter {
    let (authentication_tx, authentication_rx) = mpsc::unbounded_channel();
    let (read_tx, read_rx) = mpsc::unbounded_channel();

    tokio::spawn(handlers::notify_auth_loop(
        authentication_rx,
        db.clone(),
        registry.clone(),
    ));
    tokio::spawn(handlers::read_notification_loop(read_rx, db, registry));

    NotifyRouter {
        authentication: authentication_tx,
        read_notification: read_tx,
    }
}

/// Spawns the notification delivery consumer and returns the sender the
/// squash engine pushes freshly created notification ids into.
pub fn start_delivery(db: Arc<Database>, registry: Registry) -> mpsc::UnboundedSender<i64> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(handlers::notification_receive_loop(rx, db, registry));
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::error::TryRecvError;

    struct ChatQueues {
        authenticate: mpsc::UnboundedReceiver<AuthenticateFrame>,
        new_message: mpsc::UnboundedReceiver<NewMessageFrame>,
        is_typing: mpsc::UnboundedReceiver<IsTypingFrame>,
        fetch_token: mpsc::UnboundedReceiver<FetchTokenFrame>,
    }

    fn chat_router() -> (ChatRouter, ChatQueues) {
        let (authenticate_tx, authenticate) = mpsc::unbounded_channel();
        let (new_message_tx, new_message) = mpsc::unbounded_channel();
        let (is_typing_tx, is_typing) = mpsc::unbounded_channel();
        let (fetch_token_tx, fetch_token) = mpsc::unbounded_channel();
        let router = ChatRouter {
            authenticate: authenticate_tx,
            new_message: new_message_tx,
            is_typing: is_typing_tx,
            fetch_token: fetch_token_tx,
        };
        let queues = ChatQueues {
            authenticate,
            new_message,
            is_typing,
            fetch_token,
        };
        (router, queues)
    }

    fn assert_all_empty(queues: &mut ChatQueues) {
        assert!(matches!(
            queues.authenticate.try_recv(),
            Err(TryRecvError::Empty)
        ));
        assert!(matches!(
            queues.new_message.try_recv(),
            Err(TryRecvError::Empty)
        ));
        assert!(matches!(
            queues.is_typing.try_recv(),
            Err(TryRecvError::Empty)
        ));
        assert!(matches!(
            queues.fetch_token.try_recv(),
            Err(TryRecvError::Empty)
        ));
    }

    #[test]
    fn frames_land_on_their_own_queue() {
        let (router, mut queues) = chat_router();

        router.route(
            &json!({
                "type": "is-typing",
                "user_id": 1,
                "opponent_id": 2
            })
            .to_string(),
        );

        let frame = queues.is_typing.try_recv().unwrap();
        assert_eq!(frame.user_id, 1);
        assert_eq!(frame.opponent_id, 2);
        assert!(matches!(
            queues.new_message.try_recv(),
            Err(TryRecvError::Empty)
        ));
    }

    #[test]
    fn arrival_order_is_kept_per_type() {
        let (router, mut queues) = chat_router();

        for text in ["first", "second", "third"] {
            router.route(
                &json!({
                    "type": "new-message",
                    "user_id": 1,
                    "opponent_id": 2,
                    "message": text
                })
                .to_string(),
            );
        }

        assert_eq!(queues.new_message.try_recv().unwrap().message, "first");
        assert_eq!(queues.new_message.try_recv().unwrap().message, "second");
        assert_eq!(queues.new_message.try_recv().unwrap().message, "third");
    }

    #[test]
    fn garbage_is_swallowed() {
        let (router, mut queues) = chat_router();
        router.route("{definitely not json");
        router.route("42");
        router.route(&json!({"user_id": 1}).to_string());
        assert_all_empty(&mut queues);
    }

    #[test]
    fn unknown_types_are_swallowed() {
        let (router, mut queues) = chat_router();
        router.route(&json!({"type": "self-destruct", "user_id": 1}).to_string());
        assert_all_empty(&mut queues);
    }

    #[test]
    fn malformed_known_types_are_dropped() {
        let (router, mut queues) = chat_router();
        router.route(
            &json!({
                "type": "authenticate",
                "user_id": "not-a-number",
                "opponent_id": 2,
                "auth_token": "t"
            })
            .to_string(),
        );
        assert_all_empty(&mut queues);
    }

    #[test]
    fn notification_frames_route_by_type() {
        let (authentication_tx, mut authentication) = mpsc::unbounded_channel();
        let (read_tx, mut read_notification) = mpsc::unbounded_channel();
        let router = NotifyRouter {
            authentication: authentication_tx,
            read_notification: read_tx,
        };

        router.route(
            &json!({
                "type": "authentication",
                "user_id": 5,
                "token": "secret"
            })
            .to_string(),
        );
        router.route(
            &json!({
                "type": "read-notification",
                "user_id": 5,
                "token": "secret",
                "notification_id": 12
            })
            .to_string(),
        );

        assert_eq!(authentication.try_recv().unwrap().user_id, 5);
        assert_eq!(read_notification.try_recv().unwrap().notification_id, 12);
    }
}
