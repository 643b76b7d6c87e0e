use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use courier_types::UserId;

use crate::GatewayState;
use crate::registry::ConnectionKey;

/// HTTP entry for `/notifications/{user_id}`. Unknown ids are rejected
/// before the upgrade.
pub async fn notify_upgrade(
    State(state): State<GatewayState>,
    Path(user_id): Path<UserId>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let db = state.db.clone();
    let looked_up = tokio::task::spawn_blocking(move || db.get_user_by_id(user_id)).await;
    match looked_up {
        Ok(Ok(Some(_))) => ws
            .on_upgrade(move |socket| notify_connection(socket, state, user_id))
            .into_response(),
        Ok(Ok(None)) => {
            debug!("Rejecting notification socket for unknown user {}", user_id);
            StatusCode::NOT_FOUND.into_response()
        }
        Ok(Err(e)) => {
            warn!("User lookup failed for {}: {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            warn!("User lookup task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn notify_connection(socket: WebSocket, state: GatewayState, user_id: UserId) {
    let key = ConnectionKey::Recipient(user_id);
    let Some((conn_id, mut frames)) = state.registry.register(key).await else {
        info!(
            "Notification socket for {} refused; a validated connection holds the key",
            user_id
        );
        return;
    };
    info!("Notification socket for {} connected", user_id);

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Unserializable frame dropped: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let registry = state.registry.clone();
    let router = state.notify.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if !registry.owns(key, conn_id).await {
                debug!(
                    "Notification socket for {} displaced by a newer connection",
                    user_id
                );
                break;
            }
            match msg {
                Message::Text(text) => router.route(&text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.registry.remove(key, conn_id).await;
    info!("Notification socket for {} disconnected", user_id);
}
