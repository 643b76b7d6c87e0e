use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use courier_types::UserId;

use crate::GatewayState;
use crate::participants::fetch_participants;
use crate::presence;
use crate::registry::ConnectionKey;

/// HTTP entry for `/chat/{owner_id}/{token}/{opponent_id}`. Participants are
/// resolved before the upgrade, so an unresolvable path is rejected without
/// ever costing a socket.
pub async fn chat_upgrade(
    State(state): State<GatewayState>,
    Path((owner_id, _conversation_token, opponent_id)): Path<(UserId, String, UserId)>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let db = state.db.clone();
    let checked =
        tokio::task::spawn_blocking(move || fetch_participants(&db, owner_id, opponent_id)).await;
    match checked {
        Ok(Ok(_)) => ws
            .on_upgrade(move |socket| chat_connection(socket, state, owner_id, opponent_id))
            .into_response(),
        Ok(Err(e)) => {
            debug!("Rejecting chat socket {}/{}: {}", owner_id, opponent_id, e);
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            warn!("Participant check task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn chat_connection(
    socket: WebSocket,
    state: GatewayState,
    owner_id: UserId,
    opponent_id: UserId,
) {
    let key = ConnectionKey::Pair {
        owner: owner_id,
        opponent: opponent_id,
    };
    let Some((conn_id, mut frames)) = state.registry.register(key).await else {
        info!(
            "Chat socket {}/{} refused; a validated connection holds the pair",
            owner_id, opponent_id
        );
        return;
    };
    info!("Chat socket {}/{} connected", owner_id, opponent_id);

    let (mut sender, mut receiver) = socket.split();

    // Relay queued frames to the client.
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

    // Read frames from the client into the per-type queues.
    let registry = state.registry.clone();
    let router = state.chat.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if !registry.owns(key, conn_id).await {
                debug!(
                    "Chat socket {}/{} displaced by a newer connection",
                    owner_id, opponent_id
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

    presence::close_chat_socket(&state.registry, key, conn_id).await;
    info!("Chat socket {}/{} disconnected", owner_id, opponent_id);
}
