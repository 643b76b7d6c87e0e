use tracing::debug;
use uuid::Uuid;

use courier_types::frames::ServerFrame;

use crate::registry::{ConnectionKey, Registry};

/// Tells a freshly authenticated pair socket whether its opponent is online,
/// and tells the opponent's validated socket that this end just came up.
pub(crate) async fn announce_online(registry: &Registry, key: ConnectionKey) {
    let Some(reciprocal) = key.reciprocal() else {
        return;
    };
    let opponent_online = registry.is_online(reciprocal).await;
    registry
        .send(
            key,
            ServerFrame::OnlineCheck {
                is_online: opponent_online,
            },
        )
        .await;
    if !registry
        .send_if_valid(reciprocal, ServerFrame::OnlineCheck { is_online: true })
        .await
    {
        debug!("Online announcement for {:?} not delivered; opponent absent", reciprocal);
    }
}

/// Delivers a frame to both ends of a pair. The opponent's copy goes out
/// first and is re-checked against validity at dispatch time; the sender
/// always gets theirs.
pub(crate) async fn fan_out(registry: &Registry, origin: ConnectionKey, frame: ServerFrame) {
    if let Some(reciprocal) = origin.reciprocal() {
        if !registry.send_if_valid(reciprocal, frame.clone()).await {
            debug!("Fan-out to {:?} dropped; opponent left", reciprocal);
        }
    }
    registry.send(origin, frame).await;
}

/// Tears down one chat socket's registry entry and pushes an offline check
/// to the opponent. A close that lost its key to a newer socket does
/// nothing.
pub(crate) async fn close_chat_socket(registry: &Registry, key: ConnectionKey, conn_id: Uuid) {
    if !registry.remove(key, conn_id).await {
        return;
    }
    if let Some(reciprocal) = key.reciprocal() {
        registry
            .send_if_valid(reciprocal, ServerFrame::OnlineCheck { is_online: false })
            .await;
    }
}
