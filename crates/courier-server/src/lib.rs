pub mod hooks;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use courier_db::Database;
use courier_gateway::registry::Registry;
use courier_gateway::router::{start_chat_handlers, start_delivery, start_notify_handlers};
use courier_gateway::{GatewayState, chat, notify};
use courier_notify::hub::NotificationHub;

/// Spawns the handler loops and wires registry, delivery queue and hub onto
/// one router. Must run inside a tokio runtime.
pub fn build(db: Arc<Database>) -> (Router, Registry, Arc<NotificationHub>) {
    let registry = Registry::new();
    let chat_router = start_chat_handlers(db.clone(), registry.clone());
    let notify_router = start_notify_handlers(db.clone(), registry.clone());
    let delivery_tx = start_delivery(db.clone(), registry.clone());
    let hub = Arc::new(NotificationHub::new(db.clone(), delivery_tx));

    let state = GatewayState {
        db,
        registry: registry.clone(),
        chat: chat_router,
        notify: notify_router,
    };

    let socket_routes = Router::new()
        .route(
            "/chat/{owner_id}/{token}/{opponent_id}",
            get(chat::chat_upgrade),
        )
        .route("/notifications/{user_id}", get(notify::notify_upgrade))
        .with_state(state);

    let hook_routes = Router::new()
        .route("/hooks/event", post(hooks::ingest))
        .with_state(hub.clone());

    let app = Router::new()
        .merge(socket_routes)
        .merge(hook_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    (app, registry, hub)
}
