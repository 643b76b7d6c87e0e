//! HTTP ingress for platform domain events.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use courier_notify::events::DomainEvent;
use courier_notify::hub::{NotificationHub, NotifyError};

/// `POST /hooks/event`. The hub runs on the blocking pool; the caller gets
/// 204 once the event is fully persisted (or suppressed).
pub async fn ingest(
    State(hub): State<Arc<NotificationHub>>,
    Json(event): Json<DomainEvent>,
) -> Response {
    match tokio::task::spawn_blocking(move || hub.dispatch(event)).await {
        Ok(Ok(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e @ NotifyError::SelfFollow)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
        Ok(Err(e)) => {
            error!("Domain event rejected: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
        Err(e) => {
            error!("Domain event task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
