pub mod chat;
pub mod notify;
pub mod registry;
pub mod router;

mod handlers;
mod participants;
mod presence;

use std::sync::Arc;

use courier_db::Database;

use crate::registry::Registry;
use crate::router::{ChatRouter, NotifyRouter};

/// Shared state behind the two socket routes.
#[derive(Clone)]
pub struct GatewayState {
    pub db: Arc<Database>,
    pub registry: Registry,
    pub chat: ChatRouter,
    pub notify: NotifyRouter,
}
