use std::sync::Arc;

use veyra_core::config::GatewayConfig;
use veyra_router::RouteDispatcher;
use veyra_store::SqliteStateStore;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub dispatcher: Arc<RouteDispatcher>,
    pub store: Arc<SqliteStateStore>,
}
