use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use veyra_core::config::GatewayConfig;
use veyra_router::RouteDispatcher;
use veyra_store::SqliteStateStore;

use crate::routes;
use crate::state::AppState;

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    dispatcher: Arc<RouteDispatcher>,
    store: Arc<SqliteStateStore>,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        dispatcher: Arc<RouteDispatcher>,
        store: Arc<SqliteStateStore>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            store,
        }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            dispatcher: self.dispatcher.clone(),
            store: self.store.clone(),
        });

        let app = router(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/turn", post(routes::turn))
        .route(
            "/api/threads/{id}/checkpoints",
            get(routes::thread_checkpoints),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
