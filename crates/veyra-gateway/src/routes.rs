use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{error, info};

use veyra_core::types::ThreadId;
use veyra_router::TurnRequest;

use crate::state::AppState;

// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// POST /api/turn
pub async fn turn(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if request.message.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if request.thread_id.is_empty() || request.user_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    info!(thread_id = %request.thread_id, "Turn request received");

    match state.dispatcher.run_turn(request).await {
        Ok(response) => Ok(Json(serde_json::to_value(response).map_err(|_| {
            StatusCode::INTERNAL_SERVER_ERROR
        })?)),
        // Nothing was committed; the caller may safely retry.
        Err(e) if e.is_fatal_for_turn() => {
            error!(error = %e, "Turn aborted on persistence failure");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(e) => {
            error!(error = %e, "Turn failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

// GET /api/threads/:id/checkpoints?limit=20
pub async fn thread_checkpoints(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let thread_id = ThreadId::from_string(&id);
    match state.store.history(&thread_id, q.limit) {
        Ok(records) => {
            let checkpoints: Vec<serde_json::Value> = records
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "checkpoint_id": r.checkpoint_id,
                        "parent_checkpoint_id": r.parent_checkpoint_id,
                        "created_at": r.created_at.to_rfc3339(),
                    })
                })
                .collect();
            Ok(Json(serde_json::json!({
                "thread_id": id,
                "checkpoints": checkpoints,
            })))
        }
        Err(e) => {
            error!(error = %e, thread_id = %id, "Checkpoint listing failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
