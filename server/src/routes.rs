use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;
use crate::ws::handler;

/// Build the full axum Router: the signaling socket and the health check.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(handler::ws_upgrade))
        .route("/health", get(health_check))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    tokens: usize,
    waiting: usize,
    rooms: usize,
    uptime_secs: u64,
}

/// GET /health — current registry counts and uptime.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.registry.counts();
    Json(HealthResponse {
        tokens: counts.tokens,
        waiting: counts.waiting,
        rooms: counts.rooms,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
