//! Gateway routes for the per-agent WebSocket connection (C6).

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use crate::gateway::agent_ws_handler;
use crate::state::AppState;

async fn list_connected_agents(State(state): State<AppState>) -> Json<Vec<Uuid>> {
    Json(state.gateway().connected_agents().await)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws/agent", get(agent_ws_handler))
        .route("/api/gateway/connected", get(list_connected_agents))
}
