//! Liveness endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    data_dir: String,
    connected_agents: usize,
    queued_jobs: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data_dir: state.config().data_dir.to_string_lossy().to_string(),
        connected_agents: state.gateway().connected_agents().await.len(),
        queued_jobs: state.queue().pending_len(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
