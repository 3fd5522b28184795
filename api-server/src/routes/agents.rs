//! Agent registration and directory endpoints. DTO + handler shape follows
//! the teacher's `routes::project` (`Result<Json<T>, _>` handlers, a
//! `Router<AppState>` merged in `main.rs`).

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use orchestrator_core::model::{Agent, AgentVersion, AgentVersionStatus};
use orchestrator_core::secret_crypto::hash_secret;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentRequest {
    pub external_id: String,
    pub display_name: String,
    pub endpoint_url: String,
    pub capabilities: BTreeSet<String>,
    pub max_concurrent: u32,
    pub registered_by_user: String,
    /// Plaintext dispatch secret. Hashed for `auth_secret_hash` and, when
    /// the server has an `AGENT_TOKEN_ENCRYPTION_KEY`, also AEAD-encrypted
    /// into `auth_secret_ciphertext` so the worker can recover it for live
    /// dispatch.
    pub auth_secret: String,
    #[serde(default)]
    pub team_uuid: Option<Uuid>,
}

async fn register_agent(
    State(state): State<AppState>,
    Json(body): Json<RegisterAgentRequest>,
) -> ApiResult<Json<Agent>> {
    let auth_secret_hash = hash_secret(&body.auth_secret);
    let mut agent = Agent::new(
        body.external_id,
        body.display_name,
        body.endpoint_url,
        body.capabilities,
        body.max_concurrent,
        body.registered_by_user,
        auth_secret_hash,
    );
    if let Some(team_uuid) = body.team_uuid {
        agent = agent.with_team(team_uuid);
    }
    if state.secret_key().is_configured() {
        agent.auth_secret_ciphertext = Some(state.secret_key().encrypt(&body.auth_secret)?);
    }
    let agent = state.agent_store().register(agent).await?;
    Ok(Json(agent))
}

async fn get_agent(State(state): State<AppState>, Path(agent_uuid): Path<Uuid>) -> ApiResult<Json<Agent>> {
    Ok(Json(state.agent_store().get(agent_uuid).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListAgentsQuery {
    #[serde(rename = "teamUuid")]
    pub team_uuid: Uuid,
}

async fn list_agents_by_team(
    State(state): State<AppState>,
    Query(query): Query<ListAgentsQuery>,
) -> ApiResult<Json<Vec<Agent>>> {
    Ok(Json(state.agent_store().list_by_team(query.team_uuid).await?))
}

async fn soft_delete_agent(
    State(state): State<AppState>,
    Path(agent_uuid): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.agent_store().soft_delete(agent_uuid).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentVersionRequest {
    pub version: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub status: AgentVersionStatus,
    pub traffic_percent: u8,
    #[serde(default)]
    pub error_threshold: u32,
    #[serde(default)]
    pub is_rollback_target: bool,
}

/// §8: registers a new version of an agent's deployment. `AgentRouter`
/// only consults `active`/`canary` versions when weighting dispatch by
/// `traffic_percent`; the store rejects a write that would leave that
/// set summing to anything but 100.
async fn register_agent_version(
    State(state): State<AppState>,
    Path(agent_uuid): Path<Uuid>,
    Json(body): Json<RegisterAgentVersionRequest>,
) -> ApiResult<Json<AgentVersion>> {
    state.agent_store().get(agent_uuid).await?;
    let version = AgentVersion {
        version_uuid: Uuid::new_v4(),
        agent_uuid,
        version: body.version,
        endpoint: body.endpoint,
        capabilities: body.capabilities,
        status: body.status,
        traffic_percent: body.traffic_percent,
        error_rate_per_1000: 0,
        error_threshold: body.error_threshold,
        is_rollback_target: body.is_rollback_target,
    };
    Ok(Json(state.agent_store().register_version(version).await?))
}

async fn list_agent_versions(
    State(state): State<AppState>,
    Path(agent_uuid): Path<Uuid>,
) -> ApiResult<Json<Vec<AgentVersion>>> {
    state.agent_store().get(agent_uuid).await?;
    Ok(Json(state.agent_store().list_versions(agent_uuid).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/agents", post(register_agent).get(list_agents_by_team))
        .route("/api/agents/{agent_uuid}", get(get_agent).delete(soft_delete_agent))
        .route(
            "/api/agents/{agent_uuid}/versions",
            post(register_agent_version).get(list_agent_versions),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn build_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        (state, dir)
    }

    #[tokio::test]
    async fn registers_and_fetches_an_agent() {
        let (state, _dir) = build_state().await;
        let app = router().with_state(state);

        let body = serde_json::json!({
            "externalId": "ext-1",
            "displayName": "Agent One",
            "endpointUrl": "http://localhost:9000",
            "capabilities": ["code-review"],
            "maxConcurrent": 4,
            "registeredByUser": "user-1",
            "authSecret": "plaintext-secret",
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let agent: Agent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(agent.external_id, "ext-1");
        assert_ne!(agent.auth_secret_hash, "plaintext-secret");
        assert!(agent.auth_secret_ciphertext.is_none(), "no encryption key configured in tests");

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/agents/{}", agent.agent_uuid))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn duplicate_external_id_conflicts() {
        let (state, _dir) = build_state().await;
        let app = router().with_state(state);

        let body = serde_json::json!({
            "externalId": "dup",
            "displayName": "Agent One",
            "endpointUrl": "http://localhost:9000",
            "capabilities": [],
            "maxConcurrent": 1,
            "registeredByUser": "user-1",
            "authSecret": "plaintext-secret",
        });
        for _ in 0..2 {
            app.clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/agents")
                        .header("content-type", "application/json")
                        .body(Body::from(body.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
        }
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rejects_a_canary_split_that_does_not_sum_to_100() {
        let (state, _dir) = build_state().await;
        let app = router().with_state(state);

        let body = serde_json::json!({
            "externalId": "ext-2",
            "displayName": "Agent Two",
            "endpointUrl": "http://localhost:9000",
            "capabilities": ["code-review"],
            "maxConcurrent": 4,
            "registeredByUser": "user-1",
            "authSecret": "plaintext-secret",
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let agent: Agent = serde_json::from_slice(&bytes).unwrap();

        let version_body = serde_json::json!({
            "version": "v1",
            "endpoint": "http://localhost:9100",
            "status": "active",
            "trafficPercent": 80,
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/agents/{}/versions", agent.agent_uuid))
                    .header("content-type", "application/json")
                    .body(Body::from(version_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let second_version_body = serde_json::json!({
            "version": "v2",
            "endpoint": "http://localhost:9101",
            "status": "canary",
            "trafficPercent": 10,
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/agents/{}/versions", agent.agent_uuid))
                    .header("content-type", "application/json")
                    .body(Body::from(second_version_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
