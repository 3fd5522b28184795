//! Team creation and membership endpoints.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use orchestrator_core::model::{Team, TeamRole};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTeamRequest {
    pub name: String,
    pub owner_user: String,
    pub max_agents: u32,
}

async fn create_team(
    State(state): State<AppState>,
    Json(body): Json<CreateTeamRequest>,
) -> ApiResult<Json<Team>> {
    let team = Team::new(body.name, body.owner_user.clone(), body.max_agents);
    let team = state.team_store().create(team, body.owner_user).await?;
    Ok(Json(team))
}

async fn get_team(State(state): State<AppState>, Path(team_uuid): Path<Uuid>) -> ApiResult<Json<Team>> {
    Ok(Json(state.team_store().get(team_uuid).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_uuid: String,
    pub role: TeamRole,
}

async fn add_member(
    State(state): State<AppState>,
    Path(team_uuid): Path<Uuid>,
    Json(body): Json<AddMemberRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.team_store().add_member(team_uuid, body.user_uuid, body.role).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/teams", post(create_team))
        .route("/api/teams/{team_uuid}", get(get_team))
        .route("/api/teams/{team_uuid}/members", post(add_member))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn creates_team_and_adds_member() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let app = router().with_state(state);

        let body = serde_json::json!({ "name": "Platform", "ownerUser": "user-1", "maxAgents": 10 });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/teams")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let team: Team = serde_json::from_slice(&bytes).unwrap();

        let body = serde_json::json!({ "userUuid": "user-2", "role": "member" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/teams/{}/members", team.team_uuid))
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
