//! Approval gate endpoints (C11).

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use orchestrator_core::model::ApprovalGate;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApprovalRequest {
    pub team_uuid: Uuid,
    pub title: String,
    #[serde(default)]
    pub approvers: BTreeSet<String>,
    #[serde(default)]
    pub requested_by_agent: Option<Uuid>,
    #[serde(default)]
    pub requested_by_user: Option<String>,
    #[serde(default)]
    pub task_uuid: Option<Uuid>,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn create_approval(
    State(state): State<AppState>,
    Json(body): Json<CreateApprovalRequest>,
) -> ApiResult<Json<ApprovalGate>> {
    let mut gate = ApprovalGate::new(body.team_uuid, body.title);
    gate.approvers = body.approvers;
    gate.requested_by_agent = body.requested_by_agent;
    gate.requested_by_user = body.requested_by_user;
    gate.task_uuid = body.task_uuid;
    gate.expires_at = body.expires_at;
    Ok(Json(state.approval_store().create(gate).await?))
}

async fn get_approval(State(state): State<AppState>, Path(gate_uuid): Path<Uuid>) -> ApiResult<Json<ApprovalGate>> {
    Ok(Json(state.approval_store().get(gate_uuid).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListApprovalsQuery {
    #[serde(rename = "teamUuid")]
    pub team_uuid: Uuid,
}

async fn list_approvals(
    State(state): State<AppState>,
    Query(query): Query<ListApprovalsQuery>,
) -> ApiResult<Json<Vec<ApprovalGate>>> {
    Ok(Json(state.approval_store().list_by_team(query.team_uuid).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondApprovalRequest {
    pub responder: String,
    pub approve: bool,
    #[serde(default)]
    pub note: Option<String>,
}

async fn respond_approval(
    State(state): State<AppState>,
    Path(gate_uuid): Path<Uuid>,
    Json(body): Json<RespondApprovalRequest>,
) -> ApiResult<Json<ApprovalGate>> {
    Ok(Json(
        state
            .approval_store()
            .respond(gate_uuid, &body.responder, body.approve, body.note, state.team_store())
            .await?,
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/approvals", post(create_approval).get(list_approvals))
        .route("/api/approvals/{gate_uuid}", get(get_approval))
        .route("/api/approvals/{gate_uuid}/respond", post(respond_approval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn creates_and_responds_to_an_approval_gate() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let team = orchestrator_core::model::Team::new("eng".to_string(), "owner".to_string(), 10);
        let team_uuid = team.team_uuid;
        state.team_store().create(team, "owner".to_string()).await.unwrap();
        state
            .team_store()
            .add_member(team_uuid, "user-1".to_string(), orchestrator_core::model::TeamRole::Admin)
            .await
            .unwrap();
        let app = router().with_state(state);

        let body = serde_json::json!({ "teamUuid": team_uuid, "title": "Deploy to prod" });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/approvals")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let gate: ApprovalGate = serde_json::from_slice(&bytes).unwrap();

        let body = serde_json::json!({ "responder": "user-1", "approve": true });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/approvals/{}/respond", gate.gate_uuid))
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/approvals/{}/respond", gate.gate_uuid))
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rejects_a_response_from_a_non_approver() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let team = orchestrator_core::model::Team::new("eng".to_string(), "owner".to_string(), 10);
        let team_uuid = team.team_uuid;
        state.team_store().create(team, "owner".to_string()).await.unwrap();
        state
            .team_store()
            .add_member(team_uuid, "rando".to_string(), orchestrator_core::model::TeamRole::Member)
            .await
            .unwrap();
        let app = router().with_state(state);

        let body = serde_json::json!({ "teamUuid": team_uuid, "title": "Deploy to prod" });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/approvals")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let gate: ApprovalGate = serde_json::from_slice(&bytes).unwrap();

        let body = serde_json::json!({ "responder": "rando", "approve": true });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/approvals/{}/respond", gate.gate_uuid))
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
