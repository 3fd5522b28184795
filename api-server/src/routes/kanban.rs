//! Kanban task lifecycle endpoints (C8), thin HTTP wrappers over
//! `KanbanEngine`.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use orchestrator_core::kanban_engine::KanbanEngine;
use orchestrator_core::model::{KanbanTask, TaskPriority};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateTaskRequest {
    pub team_uuid: Uuid,
    pub created_by_agent: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_capability: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    #[serde(default)]
    pub input_mapping: Option<serde_json::Map<String, Value>>,
}

async fn delegate_task(
    State(state): State<AppState>,
    Json(body): Json<DelegateTaskRequest>,
) -> ApiResult<Json<KanbanTask>> {
    let engine = KanbanEngine::new(state.kanban_store(), state.bus());
    let task = engine
        .delegate(
            body.team_uuid,
            body.created_by_agent,
            body.title,
            body.description,
            body.required_capability,
            body.priority.unwrap_or(TaskPriority::Medium),
            body.depends_on,
            body.input_mapping,
        )
        .await?;
    Ok(Json(task))
}

async fn get_task(State(state): State<AppState>, Path(task_uuid): Path<Uuid>) -> ApiResult<Json<KanbanTask>> {
    Ok(Json(state.kanban_store().get(task_uuid).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(rename = "teamUuid")]
    pub team_uuid: Uuid,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<Vec<KanbanTask>>> {
    Ok(Json(state.kanban_store().list_by_team(query.team_uuid).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub agent_uuid: Uuid,
    pub agent_team: Uuid,
}

async fn claim_task(
    State(state): State<AppState>,
    Path(task_uuid): Path<Uuid>,
    Json(body): Json<ClaimRequest>,
) -> ApiResult<Json<KanbanTask>> {
    let engine = KanbanEngine::new(state.kanban_store(), state.bus());
    Ok(Json(engine.claim(task_uuid, body.agent_uuid, body.agent_team).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    pub agent_uuid: Uuid,
    pub current: u64,
    pub total: u64,
    #[serde(default)]
    pub message: Option<String>,
}

async fn progress_task(
    State(state): State<AppState>,
    Path(task_uuid): Path<Uuid>,
    Json(body): Json<ProgressRequest>,
) -> ApiResult<Json<KanbanTask>> {
    let engine = KanbanEngine::new(state.kanban_store(), state.bus());
    Ok(Json(
        engine
            .progress(task_uuid, body.agent_uuid, body.current, body.total, body.message)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub agent_uuid: Uuid,
    pub result: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub move_to_review: bool,
}

async fn complete_task(
    State(state): State<AppState>,
    Path(task_uuid): Path<Uuid>,
    Json(body): Json<CompleteRequest>,
) -> ApiResult<Json<KanbanTask>> {
    let engine = KanbanEngine::new(state.kanban_store(), state.bus());
    Ok(Json(
        engine
            .complete(task_uuid, body.agent_uuid, body.result, body.output, body.move_to_review)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailRequest {
    pub agent_uuid: Uuid,
    pub error: String,
}

async fn fail_task(
    State(state): State<AppState>,
    Path(task_uuid): Path<Uuid>,
    Json(body): Json<FailRequest>,
) -> ApiResult<Json<KanbanTask>> {
    let engine = KanbanEngine::new(state.kanban_store(), state.bus());
    Ok(Json(engine.fail(task_uuid, body.agent_uuid, body.error).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/kanban/tasks", post(delegate_task).get(list_tasks))
        .route("/api/kanban/tasks/{task_uuid}", get(get_task))
        .route("/api/kanban/tasks/{task_uuid}/claim", post(claim_task))
        .route("/api/kanban/tasks/{task_uuid}/progress", post(progress_task))
        .route("/api/kanban/tasks/{task_uuid}/complete", post(complete_task))
        .route("/api/kanban/tasks/{task_uuid}/fail", post(fail_task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn delegate_claim_progress_complete_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let app = router().with_state(state);
        let team_uuid = Uuid::new_v4();
        let agent_uuid = Uuid::new_v4();

        let body = serde_json::json!({
            "teamUuid": team_uuid,
            "createdByAgent": agent_uuid,
            "title": "Review PR",
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/kanban/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let task: KanbanTask = serde_json::from_slice(&bytes).unwrap();

        let claim_body = serde_json::json!({ "agentUuid": agent_uuid, "agentTeam": team_uuid });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/kanban/tasks/{}/claim", task.task_uuid))
                    .header("content-type", "application/json")
                    .body(Body::from(claim_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let complete_body = serde_json::json!({ "agentUuid": agent_uuid, "result": "done" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/kanban/tasks/{}/complete", task.task_uuid))
                    .header("content-type", "application/json")
                    .body(Body::from(complete_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let task: KanbanTask = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(task.status, orchestrator_core::model::TaskStatus::Done);
    }
}
