//! Workflow run submission and inspection endpoints (C7/C10). Submission
//! persists the run then enqueues its `job_id = run_id` onto the
//! `QueueBroker`; the background worker loop started in `main.rs` drains it.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use orchestrator_core::model::{StageExecution, WorkflowDefinition, WorkflowRun};
use orchestrator_core::queue::WorkflowJob;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRunRequest {
    pub user_uuid: String,
    pub workflow_name: String,
    pub definition: WorkflowDefinition,
    #[serde(default)]
    pub input: serde_json::Map<String, Value>,
}

async fn submit_run(
    State(state): State<AppState>,
    Json(body): Json<SubmitRunRequest>,
) -> ApiResult<Json<WorkflowRun>> {
    let run = WorkflowRun::new(body.user_uuid.clone(), body.workflow_name, body.definition, body.input);
    let run = state.workflow_store().create_run(run).await?;
    state.queue().publish(WorkflowJob {
        job_id: run.run_id.clone(),
        workflow_run_id: run.run_id.clone(),
        user_uuid: body.user_uuid,
    });
    Ok(Json(run))
}

async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> ApiResult<Json<WorkflowRun>> {
    Ok(Json(state.workflow_store().get_run(&run_id).await?))
}

async fn list_stage_executions(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Vec<StageExecution>>> {
    Ok(Json(state.workflow_store().list_stage_executions(&run_id).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/runs", post(submit_run))
        .route("/api/workflows/runs/{run_id}", get(get_run))
        .route("/api/workflows/runs/{run_id}/stages", get(list_stage_executions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn submits_a_run_and_enqueues_it() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let queue = state.queue_arc();
        let app = router().with_state(state);

        let body = serde_json::json!({
            "userUuid": "user-1",
            "workflowName": "code-review",
            "definition": { "stages": [] },
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/workflows/runs")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let run: WorkflowRun = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(queue.pending_len(), 1);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/workflows/runs/{}", run.run_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
