//! Resource lock endpoints (C11): acquire/release/conflict detection for
//! agents coordinating writes to a shared resource.

use axum::extract::{Path, Query, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use orchestrator_core::model::{ConflictStrategy, ResourceLock};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireLockRequest {
    pub resource_type: String,
    pub resource_id: String,
    pub owner_agent: Uuid,
    #[serde(default)]
    pub conflict_strategy: Option<ConflictStrategy>,
    #[serde(default)]
    pub content_hash: Option<String>,
    pub timeout_seconds: i64,
}

async fn acquire_lock(
    State(state): State<AppState>,
    Json(body): Json<AcquireLockRequest>,
) -> ApiResult<Json<ResourceLock>> {
    let lock = state
        .lock_store()
        .acquire(
            body.resource_type,
            body.resource_id,
            body.owner_agent,
            body.conflict_strategy.unwrap_or(ConflictStrategy::Fail),
            body.content_hash,
            body.timeout_seconds,
        )
        .await?;
    Ok(Json(lock))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseLockRequest {
    pub resource_type: String,
    pub resource_id: String,
    pub owner_agent: Uuid,
}

async fn release_lock(
    State(state): State<AppState>,
    Json(body): Json<ReleaseLockRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .lock_store()
        .release(&body.resource_type, &body.resource_id, body.owner_agent)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct GetLockQuery {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(rename = "resourceId")]
    pub resource_id: String,
}

async fn get_lock(
    State(state): State<AppState>,
    Query(query): Query<GetLockQuery>,
) -> ApiResult<Json<Option<ResourceLock>>> {
    Ok(Json(
        state.lock_store().get(&query.resource_type, &query.resource_id).await?,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectConflictRequest {
    pub current_hash: String,
}

async fn detect_conflict(
    State(state): State<AppState>,
    Path(lock_uuid): Path<Uuid>,
    Json(body): Json<DetectConflictRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let conflicted = state.lock_store().detect_conflict(lock_uuid, &body.current_hash).await?;
    Ok(Json(serde_json::json!({ "conflicted": conflicted })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/locks/acquire", post(acquire_lock))
        .route("/api/locks/release", post(release_lock))
        .route("/api/locks", axum::routing::get(get_lock))
        .route("/api/locks/{lock_uuid}/conflict", post(detect_conflict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn acquire_then_release_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let app = router().with_state(state);
        let owner = Uuid::new_v4();

        let body = serde_json::json!({
            "resourceType": "file",
            "resourceId": "src/main.rs",
            "ownerAgent": owner,
            "timeoutSeconds": 300,
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/locks/acquire")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let lock: ResourceLock = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(lock.owner_agent, owner);

        let body = serde_json::json!({ "resourceType": "file", "resourceId": "src/main.rs", "ownerAgent": owner });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/locks/release")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn acquire_conflicts_when_held_by_another_agent() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let app = router().with_state(state);
        let holder = Uuid::new_v4();
        let challenger = Uuid::new_v4();

        let body = serde_json::json!({
            "resourceType": "file",
            "resourceId": "src/main.rs",
            "ownerAgent": holder,
            "timeoutSeconds": 300,
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/locks/acquire")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = serde_json::json!({
            "resourceType": "file",
            "resourceId": "src/main.rs",
            "ownerAgent": challenger,
            "timeoutSeconds": 300,
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/locks/acquire")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let error: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let message = error["error"].as_str().unwrap();
        assert!(message.contains("RESOURCE_LOCKED"));
        assert!(message.contains(&holder.to_string()), "conflict must carry the current holder");
    }

    #[tokio::test]
    async fn same_owner_reacquiring_is_idempotent_and_bumps_version() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let app = router().with_state(state);
        let owner = Uuid::new_v4();

        let body = serde_json::json!({
            "resourceType": "file",
            "resourceId": "src/main.rs",
            "ownerAgent": owner,
            "timeoutSeconds": 300,
        });
        for expected_version in [1, 2] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/locks/acquire")
                        .header("content-type", "application/json")
                        .body(Body::from(body.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let lock: ResourceLock = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(lock.version, expected_version);
        }
    }
}
