//! Webhook registration endpoints (C9). Delivery itself is driven by the
//! event-bus subscriber and sweep loop wired in `main.rs`, via
//! `WebhookDispatcher`.

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use orchestrator_core::model::Webhook;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWebhookRequest {
    pub team_uuid: Uuid,
    pub url: String,
    pub secret: String,
    pub events: BTreeSet<String>,
}

async fn register_webhook(
    State(state): State<AppState>,
    Json(body): Json<RegisterWebhookRequest>,
) -> ApiResult<Json<Webhook>> {
    let webhook = Webhook::new(body.team_uuid, body.url, body.secret, body.events);
    Ok(Json(state.webhook_store().register(webhook).await?))
}

async fn get_webhook(State(state): State<AppState>, Path(webhook_uuid): Path<Uuid>) -> ApiResult<Json<Webhook>> {
    Ok(Json(state.webhook_store().get(webhook_uuid).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListWebhooksQuery {
    #[serde(rename = "teamUuid")]
    pub team_uuid: Uuid,
    #[serde(rename = "eventType")]
    pub event_type: String,
}

async fn list_webhooks(
    State(state): State<AppState>,
    Query(query): Query<ListWebhooksQuery>,
) -> ApiResult<Json<Vec<Webhook>>> {
    Ok(Json(
        state
            .webhook_store()
            .list_for_team_event(query.team_uuid, &query.event_type)
            .await?,
    ))
}

async fn deactivate_webhook(
    State(state): State<AppState>,
    Path(webhook_uuid): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.webhook_store().deactivate(webhook_uuid).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/webhooks", post(register_webhook).get(list_webhooks))
        .route("/api/webhooks/{webhook_uuid}", get(get_webhook).delete(deactivate_webhook))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn registers_lists_and_deactivates_a_webhook() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let app = router().with_state(state);
        let team_uuid = Uuid::new_v4();

        let body = serde_json::json!({
            "teamUuid": team_uuid,
            "url": "https://example.com/hook",
            "secret": "s3cret",
            "events": ["task:completed"],
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let webhook: Webhook = serde_json::from_slice(&bytes).unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!(
                        "/api/webhooks?teamUuid={}&eventType=task:completed",
                        team_uuid
                    ))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let hooks: Vec<Webhook> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(hooks.len(), 1);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/webhooks/{}", webhook.webhook_uuid))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
