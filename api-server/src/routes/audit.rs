//! Audit trail listing and signature verification (C3).

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use orchestrator_core::audit_signer::{self, VerificationOutcome};
use orchestrator_core::model::AuditRecord;
use orchestrator_core::store::audit_store::AuditListQuery;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQueryParams {
    pub run_id: Option<String>,
    pub stage_id: Option<String>,
    pub agent_id: Option<String>,
    pub action: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl From<AuditQueryParams> for AuditListQuery {
    fn from(params: AuditQueryParams) -> Self {
        AuditListQuery {
            run_id: params.run_id,
            stage_id: params.stage_id,
            agent_id: params.agent_id,
            action: params.action,
            offset: params.offset,
            limit: params.limit,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditPage {
    records: Vec<AuditRecord>,
    has_more: bool,
}

async fn list_audit_records(
    State(state): State<AppState>,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<Json<AuditPage>> {
    let query: AuditListQuery = params.into();
    let (records, has_more) = state.audit_store().list_paginated(&query).await;
    Ok(Json(AuditPage { records, has_more }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditVerification {
    record_id: Uuid,
    outcome: VerificationOutcomeDto,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum VerificationOutcomeDto {
    Valid,
    Invalid,
    Unsigned,
}

impl From<VerificationOutcome> for VerificationOutcomeDto {
    fn from(outcome: VerificationOutcome) -> Self {
        match outcome {
            VerificationOutcome::Valid => VerificationOutcomeDto::Valid,
            VerificationOutcome::Invalid => VerificationOutcomeDto::Invalid,
            VerificationOutcome::Unsigned => VerificationOutcomeDto::Unsigned,
        }
    }
}

/// §3: "verifiable per workflow run" — re-canonicalizes the stored record
/// with its signature stripped and checks it against the signature that
/// was recorded alongside it, the same shape `emit_audit` signed.
async fn verify_audit_record(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> ApiResult<Json<AuditVerification>> {
    let mut record = state
        .audit_store()
        .get(record_id)
        .await
        .ok_or_else(|| ApiError(orchestrator_core::Error::NotFound(format!("audit record {record_id} not found"))))?;
    let signature = record.signature.take();
    let record_value = serde_json::to_value(&record).map_err(orchestrator_core::Error::from)?;
    let outcome = audit_signer::verify_record(state.signing_key(), &record_value, signature.as_ref());
    Ok(Json(AuditVerification {
        record_id,
        outcome: outcome.into(),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/audit", get(list_audit_records))
        .route("/api/audit/{record_id}/verify", get(verify_audit_record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn lists_empty_audit_trail_for_fresh_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let app = router().with_state(state);

        let response = app
            .oneshot(Request::builder().uri("/api/audit").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let page: AuditPage = serde_json::from_slice(&bytes).unwrap();
        assert!(page.records.is_empty());
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn verify_reports_unsigned_when_no_signing_key_configured() {
        use orchestrator_core::model::AuditAction;

        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let record = AuditRecord {
            record_id: Uuid::new_v4(),
            run_id: "run-1".into(),
            stage_id: "stage-1".into(),
            agent_id: None,
            action: AuditAction::Execute,
            status: "ok".into(),
            input_hash: "h1".into(),
            output_hash: None,
            logged_at: chrono::Utc::now(),
            signature: None,
        };
        let record_id = record.record_id;
        state.audit_store().append(record).await.unwrap();

        let app = router().with_state(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/audit/{record_id}/verify"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let verification: AuditVerification = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(verification.record_id, record_id);
    }

    #[tokio::test]
    async fn verify_404s_for_an_unknown_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(dir.path().to_path_buf()).await.unwrap();
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/audit/{}/verify", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
