use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Execute,
    Retry,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSignature {
    pub algorithm: String,
    pub signer: String,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub record_id: Uuid,
    pub run_id: String,
    pub stage_id: String,
    pub agent_id: Option<String>,
    pub action: AuditAction,
    pub status: String,
    pub input_hash: String,
    pub output_hash: Option<String>,
    pub logged_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<AuditSignature>,
}
