use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalGate {
    pub gate_uuid: Uuid,
    pub team_uuid: Uuid,
    pub title: String,
    pub status: ApprovalStatus,
    /// Empty set ⇒ any team admin may respond (§4.11).
    #[serde(default)]
    pub approvers: BTreeSet<String>,
    pub requested_by_agent: Option<Uuid>,
    pub requested_by_user: Option<String>,
    pub task_uuid: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub responded_by: Option<String>,
    pub response_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalGate {
    pub fn new(team_uuid: Uuid, title: String) -> Self {
        Self {
            gate_uuid: Uuid::new_v4(),
            team_uuid,
            title,
            status: ApprovalStatus::Pending,
            approvers: BTreeSet::new(),
            requested_by_agent: None,
            requested_by_user: None,
            task_uuid: None,
            expires_at: None,
            responded_by: None,
            response_note: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }

    pub fn can_respond(&self, user: &str, is_team_admin: bool) -> bool {
        if self.approvers.is_empty() {
            is_team_admin
        } else {
            self.approvers.contains(user)
        }
    }
}
