//! C11 persistence for `ApprovalGate`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{ApprovalGate, ApprovalStatus};
use crate::store::team_store::TeamStore;

use super::file_backed::{load_snapshot, write_snapshot};

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    gates: Vec<ApprovalGate>,
}

#[derive(Clone)]
pub struct ApprovalStore {
    gates: Arc<RwLock<HashMap<Uuid, ApprovalGate>>>,
    path: PathBuf,
}

impl ApprovalStore {
    pub async fn new(path: PathBuf) -> Result<Self> {
        let snapshot: Snapshot = load_snapshot(&path).await?;
        let gates = snapshot.gates.into_iter().map(|g| (g.gate_uuid, g)).collect();
        Ok(Self {
            gates: Arc::new(RwLock::new(gates)),
            path,
        })
    }

    async fn persist(&self, gates: &HashMap<Uuid, ApprovalGate>) -> Result<()> {
        let snapshot = Snapshot {
            gates: gates.values().cloned().collect(),
        };
        write_snapshot(&self.path, &snapshot).await
    }

    pub async fn create(&self, gate: ApprovalGate) -> Result<ApprovalGate> {
        let mut gates = self.gates.write().await;
        gates.insert(gate.gate_uuid, gate.clone());
        self.persist(&gates).await?;
        Ok(gate)
    }

    pub async fn get(&self, gate_uuid: Uuid) -> Result<ApprovalGate> {
        let gates = self.gates.read().await;
        gates
            .get(&gate_uuid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("approval gate {gate_uuid} not found")))
    }

    /// §4.11: respond requires pending status and the responder to be an
    /// approver, or (if `approvers` is unset) a team admin; double response
    /// is a conflict.
    pub async fn respond(
        &self,
        gate_uuid: Uuid,
        responder: &str,
        approve: bool,
        note: Option<String>,
        teams: &TeamStore,
    ) -> Result<ApprovalGate> {
        let mut gates = self.gates.write().await;
        let gate = gates
            .get_mut(&gate_uuid)
            .ok_or_else(|| Error::NotFound(format!("approval gate {gate_uuid} not found")))?;
        if gate.status != ApprovalStatus::Pending {
            return Err(Error::Conflict(format!(
                "approval gate {gate_uuid} already responded to"
            )));
        }
        let is_team_admin = teams
            .role_of(gate.team_uuid, responder)
            .await?
            .is_some_and(|role| role.can_approve());
        if !gate.can_respond(responder, is_team_admin) {
            return Err(Error::Authorization(format!(
                "{responder} is not an approver or team admin for gate {gate_uuid}"
            )));
        }
        gate.status = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        gate.responded_by = Some(responder.to_string());
        gate.response_note = note;
        let updated = gate.clone();
        self.persist(&gates).await?;
        Ok(updated)
    }

    /// Expiry sweep: `pending → expired` for gates past `expires_at`.
    pub async fn expire_overdue(&self) -> Result<Vec<ApprovalGate>> {
        let now = Utc::now();
        let mut gates = self.gates.write().await;
        let mut expired = Vec::new();
        for gate in gates.values_mut() {
            if gate.status == ApprovalStatus::Pending && gate.is_expired(now) {
                gate.status = ApprovalStatus::Expired;
                expired.push(gate.clone());
            }
        }
        if !expired.is_empty() {
            self.persist(&gates).await?;
        }
        Ok(expired)
    }

    pub async fn list_by_team(&self, team_uuid: Uuid) -> Result<Vec<ApprovalGate>> {
        let gates = self.gates.read().await;
        Ok(gates
            .values()
            .filter(|g| g.team_uuid == team_uuid)
            .cloned()
            .collect())
    }
}
