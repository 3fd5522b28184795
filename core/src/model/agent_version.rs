use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentVersionStatus {
    Draft,
    Active,
    Canary,
    Inactive,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentVersion {
    pub version_uuid: Uuid,
    pub agent_uuid: Uuid,
    pub version: String,
    pub endpoint: String,
    pub capabilities: BTreeSet<String>,
    pub status: AgentVersionStatus,
    pub traffic_percent: u8,
    pub error_rate_per_1000: u32,
    pub error_threshold: u32,
    pub is_rollback_target: bool,
}

impl AgentVersion {
    pub fn breaches_error_threshold(&self) -> bool {
        self.error_rate_per_1000 >= self.error_threshold
    }
}
