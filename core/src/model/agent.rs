use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Degraded,
    Offline,
}

impl AgentStatus {
    /// §4.4 health factor: `{online: 100, degraded: 40, offline: 0}`.
    pub fn health_score(&self) -> f64 {
        match self {
            AgentStatus::Online => 100.0,
            AgentStatus::Degraded => 40.0,
            AgentStatus::Offline => 0.0,
        }
    }

    pub fn is_routable(&self) -> bool {
        matches!(self, AgentStatus::Online | AgentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub agent_uuid: Uuid,
    pub external_id: String,
    pub display_name: String,
    pub endpoint_url: String,
    pub capabilities: BTreeSet<String>,
    pub max_concurrent: u32,
    pub status: AgentStatus,
    pub ws_connected: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub team_uuid: Option<Uuid>,
    pub registered_by_user: String,
    pub auth_secret_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_secret_ciphertext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soft_deleted_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(
        external_id: String,
        display_name: String,
        endpoint_url: String,
        capabilities: BTreeSet<String>,
        max_concurrent: u32,
        registered_by_user: String,
        auth_secret_hash: String,
    ) -> Self {
        Self {
            agent_uuid: Uuid::new_v4(),
            external_id,
            display_name,
            endpoint_url,
            capabilities,
            max_concurrent,
            status: AgentStatus::Offline,
            ws_connected: false,
            last_heartbeat: None,
            team_uuid: None,
            registered_by_user,
            auth_secret_hash,
            auth_secret_ciphertext: None,
            soft_deleted_at: None,
        }
    }

    pub fn with_team(mut self, team_uuid: Uuid) -> Self {
        self.team_uuid = Some(team_uuid);
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn is_deleted(&self) -> bool {
        self.soft_deleted_at.is_some()
    }

    pub fn mark_online(&mut self) {
        self.status = AgentStatus::Online;
        self.ws_connected = true;
        self.last_heartbeat = Some(Utc::now());
    }

    pub fn mark_offline(&mut self) {
        self.status = AgentStatus::Offline;
        self.ws_connected = false;
    }

    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_scores_match_spec() {
        assert_eq!(AgentStatus::Online.health_score(), 100.0);
        assert_eq!(AgentStatus::Degraded.health_score(), 40.0);
        assert_eq!(AgentStatus::Offline.health_score(), 0.0);
    }

    #[test]
    fn deleted_agent_is_flagged() {
        let mut agent = Agent::new(
            "ext-1".into(),
            "Agent One".into(),
            "http://localhost:9000".into(),
            BTreeSet::from(["c1".to_string()]),
            4,
            "user-1".into(),
            "hash".into(),
        );
        assert!(!agent.is_deleted());
        agent.soft_deleted_at = Some(Utc::now());
        assert!(agent.is_deleted());
    }
}
