use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Owner,
    Admin,
    Member,
}

impl TeamRole {
    pub fn can_manage_members(&self) -> bool {
        matches!(self, TeamRole::Owner | TeamRole::Admin)
    }

    pub fn can_approve(&self) -> bool {
        matches!(self, TeamRole::Owner | TeamRole::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub team_uuid: Uuid,
    pub name: String,
    pub owner_user: String,
    pub max_agents: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Team {
    pub fn new(name: String, owner_user: String, max_agents: u32) -> Self {
        Self {
            team_uuid: Uuid::new_v4(),
            name,
            owner_user,
            max_agents,
            archived_at: None,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub team_uuid: Uuid,
    pub user_uuid: String,
    pub role: TeamRole,
}
