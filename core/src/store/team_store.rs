//! C12 persistence for `Team` and its membership set.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Team, TeamMember, TeamRole};

use super::file_backed::{load_snapshot, write_snapshot};

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    teams: Vec<Team>,
    members: Vec<TeamMember>,
}

struct State {
    teams: HashMap<Uuid, Team>,
    members: Vec<TeamMember>,
}

#[derive(Clone)]
pub struct TeamStore {
    state: Arc<RwLock<State>>,
    path: PathBuf,
}

impl TeamStore {
    pub async fn new(path: PathBuf) -> Result<Self> {
        let snapshot: Snapshot = load_snapshot(&path).await?;
        let teams = snapshot.teams.into_iter().map(|t| (t.team_uuid, t)).collect();
        Ok(Self {
            state: Arc::new(RwLock::new(State {
                teams,
                members: snapshot.members,
            })),
            path,
        })
    }

    async fn persist(&self, state: &State) -> Result<()> {
        let snapshot = Snapshot {
            teams: state.teams.values().cloned().collect(),
            members: state.members.clone(),
        };
        write_snapshot(&self.path, &snapshot).await
    }

    pub async fn create(&self, team: Team, owner_user: String) -> Result<Team> {
        let mut state = self.state.write().await;
        state.teams.insert(team.team_uuid, team.clone());
        state.members.push(TeamMember {
            team_uuid: team.team_uuid,
            user_uuid: owner_user,
            role: TeamRole::Owner,
        });
        self.persist(&state).await?;
        Ok(team)
    }

    pub async fn get(&self, team_uuid: Uuid) -> Result<Team> {
        let state = self.state.read().await;
        state
            .teams
            .get(&team_uuid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("team {team_uuid} not found")))
    }

    pub async fn add_member(&self, team_uuid: Uuid, user_uuid: String, role: TeamRole) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.teams.contains_key(&team_uuid) {
            return Err(Error::NotFound(format!("team {team_uuid} not found")));
        }
        state.members.retain(|m| !(m.team_uuid == team_uuid && m.user_uuid == user_uuid));
        state.members.push(TeamMember {
            team_uuid,
            user_uuid,
            role,
        });
        self.persist(&state).await?;
        Ok(())
    }

    pub async fn role_of(&self, team_uuid: Uuid, user_uuid: &str) -> Result<Option<TeamRole>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .find(|m| m.team_uuid == team_uuid && m.user_uuid == user_uuid)
            .map(|m| m.role))
    }

    pub async fn is_member(&self, team_uuid: Uuid, user_uuid: &str) -> Result<bool> {
        Ok(self.role_of(team_uuid, user_uuid).await?.is_some())
    }
}
