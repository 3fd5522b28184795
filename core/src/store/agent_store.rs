//! C12 persistence for `Agent` and `AgentVersion`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Agent, AgentVersion, AgentVersionStatus};

use super::file_backed::{load_snapshot, write_snapshot};

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    agents: Vec<Agent>,
    versions: Vec<AgentVersion>,
}

struct State {
    agents: HashMap<Uuid, Agent>,
    versions: HashMap<Uuid, AgentVersion>,
}

#[derive(Clone)]
pub struct AgentStore {
    state: Arc<RwLock<State>>,
    path: PathBuf,
}

impl AgentStore {
    pub async fn new(path: PathBuf) -> Result<Self> {
        let snapshot: Snapshot = load_snapshot(&path).await?;
        let agents = snapshot
            .agents
            .into_iter()
            .map(|a| (a.agent_uuid, a))
            .collect();
        let versions = snapshot
            .versions
            .into_iter()
            .map(|v| (v.version_uuid, v))
            .collect();
        Ok(Self {
            state: Arc::new(RwLock::new(State { agents, versions })),
            path,
        })
    }

    async fn persist(&self, state: &State) -> Result<()> {
        let snapshot = Snapshot {
            agents: state.agents.values().cloned().collect(),
            versions: state.versions.values().cloned().collect(),
        };
        write_snapshot(&self.path, &snapshot).await
    }

    pub async fn register(&self, agent: Agent) -> Result<Agent> {
        let mut state = self.state.write().await;
        if state
            .agents
            .values()
            .any(|a| a.external_id == agent.external_id && !a.is_deleted())
        {
            return Err(Error::Conflict(format!(
                "external_id '{}' already registered",
                agent.external_id
            )));
        }
        state.agents.insert(agent.agent_uuid, agent.clone());
        self.persist(&state).await?;
        Ok(agent)
    }

    pub async fn get(&self, agent_uuid: Uuid) -> Result<Agent> {
        let state = self.state.read().await;
        state
            .agents
            .get(&agent_uuid)
            .filter(|a| !a.is_deleted())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("agent {agent_uuid} not found")))
    }

    pub async fn list_by_team(&self, team_uuid: Uuid) -> Result<Vec<Agent>> {
        let state = self.state.read().await;
        Ok(state
            .agents
            .values()
            .filter(|a| !a.is_deleted() && a.team_uuid == Some(team_uuid))
            .cloned()
            .collect())
    }

    /// §4.4 candidate query: online/degraded, non-deleted, with the
    /// capability, excluding the given set.
    pub async fn list_candidates(&self, capability: &str, exclude: &[Uuid]) -> Result<Vec<Agent>> {
        let state = self.state.read().await;
        Ok(state
            .agents
            .values()
            .filter(|a| {
                !a.is_deleted()
                    && a.status.is_routable()
                    && a.has_capability(capability)
                    && !exclude.contains(&a.agent_uuid)
            })
            .cloned()
            .collect())
    }

    pub async fn update<F>(&self, agent_uuid: Uuid, mutate: F) -> Result<Agent>
    where
        F: FnOnce(&mut Agent),
    {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(&agent_uuid)
            .ok_or_else(|| Error::NotFound(format!("agent {agent_uuid} not found")))?;
        mutate(agent);
        let updated = agent.clone();
        self.persist(&state).await?;
        Ok(updated)
    }

    pub async fn soft_delete(&self, agent_uuid: Uuid) -> Result<()> {
        self.update(agent_uuid, |a| {
            a.soft_deleted_at = Some(chrono::Utc::now());
        })
        .await?;
        Ok(())
    }

    /// §8 invariant: `∑ traffic_percent` over `{active, canary}` versions
    /// of an agent must equal 100 whenever any such version exists.
    /// Checked against the full set (existing plus this one) so a single
    /// bad write can't slip the fleet into an unroutable split.
    pub async fn register_version(&self, version: AgentVersion) -> Result<AgentVersion> {
        let mut state = self.state.write().await;
        if matches!(version.status, AgentVersionStatus::Active | AgentVersionStatus::Canary) {
            let sum: u32 = state
                .versions
                .values()
                .filter(|v| {
                    v.agent_uuid == version.agent_uuid
                        && v.version_uuid != version.version_uuid
                        && matches!(v.status, AgentVersionStatus::Active | AgentVersionStatus::Canary)
                })
                .map(|v| v.traffic_percent as u32)
                .sum::<u32>()
                + version.traffic_percent as u32;
            if sum != 100 {
                return Err(Error::Validation(format!(
                    "traffic_percent over active/canary versions of agent {} must sum to 100, got {sum}",
                    version.agent_uuid
                )));
            }
        }
        state.versions.insert(version.version_uuid, version.clone());
        self.persist(&state).await?;
        Ok(version)
    }

    pub async fn list_versions(&self, agent_uuid: Uuid) -> Result<Vec<AgentVersion>> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .values()
            .filter(|v| v.agent_uuid == agent_uuid)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AgentStatus;
    use std::collections::BTreeSet;

    async fn store() -> (AgentStore, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = AgentStore::new(dir.path().join("agents.json")).await.unwrap();
        (store, dir)
    }

    fn sample_agent(capability: &str) -> Agent {
        let mut a = Agent::new(
            format!("ext-{}", Uuid::new_v4()),
            "Agent".into(),
            "http://localhost:9000".into(),
            BTreeSet::from([capability.to_string()]),
            4,
            "user-1".into(),
            "hash".into(),
        );
        a.status = AgentStatus::Online;
        a
    }

    #[tokio::test]
    async fn register_rejects_duplicate_external_id() {
        let (store, _dir) = store().await;
        let mut agent = sample_agent("c1");
        agent.external_id = "dup".into();
        store.register(agent.clone()).await.unwrap();

        let mut other = sample_agent("c1");
        other.external_id = "dup".into();
        let err = store.register(other).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn list_candidates_excludes_offline_and_excluded() {
        let (store, _dir) = store().await;
        let online = store.register(sample_agent("c1")).await.unwrap();
        let mut offline = sample_agent("c1");
        offline.status = AgentStatus::Offline;
        store.register(offline).await.unwrap();

        let candidates = store.list_candidates("c1", &[]).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].agent_uuid, online.agent_uuid);

        let excluded = store.list_candidates("c1", &[online.agent_uuid]).await.unwrap();
        assert!(excluded.is_empty());
    }

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agents.json");
        let agent = {
            let store = AgentStore::new(path.clone()).await.unwrap();
            store.register(sample_agent("c1")).await.unwrap()
        };
        let reloaded = AgentStore::new(path).await.unwrap();
        assert!(reloaded.get(agent.agent_uuid).await.is_ok());
    }

    fn sample_version(agent_uuid: Uuid, status: crate::model::AgentVersionStatus, traffic_percent: u8) -> AgentVersion {
        AgentVersion {
            version_uuid: Uuid::new_v4(),
            agent_uuid,
            version: "v1".into(),
            endpoint: "http://localhost:9100".into(),
            capabilities: BTreeSet::new(),
            status,
            traffic_percent,
            error_rate_per_1000: 0,
            error_threshold: 50,
            is_rollback_target: false,
        }
    }

    #[tokio::test]
    async fn register_version_accepts_a_full_split() {
        let (store, _dir) = store().await;
        let agent = store.register(sample_agent("c1")).await.unwrap();
        store
            .register_version(sample_version(agent.agent_uuid, crate::model::AgentVersionStatus::Active, 80))
            .await
            .unwrap();
        store
            .register_version(sample_version(agent.agent_uuid, crate::model::AgentVersionStatus::Canary, 20))
            .await
            .unwrap();
        assert_eq!(store.list_versions(agent.agent_uuid).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn register_version_rejects_a_split_that_does_not_sum_to_100() {
        let (store, _dir) = store().await;
        let agent = store.register(sample_agent("c1")).await.unwrap();
        store
            .register_version(sample_version(agent.agent_uuid, crate::model::AgentVersionStatus::Active, 80))
            .await
            .unwrap();
        let err = store
            .register_version(sample_version(agent.agent_uuid, crate::model::AgentVersionStatus::Canary, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
