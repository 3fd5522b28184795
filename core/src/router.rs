//! C4: scores candidate agents for a capability and picks the best one
//! with spare capacity.

use rand::Rng;
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::Result;
use crate::model::{Agent, AgentStatus, AgentVersionStatus};
use crate::store::AgentStore;

const DEFAULT_MAX_RT_MS: f64 = 5_000.0;

#[derive(Debug, Clone, Copy)]
struct Weights;

impl Weights {
    const CAPACITY: f64 = 0.4;
    const RESPONSE_TIME: f64 = 0.3;
    const HEALTH: f64 = 0.2;
    const RECENCY: f64 = 0.1;
}

#[derive(Debug, Clone)]
pub struct ScoredAgent {
    pub agent: Agent,
    pub score: f64,
    pub current_tasks: i64,
    /// The endpoint to actually dispatch to: the agent's own
    /// `endpoint_url`, or a canary/active `AgentVersion`'s endpoint when
    /// one was picked by the §8 `traffic_percent` weighted draw.
    pub endpoint: String,
}

pub struct AgentRouter<'a> {
    agent_store: &'a AgentStore,
    cache: &'a Cache,
}

impl<'a> AgentRouter<'a> {
    pub fn new(agent_store: &'a AgentStore, cache: &'a Cache) -> Self {
        Self { agent_store, cache }
    }

    fn capacity_score(agent: &Agent, current_tasks: i64) -> f64 {
        if agent.max_concurrent == 0 {
            return 0.0;
        }
        let max = agent.max_concurrent as f64;
        (100.0 * (max - current_tasks as f64) / max).clamp(0.0, 100.0)
    }

    fn recency_score(current_tasks: i64) -> f64 {
        (100.0 - 20.0 * current_tasks as f64).max(0.0)
    }

    fn response_time_score(&self, agent_uuid: Uuid, max_rt: f64) -> f64 {
        let effective_rt = self.cache.mean_response_time(agent_uuid).unwrap_or(max_rt);
        if max_rt <= 0.0 {
            return 100.0;
        }
        (100.0 * (1.0 - effective_rt / max_rt)).clamp(0.0, 100.0)
    }

    /// §4.4 weighted sum, rounded to two decimals.
    fn score(&self, agent: &Agent, current_tasks: i64, max_rt: f64) -> f64 {
        let capacity = Self::capacity_score(agent, current_tasks);
        let response_time = self.response_time_score(agent.agent_uuid, max_rt);
        let health = agent.status.health_score();
        let recency = Self::recency_score(current_tasks);

        let raw = Weights::CAPACITY * capacity
            + Weights::RESPONSE_TIME * response_time
            + Weights::HEALTH * health
            + Weights::RECENCY * recency;
        (raw * 100.0).round() / 100.0
    }

    async fn candidates(&self, capability: &str, exclude: &[Uuid]) -> Result<Vec<Agent>> {
        if exclude.is_empty() {
            if let Some(cached_ids) = self.cache.get_capability_agents(capability) {
                let mut agents = Vec::with_capacity(cached_ids.len());
                for id in cached_ids {
                    if let Ok(agent) = self.agent_store.get(id).await {
                        if !agent.is_deleted() && agent.status.is_routable() {
                            agents.push(agent);
                        }
                    }
                }
                return Ok(agents);
            }
        }

        let candidates = self.agent_store.list_candidates(capability, exclude).await?;
        if exclude.is_empty() {
            let ids = candidates.iter().map(|a| a.agent_uuid).collect();
            self.cache.put_capability_agents(capability, ids);
        }
        Ok(candidates)
    }

    /// Picks the best agent with spare capacity for `capability`, honoring
    /// `exclude`. Returns `None` when no candidate has room.
    pub async fn select(&self, capability: &str, exclude: &[Uuid]) -> Result<Option<ScoredAgent>> {
        let candidates = self.candidates(capability, exclude).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let max_rt = candidates
            .iter()
            .filter_map(|a| self.cache.mean_response_time(a.agent_uuid))
            .fold(None::<f64>, |acc, rt| Some(acc.map_or(rt, |m| m.max(rt))))
            .unwrap_or(DEFAULT_MAX_RT_MS);

        let mut best: Option<(Agent, f64, i64)> = None;
        for agent in candidates {
            let current_tasks = self.cache.current_load(agent.agent_uuid);
            if current_tasks >= agent.max_concurrent as i64 {
                continue;
            }
            let score = self.score(&agent, current_tasks, max_rt);
            if best.as_ref().map(|(_, s, _)| score > *s).unwrap_or(true) {
                best = Some((agent, score, current_tasks));
            }
        }
        let Some((agent, score, current_tasks)) = best else {
            return Ok(None);
        };
        let endpoint = self.resolve_endpoint(&agent).await?;
        Ok(Some(ScoredAgent {
            agent,
            score,
            current_tasks,
            endpoint,
        }))
    }

    /// §8 canary routing: when the agent has any `active`/`canary`
    /// versions, draws one at random weighted by `traffic_percent` and
    /// dispatches to its endpoint instead of the agent's own. Falls back
    /// to `agent.endpoint_url` when the agent has no versions recorded.
    async fn resolve_endpoint(&self, agent: &Agent) -> Result<String> {
        let versions = self.agent_store.list_versions(agent.agent_uuid).await?;
        let live: Vec<_> = versions
            .into_iter()
            .filter(|v| matches!(v.status, AgentVersionStatus::Active | AgentVersionStatus::Canary))
            .collect();
        if live.is_empty() {
            return Ok(agent.endpoint_url.clone());
        }
        let roll = rand::thread_rng().gen_range(0..100u32);
        let mut cumulative = 0u32;
        for version in &live {
            cumulative += version.traffic_percent as u32;
            if roll < cumulative {
                return Ok(version.endpoint.clone());
            }
        }
        Ok(live.last().expect("checked non-empty above").endpoint.clone())
    }

    /// Degraded-mode fallback used when cache is unavailable: order by
    /// `max_concurrent DESC` and return the first with room, per §4.4.
    pub fn select_without_cache(candidates: &[Agent], current_tasks_of: impl Fn(&Agent) -> i64) -> Option<Agent> {
        let mut ordered: Vec<&Agent> = candidates
            .iter()
            .filter(|a| a.status.is_routable() && !a.is_deleted())
            .collect();
        ordered.sort_by(|a, b| b.max_concurrent.cmp(&a.max_concurrent));
        ordered
            .into_iter()
            .find(|a| current_tasks_of(a) < a.max_concurrent as i64)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn agent(capability: &str, max_concurrent: u32, status: AgentStatus) -> Agent {
        let mut a = Agent::new(
            format!("ext-{}", Uuid::new_v4()),
            "Agent".into(),
            "http://localhost:9000".into(),
            BTreeSet::from([capability.to_string()]),
            max_concurrent,
            "user-1".into(),
            "hash".into(),
        );
        a.status = status;
        a
    }

    async fn store_with(agents: Vec<Agent>) -> (AgentStore, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = AgentStore::new(dir.path().join("agents.json")).await.unwrap();
        for a in agents {
            store.register(a).await.unwrap();
        }
        (store, dir)
    }

    #[tokio::test]
    async fn selects_highest_scoring_agent_with_capacity() {
        let (store, _dir) = store_with(vec![
            agent("c1", 4, AgentStatus::Online),
            agent("c1", 4, AgentStatus::Degraded),
        ])
        .await;
        let cache = Cache::new();
        let router = AgentRouter::new(&store, &cache);
        let selected = router.select("c1", &[]).await.unwrap().unwrap();
        assert_eq!(selected.agent.status, AgentStatus::Online);
    }

    #[tokio::test]
    async fn excludes_agents_at_full_capacity() {
        let (store, _dir) = store_with(vec![agent("c1", 1, AgentStatus::Online)]).await;
        let cache = Cache::new();
        let router = AgentRouter::new(&store, &cache);
        let agent_uuid = store.list_candidates("c1", &[]).await.unwrap()[0].agent_uuid;
        cache.increment_load(agent_uuid);
        let selected = router.select("c1", &[]).await.unwrap();
        assert!(selected.is_none());
    }

    #[tokio::test]
    async fn returns_none_when_no_candidates() {
        let (store, _dir) = store_with(vec![]).await;
        let cache = Cache::new();
        let router = AgentRouter::new(&store, &cache);
        assert!(router.select("missing", &[]).await.unwrap().is_none());
    }
}
