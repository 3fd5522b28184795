//! C2 — short-lived ancillary state backed by an in-memory KV store.
//!
//! Every read degrades silently on miss: callers fall back to the durable
//! store and opportunistically refill. Cache unavailability must never
//! fail a request, so every method here is infallible.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

const STAGE_OUTPUT_TTL: Duration = Duration::from_secs(60 * 60);
const CAPABILITY_TTL: Duration = Duration::from_secs(30);
const RESPONSE_TIME_TTL: Duration = Duration::from_secs(60 * 60 * 2);
const RESPONSE_TIME_WINDOW: usize = 20;

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Default)]
struct AgentLoadState {
    current_tasks: i64,
    response_times_ms: VecDeque<f64>,
}

pub struct Cache {
    stage_outputs: RwLock<HashMap<String, Expiring<Value>>>,
    capability_agents: RwLock<HashMap<String, Expiring<Vec<Uuid>>>>,
    agent_load: RwLock<HashMap<Uuid, AgentLoadState>>,
    response_times: RwLock<HashMap<Uuid, Expiring<()>>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            stage_outputs: RwLock::new(HashMap::new()),
            capability_agents: RwLock::new(HashMap::new()),
            agent_load: RwLock::new(HashMap::new()),
            response_times: RwLock::new(HashMap::new()),
        }
    }

    fn stage_output_key(run_id: &str, stage_id: &str) -> String {
        format!("stage:{run_id}:{stage_id}")
    }

    fn capability_key(capability: &str) -> String {
        format!("cap:{capability}")
    }

    /// Immutable once written per §4.2: a second write to the same key is
    /// accepted (callers may legitimately re-cache after a durable refill)
    /// but never partially applied.
    pub fn put_stage_output(&self, run_id: &str, stage_id: &str, output: Value) {
        let key = Self::stage_output_key(run_id, stage_id);
        self.stage_outputs
            .write()
            .expect("cache lock poisoned")
            .insert(key, Expiring::new(output, STAGE_OUTPUT_TTL));
    }

    pub fn get_stage_output(&self, run_id: &str, stage_id: &str) -> Option<Value> {
        let key = Self::stage_output_key(run_id, stage_id);
        let guard = self.stage_outputs.read().expect("cache lock poisoned");
        guard
            .get(&key)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone())
    }

    pub fn put_capability_agents(&self, capability: &str, agents: Vec<Uuid>) {
        let key = Self::capability_key(capability);
        self.capability_agents
            .write()
            .expect("cache lock poisoned")
            .insert(key, Expiring::new(agents, CAPABILITY_TTL));
    }

    pub fn get_capability_agents(&self, capability: &str) -> Option<Vec<Uuid>> {
        let key = Self::capability_key(capability);
        let guard = self.capability_agents.read().expect("cache lock poisoned");
        guard
            .get(&key)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone())
    }

    /// Invalidated on agent status change, per §4.2.
    pub fn invalidate_capability(&self, capability: &str) {
        let key = Self::capability_key(capability);
        self.capability_agents
            .write()
            .expect("cache lock poisoned")
            .remove(&key);
    }

    pub fn invalidate_all_capabilities(&self) {
        self.capability_agents
            .write()
            .expect("cache lock poisoned")
            .clear();
    }

    /// Increments the agent's load counter, clamped at `i64::MAX`.
    pub fn increment_load(&self, agent_uuid: Uuid) -> i64 {
        let mut guard = self.agent_load.write().expect("cache lock poisoned");
        let state = guard.entry(agent_uuid).or_default();
        state.current_tasks = state.current_tasks.saturating_add(1);
        state.current_tasks
    }

    /// Decrements the agent's load counter, clamped at 0.
    pub fn decrement_load(&self, agent_uuid: Uuid) -> i64 {
        let mut guard = self.agent_load.write().expect("cache lock poisoned");
        let state = guard.entry(agent_uuid).or_default();
        state.current_tasks = (state.current_tasks - 1).max(0);
        state.current_tasks
    }

    pub fn current_load(&self, agent_uuid: Uuid) -> i64 {
        self.agent_load
            .read()
            .expect("cache lock poisoned")
            .get(&agent_uuid)
            .map(|s| s.current_tasks)
            .unwrap_or(0)
    }

    /// Records one response-time sample, bounded to the most recent 20,
    /// with a rolling 2-hour TTL on the window as a whole.
    pub fn record_response_time(&self, agent_uuid: Uuid, millis: f64) {
        {
            let mut expiry = self.response_times.write().expect("cache lock poisoned");
            expiry.insert(agent_uuid, Expiring::new((), RESPONSE_TIME_TTL));
        }
        let mut guard = self.agent_load.write().expect("cache lock poisoned");
        let state = guard.entry(agent_uuid).or_default();
        state.response_times_ms.push_back(millis);
        while state.response_times_ms.len() > RESPONSE_TIME_WINDOW {
            state.response_times_ms.pop_front();
        }
    }

    /// Mean of the last up-to-20 samples, or `None` if the window has
    /// expired or never had a sample.
    pub fn mean_response_time(&self, agent_uuid: Uuid) -> Option<f64> {
        let live = self
            .response_times
            .read()
            .expect("cache lock poisoned")
            .get(&agent_uuid)
            .map(|e| e.is_live())
            .unwrap_or(false);
        if !live {
            return None;
        }
        let guard = self.agent_load.read().expect("cache lock poisoned");
        let samples = &guard.get(&agent_uuid)?.response_times_ms;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_counter_clamps_at_zero() {
        let cache = Cache::new();
        let agent = Uuid::new_v4();
        assert_eq!(cache.decrement_load(agent), 0);
        assert_eq!(cache.increment_load(agent), 1);
        assert_eq!(cache.decrement_load(agent), 0);
        assert_eq!(cache.decrement_load(agent), 0);
    }

    #[test]
    fn response_time_window_bounded_to_20_samples() {
        let cache = Cache::new();
        let agent = Uuid::new_v4();
        for i in 0..30 {
            cache.record_response_time(agent, i as f64);
        }
        // Mean over the most recent 20 samples: 10..=29.
        let expected: f64 = (10..30).sum::<i32>() as f64 / 20.0;
        assert_eq!(cache.mean_response_time(agent), Some(expected));
    }

    #[test]
    fn stage_output_round_trips() {
        let cache = Cache::new();
        assert!(cache.get_stage_output("run-1", "a").is_none());
        cache.put_stage_output("run-1", "a", serde_json::json!({"r": "ok"}));
        assert_eq!(
            cache.get_stage_output("run-1", "a"),
            Some(serde_json::json!({"r": "ok"}))
        );
    }

    #[test]
    fn capability_cache_invalidation() {
        let cache = Cache::new();
        let agent = Uuid::new_v4();
        cache.put_capability_agents("c1", vec![agent]);
        assert_eq!(cache.get_capability_agents("c1"), Some(vec![agent]));
        cache.invalidate_capability("c1");
        assert!(cache.get_capability_agents("c1").is_none());
    }
}
