//! C10: durable work queue substrate for workflow runs.
//!
//! In-memory queue with `job_id` dedup and lease-based at-least-once
//! delivery: a dequeued job is invisible to other consumers until its
//! lease expires or it is explicitly acked/nacked. The workflow worker
//! (C7) is the only consumer and treats `jobId = workflow_run_id`, which
//! is what enforces "single-fork per run" at this layer.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const DEFAULT_LEASE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub job_id: String,
    pub workflow_run_id: String,
    pub user_uuid: String,
}

struct Leased {
    job: WorkflowJob,
    expires_at: Instant,
}

struct State {
    pending: VecDeque<WorkflowJob>,
    // job_id -> leased entry, once dequeued.
    leased: HashMap<String, Leased>,
    known_job_ids: std::collections::HashSet<String>,
}

pub struct QueueBroker {
    state: Mutex<State>,
    lease_duration: Duration,
}

impl Default for QueueBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                leased: HashMap::new(),
                known_job_ids: std::collections::HashSet::new(),
            }),
            lease_duration: DEFAULT_LEASE,
        }
    }

    /// Deduplicates concurrent enqueues sharing a `job_id`: a job already
    /// pending, leased, or previously completed is a no-op.
    pub fn publish(&self, job: WorkflowJob) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        if state.known_job_ids.contains(&job.job_id) {
            return;
        }
        state.known_job_ids.insert(job.job_id.clone());
        state.pending.push_back(job);
    }

    /// Pops the next unleased job, if any, and leases it.
    pub fn dequeue(&self) -> Option<WorkflowJob> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        self.reclaim_expired_leases(&mut state);
        let job = state.pending.pop_front()?;
        state.leased.insert(
            job.job_id.clone(),
            Leased {
                job: job.clone(),
                expires_at: Instant::now() + self.lease_duration,
            },
        );
        Some(job)
    }

    fn reclaim_expired_leases(&self, state: &mut State) {
        let now = Instant::now();
        let expired: Vec<String> = state
            .leased
            .iter()
            .filter(|(_, l)| l.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for job_id in expired {
            if let Some(leased) = state.leased.remove(&job_id) {
                state.pending.push_back(leased.job);
            }
        }
    }

    /// Acks successful processing: the job is forgotten, not redelivered.
    pub fn ack(&self, job_id: &str) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.leased.remove(job_id);
    }

    /// Nacks: the job becomes immediately redeliverable.
    pub fn nack(&self, job_id: &str) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        if let Some(leased) = state.leased.remove(job_id) {
            state.pending.push_front(leased.job);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> WorkflowJob {
        WorkflowJob {
            job_id: id.to_string(),
            workflow_run_id: id.to_string(),
            user_uuid: "user-1".to_string(),
        }
    }

    #[test]
    fn publish_deduplicates_by_job_id() {
        let q = QueueBroker::new();
        q.publish(job("run-1"));
        q.publish(job("run-1"));
        assert_eq!(q.pending_len(), 1);
    }

    #[test]
    fn dequeue_then_ack_does_not_redeliver() {
        let q = QueueBroker::new();
        q.publish(job("run-1"));
        let job = q.dequeue().unwrap();
        q.ack(&job.job_id);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn nack_redelivers_immediately() {
        let q = QueueBroker::new();
        q.publish(job("run-1"));
        let dequeued = q.dequeue().unwrap();
        q.nack(&dequeued.job_id);
        assert!(q.dequeue().is_some());
    }
}
