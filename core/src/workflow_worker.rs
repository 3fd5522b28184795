//! C7: the central retry/fallback state machine. Consumes jobs from the
//! queue broker, topologically orders a run's stages, and drives each
//! stage through the router + dispatcher with retry/fallback, persisting
//! outputs and emitting signed audit records as it goes.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit_signer::{self, SigningKey};
use crate::cache::Cache;
use crate::dispatch::{DispatchContext, DispatchError, DispatchRequest, DynAgentDispatcher};
use crate::error::{Error, Result};
use crate::eventbus::{user_channel, EventBus};
use crate::model::{Agent, AuditAction, AuditRecord, StageDefinition, StageExecution, WorkflowRun};
use crate::queue::{QueueBroker, WorkflowJob};
use crate::router::AgentRouter;
use crate::secret_crypto::SecretKey;
use crate::store::{AgentStore, AuditStore, WorkflowStore};
use crate::template::resolve_stage_input;

const JOB_FETCH_MAX_ATTEMPTS: u32 = 5;

/// Dispatch mode, resolved once per run from configuration. `Mock` lets
/// tests and demo environments run workflows end to end with no live
/// agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Live,
    Mock,
}

pub struct WorkflowWorker<'a> {
    pub workflow_store: &'a WorkflowStore,
    pub agent_store: &'a AgentStore,
    pub audit_store: &'a AuditStore,
    pub cache: &'a Cache,
    pub bus: &'a EventBus,
    pub dispatcher: &'a DynAgentDispatcher,
    pub signing_key: &'a SigningKey,
    pub secret_key: &'a SecretKey,
    pub dispatch_mode: DispatchMode,
}

/// Kahn's algorithm over `(id, dependencies)`; also groups stages into
/// levels (stages with no remaining dependencies at that round) so a
/// caller may parallelize within a level. Sequential consumption of the
/// flattened order remains a valid use of the result.
pub fn topological_levels(stages: &[StageDefinition]) -> Result<Vec<Vec<String>>> {
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let ids: HashSet<&str> = stages.iter().map(|s| s.id.as_str()).collect();

    for stage in stages {
        indegree.entry(stage.id.as_str()).or_insert(0);
        for dep in &stage.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(Error::Validation(format!(
                    "stage '{}' depends on unknown stage '{dep}'",
                    stage.id
                )));
            }
            *indegree.entry(stage.id.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(stage.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut levels = Vec::new();
    let mut visited = 0;

    while !queue.is_empty() {
        let mut level: Vec<String> = Vec::new();
        let mut next_queue = VecDeque::new();
        for id in queue.drain(..) {
            level.push(id.to_string());
            visited += 1;
            if let Some(children) = dependents.get(id) {
                for &child in children {
                    let deg = indegree.get_mut(child).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        next_queue.push_back(child);
                    }
                }
            }
        }
        level.sort();
        levels.push(level);
        queue = next_queue;
    }

    if visited != stages.len() {
        return Err(Error::Validation("workflow definition contains a cycle".into()));
    }
    Ok(levels)
}

#[derive(Debug)]
struct AgentAttemptOutcome {
    agent_uuid: Uuid,
    agent_external_id: String,
    output: Value,
    execution_time_ms: u64,
}

impl<'a> WorkflowWorker<'a> {
    /// Drains exactly one job: fetches, marks in-progress, executes every
    /// stage in topological order, and persists the terminal status.
    pub async fn process_job(&self, job: &WorkflowJob) -> Result<()> {
        let mut run = self.fetch_run_with_retry(&job.workflow_run_id).await?;
        run.mark_in_progress();
        self.workflow_store
            .update_run(&run.run_id, |r| {
                r.status = run.status;
                r.started_at = run.started_at;
            })
            .await?;

        let levels = topological_levels(&run.definition.stages)?;
        let mut stage_outputs: HashMap<String, Value> = HashMap::new();

        for level in levels {
            for stage_id in level {
                let stage = run
                    .definition
                    .stage(&stage_id)
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("stage '{stage_id}' vanished mid-run")))?;

                if let Err(err) = self.execute_stage(&run, &stage, &mut stage_outputs).await {
                    let message = format!("Stage '{stage_id}' failed: {err}");
                    self.workflow_store
                        .update_run(&run.run_id, |r| r.mark_failed(message.clone()))
                        .await?;
                    self.bus.publish(
                        user_channel(run.user_uuid.clone()),
                        "workflow:failed",
                        json!({"run_id": run.run_id, "error": message}),
                    );
                    return Err(err);
                }
            }
        }

        self.workflow_store
            .update_run(&run.run_id, |r| r.mark_completed())
            .await?;
        Ok(())
    }

    async fn fetch_run_with_retry(&self, run_id: &str) -> Result<WorkflowRun> {
        let _ = JOB_FETCH_MAX_ATTEMPTS; // documented in WorkflowStore::get_run_with_retry
        self.workflow_store.get_run_with_retry(run_id).await
    }

    /// Recovers the plaintext bearer secret for a dispatch. §4's invariant
    /// requires `auth_secret_ciphertext` whenever an agent is actually
    /// live-dispatched, so a missing ciphertext or key here is a
    /// configuration error, not a retryable one.
    fn resolve_agent_secret(&self, agent: &Agent) -> Result<String> {
        let ciphertext = agent.auth_secret_ciphertext.as_deref().ok_or_else(|| {
            Error::Internal(format!(
                "agent {} has no encrypted auth secret on file for live dispatch",
                agent.agent_uuid
            ))
        })?;
        self.secret_key.decrypt(ciphertext)
    }

    async fn execute_stage(
        &self,
        run: &WorkflowRun,
        stage: &StageDefinition,
        stage_outputs: &mut HashMap<String, Value>,
    ) -> Result<()> {
        let resolved_input = resolve_stage_input(&stage.input_template, &run.input, stage_outputs);

        let mut execution = StageExecution::start(run.run_id.clone(), stage.id.clone(), resolved_input.clone());
        self.workflow_store
            .append_stage_execution(execution.clone())
            .await?;

        let attempt = self
            .execute_stage_with_retry(run, stage, Value::Object(resolved_input), stage_outputs)
            .await;

        match attempt {
            Ok(outcome) => {
                execution.mark_completed(outcome.agent_uuid, outcome.output.clone());
                self.workflow_store
                    .update_stage_execution(&run.run_id, &stage.id, |e| {
                        e.status = execution.status;
                        e.agent_id_resolved = execution.agent_id_resolved;
                        e.output = execution.output.clone();
                        e.completed_at = execution.completed_at;
                        e.execution_time_ms = execution.execution_time_ms;
                    })
                    .await?;

                stage_outputs.insert(stage.id.clone(), outcome.output.clone());
                self.cache.put_stage_output(&run.run_id, &stage.id, outcome.output.clone());
                self.workflow_store
                    .update_run(&run.run_id, |r| r.completed_stages.push(stage.id.clone()))
                    .await?;

                self.emit_audit(
                    run,
                    stage,
                    AuditAction::Execute,
                    "completed",
                    Some(&outcome.agent_external_id),
                    &Value::Object(execution.input_resolved.clone()),
                    Some(&outcome.output),
                )
                .await?;
                Ok(())
            }
            Err(err) => {
                execution.mark_failed(None, err.to_string());
                self.workflow_store
                    .update_stage_execution(&run.run_id, &stage.id, |e| {
                        e.status = execution.status;
                        e.error_message = execution.error_message.clone();
                        e.completed_at = execution.completed_at;
                        e.execution_time_ms = execution.execution_time_ms;
                    })
                    .await?;
                self.emit_audit(
                    run,
                    stage,
                    AuditAction::Fail,
                    "failed",
                    None,
                    &Value::Object(execution.input_resolved.clone()),
                    None,
                )
                .await?;
                Err(err)
            }
        }
    }

    /// The central retry/fallback state machine from §4.7.
    async fn execute_stage_with_retry(
        &self,
        run: &WorkflowRun,
        stage: &StageDefinition,
        resolved_input: Value,
        stage_outputs: &HashMap<String, Value>,
    ) -> Result<AgentAttemptOutcome> {
        if self.dispatch_mode == DispatchMode::Mock {
            return Ok(AgentAttemptOutcome {
                agent_uuid: Uuid::nil(),
                agent_external_id: "mock".to_string(),
                output: json!({"mock": true, "stage_id": stage.id}),
                execution_time_ms: 0,
            });
        }

        let router = AgentRouter::new(self.agent_store, self.cache);
        let mut excluded: Vec<Uuid> = Vec::new();
        const MAX_AGENT_ATTEMPTS: usize = 2;

        let mut last_err: Option<Error> = None;

        for _agent_attempt in 0..MAX_AGENT_ATTEMPTS {
            let Some(candidate) = router.select(&stage.capability, &excluded).await? else {
                return Err(Error::Transient("ALL_AGENTS_EXHAUSTED".into()));
            };
            let agent = candidate.agent;
            let endpoint = candidate.endpoint;
            self.cache.increment_load(agent.agent_uuid);

            let auth_secret = match self.resolve_agent_secret(&agent) {
                Ok(secret) => secret,
                Err(err) => {
                    self.cache.decrement_load(agent.agent_uuid);
                    return Err(err);
                }
            };
            let outcome = self
                .run_agent_attempt(
                    run,
                    stage,
                    &resolved_input,
                    stage_outputs,
                    &agent.external_id,
                    &endpoint,
                    &auth_secret,
                    stage.retry_config.max_retries,
                    stage.retry_config.backoff_ms,
                )
                .await;

            match outcome {
                Ok(result) => {
                    self.cache.decrement_load(agent.agent_uuid);
                    self.cache.record_response_time(agent.agent_uuid, result.execution_time_ms as f64);
                    return Ok(AgentAttemptOutcome {
                        agent_uuid: agent.agent_uuid,
                        agent_external_id: agent.external_id,
                        output: result.output,
                        execution_time_ms: result.execution_time_ms,
                    });
                }
                Err(AttemptFailure::NonRetryable(err)) => {
                    self.cache.decrement_load(agent.agent_uuid);
                    return Err(err);
                }
                Err(AttemptFailure::RetriesExhausted(err)) => {
                    self.cache.decrement_load(agent.agent_uuid);
                    excluded.push(agent.agent_uuid);
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Transient("ALL_AGENTS_EXHAUSTED".into())))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_agent_attempt(
        &self,
        run: &WorkflowRun,
        stage: &StageDefinition,
        resolved_input: &Value,
        stage_outputs: &HashMap<String, Value>,
        agent_external_id: &str,
        agent_endpoint: &str,
        auth_secret: &str,
        max_retries: u32,
        backoff_ms: u64,
    ) -> std::result::Result<AttemptSuccess, AttemptFailure> {
        let deadline_ms = stage.retry_config.timeout_ms.unwrap_or(30_000);
        let previous_stages = Value::Object(stage_outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect());

        for retry in 0..=max_retries {
            let request = DispatchRequest {
                workflow_run_id: run.run_id.clone(),
                stage_id: stage.id.clone(),
                capability_required: stage.capability.clone(),
                input: resolved_input.clone(),
                context: DispatchContext {
                    previous_stages: previous_stages.clone(),
                    user_id: run.user_uuid.clone(),
                    deadline_ms,
                },
            };

            match self
                .dispatcher
                .dispatch(agent_endpoint, agent_external_id, auth_secret, request)
                .await
            {
                Ok(success) => {
                    if let Some(memory_writes) = success.memory_writes.clone() {
                        self.cache
                            .put_stage_output(&run.run_id, &format!("{}:memory", stage.id), memory_writes);
                    }
                    return Ok(AttemptSuccess {
                        output: success.output,
                        execution_time_ms: success.execution_time_ms,
                    });
                }
                Err(err) => {
                    if !err.retryable() {
                        return Err(AttemptFailure::NonRetryable(dispatch_to_core_error(&err)));
                    }
                    if retry < max_retries {
                        self.emit_retry_audit(run, stage, retry + 1, max_retries + 1, agent_external_id)
                            .await;
                        let backoff = backoff_ms.saturating_mul(1u64 << retry.min(20));
                        tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                        continue;
                    }
                    return Err(AttemptFailure::RetriesExhausted(dispatch_to_core_error(&err)));
                }
            }
        }
        // Every loop iteration returns; this is only reached if the range
        // is empty, which can't happen since it always includes retry 0.
        Err(AttemptFailure::RetriesExhausted(Error::Internal(
            "retry loop exited without a terminal outcome".into(),
        )))
    }

    async fn emit_retry_audit(&self, run: &WorkflowRun, stage: &StageDefinition, n: u32, total: u32, agent_external_id: &str) {
        let _ = self
            .emit_audit(
                run,
                stage,
                AuditAction::Retry,
                &format!("retry_{n}_of_{total}"),
                Some(agent_external_id),
                &json!({}),
                None,
            )
            .await;
    }

    async fn emit_audit(
        &self,
        run: &WorkflowRun,
        stage: &StageDefinition,
        action: AuditAction,
        status: &str,
        agent_id: Option<&str>,
        input: &Value,
        output: Option<&Value>,
    ) -> Result<()> {
        let input_hash = audit_signer::hash_hex(input);
        let output_hash = output.map(audit_signer::hash_hex);

        let mut record = AuditRecord {
            record_id: Uuid::new_v4(),
            run_id: run.run_id.clone(),
            stage_id: stage.id.clone(),
            agent_id: agent_id.map(|s| s.to_string()),
            action,
            status: status.to_string(),
            input_hash,
            output_hash,
            logged_at: chrono::Utc::now(),
            signature: None,
        };
        let record_value = serde_json::to_value(&record)?;
        record.signature = audit_signer::sign_record(self.signing_key, &record_value)?;
        self.audit_store.append(record).await?;
        Ok(())
    }
}

struct AttemptSuccess {
    output: Value,
    execution_time_ms: u64,
}

enum AttemptFailure {
    NonRetryable(Error),
    RetriesExhausted(Error),
}

fn dispatch_to_core_error(err: &DispatchError) -> Error {
    if err.retryable() {
        Error::Transient(format!("{} ({})", err.code(), err.agent_external_id()))
    } else {
        Error::Permanent(format!("{} ({})", err.code(), err.agent_external_id()))
    }
}

/// Drives the queue: dequeues jobs in a loop, acking on success and
/// nacking (for immediate redelivery) on a transient failure. Intended to
/// run as a background task per worker process; stops accepting new jobs
/// once `shutdown` resolves.
pub async fn run_loop(
    queue: &QueueBroker,
    worker: &WorkflowWorker<'_>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    idle_poll: std::time::Duration,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        let Some(job) = queue.dequeue() else {
            tokio::select! {
                _ = tokio::time::sleep(idle_poll) => continue,
                _ = shutdown.changed() => continue,
            }
        };
        match worker.process_job(&job).await {
            Ok(()) => queue.ack(&job.job_id),
            Err(err) if err.retryable() => queue.nack(&job.job_id),
            Err(_) => queue.ack(&job.job_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(id: &str, deps: &[&str]) -> StageDefinition {
        StageDefinition {
            id: id.to_string(),
            name: id.to_string(),
            capability: "noop".to_string(),
            input_template: Default::default(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            retry_config: Default::default(),
        }
    }

    #[test]
    fn topological_levels_orders_by_dependency() {
        let stages = vec![stage("a", &[]), stage("b", &["a"]), stage("c", &["a"])];
        let levels = topological_levels(&stages).unwrap();
        assert_eq!(levels[0], vec!["a"]);
        assert_eq!(levels[1], vec!["b", "c"]);
    }

    #[test]
    fn topological_levels_rejects_cycles() {
        let stages = vec![stage("a", &["b"]), stage("b", &["a"])];
        assert!(topological_levels(&stages).is_err());
    }

    #[test]
    fn topological_levels_rejects_unknown_dependency() {
        let stages = vec![stage("a", &["missing"])];
        assert!(topological_levels(&stages).is_err());
    }
}
