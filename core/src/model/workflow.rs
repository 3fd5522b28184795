use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

/// Per-stage retry/backoff/timeout knobs. Defaults follow §4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "RetryConfig::default_backoff_ms")]
    pub backoff_ms: u64,
    pub timeout_ms: Option<u64>,
}

impl RetryConfig {
    fn default_max_retries() -> u32 {
        2
    }

    fn default_backoff_ms() -> u64 {
        1000
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            backoff_ms: Self::default_backoff_ms(),
            timeout_ms: None,
        }
    }
}

/// One node in a workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDefinition {
    pub id: String,
    pub name: String,
    pub capability: String,
    #[serde(default)]
    pub input_template: serde_json::Map<String, Value>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub retry_config: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub stages: Vec<StageDefinition>,
}

impl WorkflowDefinition {
    pub fn stage(&self, id: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub run_id: String,
    pub user_uuid: String,
    pub workflow_name: String,
    pub definition: WorkflowDefinition,
    pub input: serde_json::Map<String, Value>,
    pub status: WorkflowRunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Stage ids completed so far, in completion order. Not in §3's literal
    /// field list but required by §8's invariant ("the union of
    /// completed_stages across observations is a prefix of some topological
    /// order") — tracked here so the invariant is checkable.
    #[serde(default)]
    pub completed_stages: Vec<String>,
}

impl WorkflowRun {
    pub fn new(
        user_uuid: String,
        workflow_name: String,
        definition: WorkflowDefinition,
        input: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            user_uuid,
            workflow_name,
            definition,
            input,
            status: WorkflowRunStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            completed_stages: Vec::new(),
        }
    }

    pub fn mark_in_progress(&mut self) {
        self.status = WorkflowRunStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.status = WorkflowRunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, message: String) {
        self.status = WorkflowRunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageExecutionStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageExecution {
    pub run_id: String,
    pub stage_id: String,
    pub status: StageExecutionStatus,
    pub agent_id_resolved: Option<Uuid>,
    pub input_resolved: serde_json::Map<String, Value>,
    pub output: Option<Value>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<u64>,
}

impl StageExecution {
    pub fn start(
        run_id: String,
        stage_id: String,
        input_resolved: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            run_id,
            stage_id,
            status: StageExecutionStatus::InProgress,
            agent_id_resolved: None,
            input_resolved,
            output: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            execution_time_ms: None,
        }
    }

    pub fn mark_completed(&mut self, agent_id: Uuid, output: Value) {
        let now = Utc::now();
        self.agent_id_resolved = Some(agent_id);
        self.output = Some(output);
        self.status = StageExecutionStatus::Completed;
        self.completed_at = Some(now);
        self.execution_time_ms = Some(
            (now - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
    }

    pub fn mark_failed(&mut self, agent_id: Option<Uuid>, error_message: String) {
        let now = Utc::now();
        self.agent_id_resolved = agent_id;
        self.error_message = Some(error_message);
        self.status = StageExecutionStatus::Failed;
        self.completed_at = Some(now);
        self.execution_time_ms = Some(
            (now - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
    }
}
