//! C12 persistence for `WorkflowRun` and `StageExecution`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::{StageExecution, WorkflowRun};

use super::file_backed::{load_snapshot, persist_snapshot_atomic};

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    runs: Vec<WorkflowRun>,
    stage_executions: Vec<StageExecution>,
}

struct State {
    runs: HashMap<String, WorkflowRun>,
    // keyed by (run_id, stage_id); Vec preserves append order for
    // re-attempted stages, last entry is authoritative.
    stage_executions: Vec<StageExecution>,
}

#[derive(Clone)]
pub struct WorkflowStore {
    state: Arc<RwLock<State>>,
    path: PathBuf,
}

impl WorkflowStore {
    pub async fn new(path: PathBuf) -> Result<Self> {
        let snapshot: Snapshot = load_snapshot(&path).await?;
        let runs = snapshot
            .runs
            .into_iter()
            .map(|r| (r.run_id.clone(), r))
            .collect();
        Ok(Self {
            state: Arc::new(RwLock::new(State {
                runs,
                stage_executions: snapshot.stage_executions,
            })),
            path,
        })
    }

    async fn persist(&self, state: &State) -> Result<()> {
        let snapshot = Snapshot {
            runs: state.runs.values().cloned().collect(),
            stage_executions: state.stage_executions.clone(),
        };
        persist_snapshot_atomic(&self.path, &snapshot).await
    }

    pub async fn create_run(&self, run: WorkflowRun) -> Result<WorkflowRun> {
        let mut state = self.state.write().await;
        state.runs.insert(run.run_id.clone(), run.clone());
        self.persist(&state).await?;
        Ok(run)
    }

    /// §4.7 job initialization: bounded polling retry to tolerate
    /// commit-visibility lag between enqueue and dequeue.
    pub async fn get_run_with_retry(&self, run_id: &str) -> Result<WorkflowRun> {
        const MAX_ATTEMPTS: u32 = 5;
        const INITIAL_BACKOFF_MS: u64 = 200;
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.get_run(run_id).await {
                Ok(run) => return Ok(run),
                Err(err) => {
                    last_err = Some(err);
                    if attempt + 1 < MAX_ATTEMPTS {
                        let backoff = INITIAL_BACKOFF_MS * (attempt as u64 + 1);
                        tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::NotFound(run_id.to_string())))
    }

    pub async fn get_run(&self, run_id: &str) -> Result<WorkflowRun> {
        let state = self.state.read().await;
        state
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("run {run_id} not found")))
    }

    pub async fn update_run<F>(&self, run_id: &str, mutate: F) -> Result<WorkflowRun>
    where
        F: FnOnce(&mut WorkflowRun),
    {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::NotFound(format!("run {run_id} not found")))?;
        mutate(run);
        let updated = run.clone();
        self.persist(&state).await?;
        Ok(updated)
    }

    pub async fn append_stage_execution(&self, execution: StageExecution) -> Result<()> {
        let mut state = self.state.write().await;
        state.stage_executions.push(execution);
        self.persist(&state).await
    }

    pub async fn update_stage_execution<F>(
        &self,
        run_id: &str,
        stage_id: &str,
        mutate: F,
    ) -> Result<StageExecution>
    where
        F: FnOnce(&mut StageExecution),
    {
        let mut state = self.state.write().await;
        let execution = state
            .stage_executions
            .iter_mut()
            .rev()
            .find(|e| e.run_id == run_id && e.stage_id == stage_id)
            .ok_or_else(|| {
                Error::NotFound(format!("stage execution {run_id}/{stage_id} not found"))
            })?;
        mutate(execution);
        let updated = execution.clone();
        self.persist(&state).await?;
        Ok(updated)
    }

    pub async fn list_stage_executions(&self, run_id: &str) -> Result<Vec<StageExecution>> {
        let state = self.state.read().await;
        Ok(state
            .stage_executions
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }
}
