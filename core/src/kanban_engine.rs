//! C8: task lifecycle operations, dependency unblocking, and the timeout
//! sweep, built on top of `KanbanStore` + `EventBus`.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::eventbus::{team_channel, EventBus};
use crate::model::{KanbanTask, TaskPriority, TaskProgress, TaskStatus};
use crate::store::KanbanStore;
use crate::template::{resolve_task_mapping, TaskOutcome};

pub struct KanbanEngine<'a> {
    store: &'a KanbanStore,
    bus: &'a EventBus,
}

impl<'a> KanbanEngine<'a> {
    pub fn new(store: &'a KanbanStore, bus: &'a EventBus) -> Self {
        Self { store, bus }
    }

    /// `start_task`: claim per §4.8.
    pub async fn claim(&self, task_uuid: Uuid, agent_uuid: Uuid, agent_team: Uuid) -> Result<KanbanTask> {
        let task = self.store.get(task_uuid).await?;
        if task.team_uuid != agent_team {
            return Err(Error::Authorization(
                "agent is not a member of the task's team".into(),
            ));
        }
        if task.assigned_agent.is_some() {
            return Err(Error::Conflict("task is already assigned".into()));
        }
        if !task.status.can_transition_to(TaskStatus::InProgress) {
            return Err(Error::Conflict(format!(
                "cannot claim task in status {:?}",
                task.status
            )));
        }

        let updated = self
            .store
            .update(task_uuid, |t| {
                t.assigned_agent = Some(agent_uuid);
                t.status = TaskStatus::InProgress;
                t.started_at = Some(Utc::now());
            })
            .await?;

        self.bus.publish(
            team_channel(updated.team_uuid),
            "task:claimed",
            json!({"task_uuid": task_uuid, "agent_uuid": agent_uuid}),
        );
        self.bus.publish(
            crate::eventbus::agent_channel(agent_uuid),
            "task:push",
            json!({"task_uuid": task_uuid}),
        );
        Ok(updated)
    }

    pub async fn progress(
        &self,
        task_uuid: Uuid,
        agent_uuid: Uuid,
        current: u64,
        total: u64,
        message: Option<String>,
    ) -> Result<KanbanTask> {
        let task = self.store.get(task_uuid).await?;
        if task.assigned_agent != Some(agent_uuid) {
            return Err(Error::Authorization(
                "only the assigned agent may report progress".into(),
            ));
        }

        let updated = self
            .store
            .update(task_uuid, |t| {
                t.progress = Some(TaskProgress {
                    current,
                    total,
                    message: message.clone(),
                });
            })
            .await?;

        let percent = if total == 0 {
            0
        } else {
            ((100 * current) as f64 / total as f64).round() as u64
        };
        self.bus.publish(
            team_channel(updated.team_uuid),
            "task:progress",
            json!({"task_uuid": task_uuid, "current": current, "total": total, "percent": percent}),
        );
        Ok(updated)
    }

    pub async fn complete(
        &self,
        task_uuid: Uuid,
        agent_uuid: Uuid,
        result: String,
        output: Option<Value>,
        move_to_review: bool,
    ) -> Result<KanbanTask> {
        let task = self.store.get(task_uuid).await?;
        if task.assigned_agent != Some(agent_uuid) {
            return Err(Error::Authorization(
                "only the assigned agent may complete this task".into(),
            ));
        }

        let next_status = if move_to_review {
            TaskStatus::Review
        } else {
            TaskStatus::Done
        };

        let updated = self
            .store
            .update(task_uuid, |t| {
                t.status = next_status;
                t.result = Some(result.clone());
                t.output = output.clone();
                t.completed_at = Some(Utc::now());
            })
            .await?;

        self.bus.publish(
            team_channel(updated.team_uuid),
            "task:updated",
            json!({"task_uuid": task_uuid, "status": next_status}),
        );

        if next_status == TaskStatus::Done {
            self.unblock_dependents(updated.team_uuid, task_uuid).await?;
        }
        Ok(updated)
    }

    pub async fn fail(&self, task_uuid: Uuid, agent_uuid: Uuid, error: String) -> Result<KanbanTask> {
        let task = self.store.get(task_uuid).await?;
        if task.assigned_agent != Some(agent_uuid) {
            return Err(Error::Authorization(
                "only the assigned agent may fail this task".into(),
            ));
        }
        self.apply_failure(task, error).await
    }

    async fn apply_failure(&self, task: KanbanTask, error: String) -> Result<KanbanTask> {
        let task_uuid = task.task_uuid;
        let next_retry_count = task.retry_count + 1;

        if next_retry_count <= task.max_retries {
            let updated = self
                .store
                .update(task_uuid, |t| {
                    t.retry_count = next_retry_count;
                    t.assigned_agent = None;
                    t.status = TaskStatus::Todo;
                    t.result = Some(format!(
                        "RETRY {next_retry_count}/{}: {error}",
                        task.max_retries
                    ));
                    t.last_error = Some(error.clone());
                })
                .await?;
            self.bus.publish(
                team_channel(updated.team_uuid),
                "task:retry",
                json!({"task_uuid": task_uuid, "attempt": next_retry_count}),
            );
            Ok(updated)
        } else {
            let updated = self
                .store
                .update(task_uuid, |t| {
                    t.retry_count = next_retry_count;
                    t.status = TaskStatus::Done;
                    t.result = Some(format!("FAILED ({next_retry_count} attempts): {error}"));
                    t.last_error = Some(error.clone());
                })
                .await?;
            self.bus.publish(
                team_channel(updated.team_uuid),
                "task:dead_letter",
                json!({"task_uuid": task_uuid}),
            );
            Ok(updated)
        }
    }

    /// `delegate`: an agent spins off a new task in its team, tagged with
    /// a required capability. Non-empty `depends_on` starts it locked in
    /// `backlog`; otherwise it's immediately claimable in `todo`.
    pub async fn delegate(
        &self,
        team_uuid: Uuid,
        created_by_agent: Uuid,
        title: String,
        description: String,
        required_capability: Option<String>,
        priority: TaskPriority,
        depends_on: Vec<Uuid>,
        input_mapping: Option<Map<String, Value>>,
    ) -> Result<KanbanTask> {
        let mut task = KanbanTask::new(team_uuid, title, description);
        task.created_by_agent = Some(created_by_agent);
        task.required_capability = required_capability;
        task.priority = priority;
        task.status = if depends_on.is_empty() {
            TaskStatus::Todo
        } else {
            TaskStatus::Backlog
        };
        task.depends_on = depends_on;
        task.input_mapping = input_mapping;
        self.store.create(task).await
    }

    /// §4.8 dependency unblocking, run after a task reaches `done`.
    async fn unblock_dependents(&self, team_uuid: Uuid, completed_task: Uuid) -> Result<()> {
        let dependents = self
            .store
            .list_backlog_dependents(team_uuid, completed_task)
            .await?;

        for dependent in dependents {
            let mut outcomes = HashMap::new();
            let mut all_done = true;
            for dep_id in &dependent.depends_on {
                let dep = self.store.get(*dep_id).await?;
                if dep.status != TaskStatus::Done {
                    all_done = false;
                    break;
                }
                outcomes.insert(
                    *dep_id,
                    TaskOutcome {
                        output: dep.output.clone(),
                        result: dep.result.clone(),
                    },
                );
            }
            if !all_done {
                continue;
            }

            let resolved_block = dependent
                .input_mapping
                .as_ref()
                .map(|mapping| resolve_task_mapping(mapping, &outcomes));

            let updated = self
                .store
                .update(dependent.task_uuid, |t| {
                    if let Some(ref resolved) = resolved_block {
                        t.description.push_str("\n\n---\nResolved inputs:\n");
                        t.description
                            .push_str(&serde_json::to_string_pretty(resolved).unwrap_or_default());
                    }
                    t.status = TaskStatus::Todo;
                })
                .await?;

            self.bus.publish(
                team_channel(team_uuid),
                "task:unblocked",
                json!({"task_uuid": updated.task_uuid}),
            );
        }
        Ok(())
    }

    /// Background sweep: fails `in_progress` tasks whose deadline elapsed.
    pub async fn sweep_timeouts(&self) -> Result<usize> {
        let now = Utc::now();
        let candidates = self.store.list_in_progress_with_timeout().await?;
        let mut swept = 0;
        for task in candidates {
            let Some(timeout_ms) = task.timeout_ms else { continue };
            let Some(started_at) = task.started_at else { continue };
            if started_at + chrono::Duration::milliseconds(timeout_ms as i64) >= now {
                continue;
            }
            let was_last_retry = task.retry_count + 1 > task.max_retries;
            let updated = self
                .apply_failure(task, format!("Timed out after {timeout_ms}ms"))
                .await?;
            let event_type = if was_last_retry {
                "task:timeout_dead_letter"
            } else {
                "task:timeout_retry"
            };
            self.bus.publish(
                team_channel(updated.team_uuid),
                event_type,
                json!({"task_uuid": updated.task_uuid}),
            );
            swept += 1;
        }
        Ok(swept)
    }
}
