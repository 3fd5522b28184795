//! C12 persistence for `KanbanTask`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::KanbanTask;

use super::file_backed::{load_snapshot, write_snapshot};

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    tasks: Vec<KanbanTask>,
}

#[derive(Clone)]
pub struct KanbanStore {
    tasks: Arc<RwLock<HashMap<Uuid, KanbanTask>>>,
    path: PathBuf,
}

impl KanbanStore {
    pub async fn new(path: PathBuf) -> Result<Self> {
        let snapshot: Snapshot = load_snapshot(&path).await?;
        let tasks = snapshot
            .tasks
            .into_iter()
            .map(|t| (t.task_uuid, t))
            .collect();
        Ok(Self {
            tasks: Arc::new(RwLock::new(tasks)),
            path,
        })
    }

    async fn persist(&self, tasks: &HashMap<Uuid, KanbanTask>) -> Result<()> {
        let snapshot = Snapshot {
            tasks: tasks.values().cloned().collect(),
        };
        write_snapshot(&self.path, &snapshot).await
    }

    pub async fn create(&self, task: KanbanTask) -> Result<KanbanTask> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.task_uuid, task.clone());
        self.persist(&tasks).await?;
        Ok(task)
    }

    pub async fn get(&self, task_uuid: Uuid) -> Result<KanbanTask> {
        let tasks = self.tasks.read().await;
        tasks
            .get(&task_uuid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {task_uuid} not found")))
    }

    pub async fn list_by_team(&self, team_uuid: Uuid) -> Result<Vec<KanbanTask>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| t.team_uuid == team_uuid)
            .cloned()
            .collect())
    }

    /// Tasks in `backlog` that depend on `completed_task`, within `team_uuid`.
    pub async fn list_backlog_dependents(
        &self,
        team_uuid: Uuid,
        completed_task: Uuid,
    ) -> Result<Vec<KanbanTask>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| {
                t.team_uuid == team_uuid
                    && t.status == crate::model::TaskStatus::Backlog
                    && t.depends_on.contains(&completed_task)
            })
            .cloned()
            .collect())
    }

    pub async fn list_in_progress_with_timeout(&self) -> Result<Vec<KanbanTask>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| {
                t.status == crate::model::TaskStatus::InProgress && t.timeout_ms.is_some()
            })
            .cloned()
            .collect())
    }

    pub async fn update<F>(&self, task_uuid: Uuid, mutate: F) -> Result<KanbanTask>
    where
        F: FnOnce(&mut KanbanTask),
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&task_uuid)
            .ok_or_else(|| Error::NotFound(format!("task {task_uuid} not found")))?;
        mutate(task);
        task.updated_at = chrono::Utc::now();
        let updated = task.clone();
        self.persist(&tasks).await?;
        Ok(updated)
    }
}
