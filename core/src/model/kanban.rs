use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    /// §4.8's status graph: `backlog → todo → in_progress → review → done`,
    /// with back-edges `review → in_progress` and `review → todo`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Backlog, Todo)
                | (Todo, InProgress)
                | (InProgress, Review)
                | (InProgress, Done)
                | (Review, Done)
                | (Review, InProgress)
                | (Review, Todo)
                // Fail semantics send an in-progress task back to todo, and
                // the timeout sweep applies the same transition.
                | (InProgress, Todo)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub current: u64,
    pub total: u64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanbanTask {
    pub task_uuid: Uuid,
    pub team_uuid: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Free-form, user-visible labels. Capability matching uses
    /// `required_capability` instead — see REDESIGN FLAGS in the design
    /// notes for why the two are split.
    #[serde(default)]
    pub tags: Vec<String>,
    pub required_capability: Option<String>,
    pub assigned_agent: Option<Uuid>,
    pub created_by_agent: Option<Uuid>,
    pub created_by_user: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    pub input_mapping: Option<serde_json::Map<String, Value>>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "KanbanTask::default_max_retries")]
    pub max_retries: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: Option<TaskProgress>,
    pub output: Option<Value>,
    pub result: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KanbanTask {
    fn default_max_retries() -> u32 {
        2
    }

    pub fn new(team_uuid: Uuid, title: String, description: String) -> Self {
        let now = Utc::now();
        Self {
            task_uuid: Uuid::new_v4(),
            team_uuid,
            title,
            description,
            status: TaskStatus::Backlog,
            priority: TaskPriority::Medium,
            tags: Vec::new(),
            required_capability: None,
            assigned_agent: None,
            created_by_agent: None,
            created_by_user: None,
            depends_on: Vec::new(),
            input_mapping: None,
            timeout_ms: None,
            retry_count: 0,
            max_retries: Self::default_max_retries(),
            started_at: None,
            completed_at: None,
            progress: None,
            output: None,
            result: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self.status, TaskStatus::Todo) && self.assigned_agent.is_none()
    }
}
