//! Entity types from the data model: the shapes every component reads
//! and writes, independent of how any one of them is persisted.

pub mod agent;
pub mod agent_version;
pub mod approval;
pub mod audit;
pub mod kanban;
pub mod lock;
pub mod team;
pub mod webhook;
pub mod workflow;

pub use agent::{Agent, AgentStatus};
pub use agent_version::{AgentVersion, AgentVersionStatus};
pub use approval::{ApprovalGate, ApprovalStatus};
pub use audit::{AuditAction, AuditRecord, AuditSignature};
pub use kanban::{KanbanTask, TaskPriority, TaskProgress, TaskStatus};
pub use lock::{ConflictStrategy, LockStatus, ResourceLock};
pub use team::{Team, TeamMember, TeamRole};
pub use webhook::{Webhook, WebhookDelivery, WebhookDeliveryStatus};
pub use workflow::{
    RetryConfig, StageDefinition, StageExecution, StageExecutionStatus, WorkflowDefinition,
    WorkflowRun, WorkflowRunStatus,
};
