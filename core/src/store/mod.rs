//! C12 persistence layer: one store per entity family, each an
//! `Arc<RwLock<..>>` index backed by a JSON snapshot on disk.

pub mod agent_store;
pub mod approval_store;
pub mod audit_store;
pub mod file_backed;
pub mod kanban_store;
pub mod lock_store;
pub mod team_store;
pub mod webhook_store;
pub mod workflow_store;

pub use agent_store::AgentStore;
pub use approval_store::ApprovalStore;
pub use audit_store::{AuditListQuery, AuditStore};
pub use kanban_store::KanbanStore;
pub use lock_store::LockStore;
pub use team_store::TeamStore;
pub use webhook_store::WebhookStore;
pub use workflow_store::WorkflowStore;
