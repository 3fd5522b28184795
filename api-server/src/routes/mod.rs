//! Route handlers

pub mod agents;
pub mod approvals;
pub mod audit;
pub mod gateway;
pub mod health;
pub mod kanban;
pub mod locks;
pub mod teams;
pub mod webhooks;
pub mod workflows;
