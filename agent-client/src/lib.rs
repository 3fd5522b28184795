//! HTTP implementation of `orchestrator_core::dispatch::AgentDispatcher`.

pub mod client;
pub mod error;

pub use client::HttpAgentClient;
pub use error::ClientError;
