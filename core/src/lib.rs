//! Core library for the agent orchestration platform.
//!
//! Contains the data model, the persistence layer, and every stateless
//! and stateful component the API server wires together: the event bus,
//! cache, audit signer, agent router, kanban engine, webhook dispatcher,
//! queue broker, and workflow worker.

pub mod audit_signer;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod eventbus;
pub mod kanban_engine;
pub mod model;
pub mod queue;
pub mod router;
pub mod secret_crypto;
pub mod store;
pub mod template;
pub mod webhook_dispatcher;
pub mod workflow_worker;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
