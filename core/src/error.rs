//! Error taxonomy shared by every component in this crate.
//!
//! Kinds, not type names: each variant corresponds to one of the kinds
//! used by the worker's propagation policy. Component-local error enums
//! (router, gateway, webhook, queue) convert into this one with `#[from]`
//! or an explicit `map_err` at the boundary they cross.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Mirrors §7's Transient/Permanent split: true when the caller should
    /// still consider the operation retryable, false when it should
    /// short-circuit.
    pub fn retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}
