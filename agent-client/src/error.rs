//! Transport-level errors, classified into the §4.5 taxonomy before being
//! handed back across the `AgentDispatcher` boundary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("agent server error ({status}) from {endpoint}: {message}")]
    AgentServerError {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("agent client error ({status}) from {endpoint}: {message}")]
    AgentClientError {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("network error calling {endpoint}: {message}")]
    NetworkError { endpoint: String, message: String },
}
