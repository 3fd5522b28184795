//! Dispatch boundary between the workflow worker (C7, in this crate) and
//! the HTTP agent client (C5, in `agent-client`). Kept as a trait here so
//! `core` never depends on `agent-client` while both are wired together
//! by the API server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchContext {
    pub previous_stages: Value,
    pub user_id: String,
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub workflow_run_id: String,
    pub stage_id: String,
    pub capability_required: String,
    pub input: Value,
    pub context: DispatchContext,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSuccess {
    pub output: Value,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub memory_writes: Option<Value>,
}

/// §4.5 error classification. `retryable()` feeds directly into the
/// worker's retry/fallback decision.
#[derive(Debug, Clone)]
pub enum DispatchError {
    Timeout { agent_external_id: String },
    AgentServerError { agent_external_id: String, message: String },
    AgentClientError { agent_external_id: String, code: String, message: String },
    NetworkError { agent_external_id: String, message: String },
}

impl DispatchError {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Timeout { .. }
                | DispatchError::AgentServerError { .. }
                | DispatchError::NetworkError { .. }
        )
    }

    pub fn agent_external_id(&self) -> &str {
        match self {
            DispatchError::Timeout { agent_external_id }
            | DispatchError::AgentServerError { agent_external_id, .. }
            | DispatchError::AgentClientError { agent_external_id, .. }
            | DispatchError::NetworkError { agent_external_id, .. } => agent_external_id,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Timeout { .. } => "TIMEOUT",
            DispatchError::AgentServerError { .. } => "AGENT_SERVER_ERROR",
            DispatchError::AgentClientError { .. } => "AGENT_CLIENT_ERROR",
            DispatchError::NetworkError { .. } => "NETWORK_ERROR",
        }
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.code(), self)
    }
}

impl std::error::Error for DispatchError {}

/// Implemented by `agent-client`'s HTTP client; the workflow worker in
/// this crate depends only on this trait.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        agent_endpoint: &str,
        agent_external_id: &str,
        auth_secret: &str,
        request: DispatchRequest,
    ) -> std::result::Result<DispatchSuccess, DispatchError>;

    /// Used by the health checker background task to probe an agent's
    /// `/health` endpoint independent of stage dispatch.
    async fn health_check(&self, agent_endpoint: &str) -> Result<bool>;
}

pub type DynAgentDispatcher = dyn AgentDispatcher;
