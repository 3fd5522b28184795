//! C5: HTTP dispatcher invoking an agent's `/orchestration/execute`
//! endpoint. Grounded on the teacher's `agent-runner::client::WorkerClient`
//! shape, simplified to a single request/response instead of an SSE
//! stream since agents here return one synchronous result per stage.

use async_trait::async_trait;
use orchestrator_core::dispatch::{AgentDispatcher, DispatchError, DispatchRequest, DispatchSuccess};
use orchestrator_core::error::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ExecuteResponse {
    Success {
        output: Value,
        execution_time_ms: u64,
        #[serde(default)]
        memory_writes: Option<Value>,
    },
    Error {
        code: String,
        message: String,
        #[serde(default)]
        retryable: bool,
    },
}

pub struct HttpAgentClient {
    http: reqwest::Client,
}

impl Default for HttpAgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpAgentClient {
    pub fn new() -> Self {
        Self {
            // Disabling the system proxy matches the teacher's worker
            // client: calls here are to peer agents, not external services.
            http: reqwest::Client::builder()
                .no_proxy()
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl AgentDispatcher for HttpAgentClient {
    async fn dispatch(
        &self,
        agent_endpoint: &str,
        agent_external_id: &str,
        auth_secret: &str,
        request: DispatchRequest,
    ) -> std::result::Result<DispatchSuccess, DispatchError> {
        let url = format!("{}/orchestration/execute", agent_endpoint.trim_end_matches('/'));
        info!(%url, stage_id = %request.stage_id, "dispatching stage to agent");

        let response = self
            .http
            .post(&url)
            .bearer_auth(auth_secret)
            .header("X-Workflow-Run-Id", &request.workflow_run_id)
            .header("X-Stage-Id", &request.stage_id)
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(err) if err.is_timeout() => {
                return Err(DispatchError::Timeout {
                    agent_external_id: agent_external_id.to_string(),
                })
            }
            Err(err) => {
                return Err(DispatchError::NetworkError {
                    agent_external_id: agent_external_id.to_string(),
                    message: err.to_string(),
                })
            }
        };

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::AgentServerError {
                agent_external_id: agent_external_id.to_string(),
                message: body,
            });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::AgentClientError {
                agent_external_id: agent_external_id.to_string(),
                code: status.as_str().to_string(),
                message: body,
            });
        }

        let parsed: ExecuteResponse = response.json().await.map_err(|err| DispatchError::AgentServerError {
            agent_external_id: agent_external_id.to_string(),
            message: format!("malformed response body: {err}"),
        })?;

        match parsed {
            ExecuteResponse::Success {
                output,
                execution_time_ms,
                memory_writes,
            } => Ok(DispatchSuccess {
                output,
                execution_time_ms,
                memory_writes,
            }),
            ExecuteResponse::Error {
                code,
                message,
                retryable,
            } => {
                warn!(%code, %message, "agent reported an execution error");
                if retryable {
                    Err(DispatchError::AgentServerError {
                        agent_external_id: agent_external_id.to_string(),
                        message,
                    })
                } else {
                    Err(DispatchError::AgentClientError {
                        agent_external_id: agent_external_id.to_string(),
                        code,
                        message,
                    })
                }
            }
        }
    }

    async fn health_check(&self, agent_endpoint: &str) -> Result<bool> {
        let url = format!("{}/health", agent_endpoint.trim_end_matches('/'));
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body: Value = resp.json().await.unwrap_or(Value::Null);
                Ok(body.get("status").and_then(Value::as_str) == Some("healthy"))
            }
            _ => Ok(false),
        }
    }
}
