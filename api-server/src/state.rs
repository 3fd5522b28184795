//! Shared application state: every core store plus the process-wide
//! singletons (cache, event bus, queue broker, audit signing key, agent
//! dispatcher, gateway manager) that the route handlers and background
//! tasks in `main.rs` are wired against. Follows the teacher's
//! `Arc<AppStateInner>` wrapping with per-field accessor methods.

use std::path::PathBuf;
use std::sync::Arc;

use orchestrator_agent_client::HttpAgentClient;
use orchestrator_core::audit_signer::SigningKey;
use orchestrator_core::cache::Cache;
use orchestrator_core::config::Config;
use orchestrator_core::dispatch::DynAgentDispatcher;
use orchestrator_core::eventbus::EventBus;
use orchestrator_core::queue::QueueBroker;
use orchestrator_core::secret_crypto::SecretKey;
use orchestrator_core::store::agent_store::AgentStore;
use orchestrator_core::store::approval_store::ApprovalStore;
use orchestrator_core::store::audit_store::AuditStore;
use orchestrator_core::store::kanban_store::KanbanStore;
use orchestrator_core::store::lock_store::LockStore;
use orchestrator_core::store::team_store::TeamStore;
use orchestrator_core::store::webhook_store::WebhookStore;
use orchestrator_core::store::workflow_store::WorkflowStore;
use orchestrator_core::Result;

use crate::gateway::GatewayManager;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    agent_store: Arc<AgentStore>,
    team_store: Arc<TeamStore>,
    kanban_store: Arc<KanbanStore>,
    workflow_store: Arc<WorkflowStore>,
    approval_store: Arc<ApprovalStore>,
    lock_store: Arc<LockStore>,
    webhook_store: Arc<WebhookStore>,
    audit_store: Arc<AuditStore>,
    cache: Arc<Cache>,
    bus: Arc<EventBus>,
    queue: Arc<QueueBroker>,
    signing_key: Arc<SigningKey>,
    secret_key: Arc<SecretKey>,
    dispatcher: Arc<DynAgentDispatcher>,
    gateway: Arc<GatewayManager>,
    config: Config,
}

impl AppState {
    /// Builds every store under `config.data_dir`, loading a signing key
    /// from `config.audit_signing_*_key_path` when both are set and
    /// falling back to `SigningKey::unconfigured()` (records persist
    /// unsigned) otherwise, matching §4.3's stated fallback.
    pub async fn new(config: Config) -> Result<Self> {
        let data_dir = config.data_dir.clone();
        std::fs::create_dir_all(&data_dir)?;

        let agent_store = Arc::new(AgentStore::new(data_dir.join("agents.json")).await?);
        let team_store = Arc::new(TeamStore::new(data_dir.join("teams.json")).await?);
        let kanban_store = Arc::new(KanbanStore::new(data_dir.join("kanban.json")).await?);
        let workflow_store = Arc::new(WorkflowStore::new(data_dir.join("workflows.json")).await?);
        let approval_store = Arc::new(ApprovalStore::new(data_dir.join("approvals.json")).await?);
        let lock_store = Arc::new(LockStore::new(data_dir.join("locks.json")).await?);
        let webhook_store = Arc::new(WebhookStore::new(data_dir.join("webhooks.json")).await?);
        let audit_store = Arc::new(AuditStore::new(data_dir.join("audit")).await?);

        let signing_key = Arc::new(load_signing_key(&config).await?);
        let secret_key = Arc::new(load_secret_key(&config)?);
        let dispatcher: Arc<DynAgentDispatcher> = Arc::new(HttpAgentClient::new());

        Ok(Self::assemble(
            agent_store,
            team_store,
            kanban_store,
            workflow_store,
            approval_store,
            lock_store,
            webhook_store,
            audit_store,
            signing_key,
            secret_key,
            dispatcher,
            config,
        ))
    }

    /// Assembles an `AppState` from pre-built stores — used by `new` and
    /// directly by tests that want a `tempfile::TempDir`-backed instance
    /// without going through `Config::from_env`.
    #[allow(clippy::too_many_arguments)]
    fn assemble(
        agent_store: Arc<AgentStore>,
        team_store: Arc<TeamStore>,
        kanban_store: Arc<KanbanStore>,
        workflow_store: Arc<WorkflowStore>,
        approval_store: Arc<ApprovalStore>,
        lock_store: Arc<LockStore>,
        webhook_store: Arc<WebhookStore>,
        audit_store: Arc<AuditStore>,
        signing_key: Arc<SigningKey>,
        secret_key: Arc<SecretKey>,
        dispatcher: Arc<DynAgentDispatcher>,
        config: Config,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                agent_store,
                team_store,
                kanban_store,
                workflow_store,
                approval_store,
                lock_store,
                webhook_store,
                audit_store,
                cache: Arc::new(Cache::new()),
                bus: Arc::new(EventBus::new()),
                queue: Arc::new(QueueBroker::new()),
                signing_key,
                secret_key,
                dispatcher,
                gateway: Arc::new(GatewayManager::new()),
                config,
            }),
        }
    }

    #[cfg(test)]
    pub async fn for_tests(data_dir: PathBuf) -> Result<Self> {
        let mut config = Config::from_env();
        config.data_dir = data_dir;
        config.dispatch_mode = orchestrator_core::workflow_worker::DispatchMode::Mock;
        Self::new(config).await
    }

    pub fn agent_store(&self) -> &AgentStore {
        &self.inner.agent_store
    }

    pub fn team_store(&self) -> &TeamStore {
        &self.inner.team_store
    }

    pub fn kanban_store(&self) -> &KanbanStore {
        &self.inner.kanban_store
    }

    pub fn workflow_store(&self) -> &WorkflowStore {
        &self.inner.workflow_store
    }

    pub fn approval_store(&self) -> &ApprovalStore {
        &self.inner.approval_store
    }

    pub fn lock_store(&self) -> &LockStore {
        &self.inner.lock_store
    }

    pub fn webhook_store(&self) -> &WebhookStore {
        &self.inner.webhook_store
    }

    pub fn audit_store(&self) -> &AuditStore {
        &self.inner.audit_store
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn bus_arc(&self) -> Arc<EventBus> {
        Arc::clone(&self.inner.bus)
    }

    pub fn queue(&self) -> &QueueBroker {
        &self.inner.queue
    }

    pub fn queue_arc(&self) -> Arc<QueueBroker> {
        Arc::clone(&self.inner.queue)
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.inner.signing_key
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.inner.secret_key
    }

    pub fn dispatcher(&self) -> &DynAgentDispatcher {
        &self.inner.dispatcher
    }

    pub fn dispatcher_arc(&self) -> Arc<DynAgentDispatcher> {
        Arc::clone(&self.inner.dispatcher)
    }

    pub fn gateway(&self) -> &GatewayManager {
        &self.inner.gateway
    }

    pub fn gateway_arc(&self) -> Arc<GatewayManager> {
        Arc::clone(&self.inner.gateway)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

async fn load_signing_key(config: &Config) -> Result<SigningKey> {
    let (Some(private_path), Some(public_path)) = (
        config.audit_signing_private_key_path.as_ref(),
        config.audit_signing_public_key_path.as_ref(),
    ) else {
        return Ok(SigningKey::unconfigured());
    };
    let private_pem = tokio::fs::read(private_path).await?;
    let public_pem = tokio::fs::read(public_path).await?;
    SigningKey::from_pem(&private_pem, &public_pem, "orchestrator-api-server".to_string())
}

fn load_secret_key(config: &Config) -> Result<SecretKey> {
    match config.agent_token_encryption_key.as_deref() {
        Some(key_hex) => SecretKey::from_hex(key_hex),
        None => Ok(SecretKey::unconfigured()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_every_store_under_a_fresh_data_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let state = AppState::for_tests(tmp.path().to_path_buf()).await.unwrap();
        assert_eq!(state.queue().pending_len(), 0);
        assert!(matches!(state.signing_key(), SigningKey::Unconfigured));
    }
}
