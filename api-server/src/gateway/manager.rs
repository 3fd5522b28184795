//! Connection table for the per-agent gateway (C6). Grounded on the
//! teacher's `GatewayManager`, but keyed by `agent_uuid` with a
//! single-writer invariant: registering a new connection for an agent
//! always displaces whatever was registered before it, and a displaced
//! connection only ever unregisters itself if it is still the one on
//! record (`same_channel` guards against a stale connection's cleanup
//! clobbering the connection that replaced it).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use super::protocol::ServerToAgentMessage;

/// Internal channel payload: either a protocol frame to forward verbatim,
/// or an instruction to close the socket with a specific code.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(ServerToAgentMessage),
    Close { code: u16, reason: &'static str },
}

struct AgentConnection {
    tx: mpsc::Sender<Outbound>,
    last_heartbeat: Instant,
}

pub struct GatewayManager {
    connections: RwLock<HashMap<Uuid, AgentConnection>>,
}

impl Default for GatewayManager {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `tx` as the live connection for `agent_uuid`. If a
    /// connection was already registered, returns its sender so the caller
    /// can tell it to close with code 4003 before the new stream proceeds.
    pub async fn register(
        &self,
        agent_uuid: Uuid,
        tx: mpsc::Sender<Outbound>,
    ) -> Option<mpsc::Sender<Outbound>> {
        let mut connections = self.connections.write().await;
        let previous = connections.insert(
            agent_uuid,
            AgentConnection {
                tx,
                last_heartbeat: Instant::now(),
            },
        );
        if previous.is_some() {
            warn!(%agent_uuid, "replacing existing gateway connection");
        } else {
            info!(%agent_uuid, "registered gateway connection");
        }
        previous.map(|conn| conn.tx)
    }

    /// Removes the registration for `agent_uuid` only if `tx` is still the
    /// sender on record. Returns true when it removed the entry.
    pub async fn unregister_if_current(&self, agent_uuid: Uuid, tx: &mpsc::Sender<Outbound>) -> bool {
        let mut connections = self.connections.write().await;
        let Some(conn) = connections.get(&agent_uuid) else {
            return false;
        };
        if !conn.tx.same_channel(tx) {
            return false;
        }
        connections.remove(&agent_uuid);
        info!(%agent_uuid, "gateway connection closed");
        true
    }

    pub async fn touch_heartbeat(&self, agent_uuid: Uuid) {
        if let Some(conn) = self.connections.write().await.get_mut(&agent_uuid) {
            conn.last_heartbeat = Instant::now();
        }
    }

    pub async fn send_to(&self, agent_uuid: Uuid, message: ServerToAgentMessage) -> bool {
        let connections = self.connections.read().await;
        match connections.get(&agent_uuid) {
            Some(conn) => conn.tx.send(Outbound::Frame(message)).await.is_ok(),
            None => false,
        }
    }

    /// Instructs the connection to close with `code`; the owning
    /// connection task removes itself from the table once its send task
    /// processes the close.
    pub async fn send_close(&self, agent_uuid: Uuid, code: u16, reason: &'static str) -> bool {
        let connections = self.connections.read().await;
        match connections.get(&agent_uuid) {
            Some(conn) => conn.tx.send(Outbound::Close { code, reason }).await.is_ok(),
            None => false,
        }
    }

    pub async fn is_connected(&self, agent_uuid: Uuid) -> bool {
        self.connections.read().await.contains_key(&agent_uuid)
    }

    pub async fn connected_agents(&self) -> Vec<Uuid> {
        self.connections.read().await.keys().copied().collect()
    }

    /// Connections whose last inbound frame predates `timeout` — used by
    /// the heartbeat checker to close sockets the client has gone silent on.
    pub async fn stale_agents(&self, timeout: Duration) -> Vec<Uuid> {
        let now = Instant::now();
        self.connections
            .read()
            .await
            .iter()
            .filter(|(_, conn)| now.duration_since(conn.last_heartbeat) > timeout)
            .map(|(agent_uuid, _)| *agent_uuid)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_replaces_prior_connection() {
        let manager = GatewayManager::new();
        let agent_uuid = Uuid::new_v4();
        let (tx1, _rx1) = mpsc::channel(10);
        let (tx2, _rx2) = mpsc::channel(10);

        assert!(manager.register(agent_uuid, tx1.clone()).await.is_none());
        let replaced = manager.register(agent_uuid, tx2).await;
        assert!(replaced.is_some());
        assert!(replaced.unwrap().same_channel(&tx1));
        assert!(manager.is_connected(agent_uuid).await);
    }

    #[tokio::test]
    async fn stale_unregister_does_not_remove_current_connection() {
        let manager = GatewayManager::new();
        let agent_uuid = Uuid::new_v4();
        let (tx1, _rx1) = mpsc::channel(10);
        let (tx2, _rx2) = mpsc::channel(10);

        manager.register(agent_uuid, tx1.clone()).await;
        manager.register(agent_uuid, tx2.clone()).await;

        // The displaced connection's cleanup must not win the race.
        assert!(!manager.unregister_if_current(agent_uuid, &tx1).await);
        assert!(manager.is_connected(agent_uuid).await);

        assert!(manager.unregister_if_current(agent_uuid, &tx2).await);
        assert!(!manager.is_connected(agent_uuid).await);
    }
}
