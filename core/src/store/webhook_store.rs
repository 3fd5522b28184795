//! C12 persistence for `Webhook` registrations and their `WebhookDelivery` log.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Webhook, WebhookDelivery, WebhookDeliveryStatus};

use super::file_backed::{load_snapshot, write_snapshot};

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    webhooks: Vec<Webhook>,
    deliveries: Vec<WebhookDelivery>,
}

struct State {
    webhooks: HashMap<Uuid, Webhook>,
    deliveries: HashMap<Uuid, WebhookDelivery>,
}

#[derive(Clone)]
pub struct WebhookStore {
    state: Arc<RwLock<State>>,
    path: PathBuf,
}

impl WebhookStore {
    pub async fn new(path: PathBuf) -> Result<Self> {
        let snapshot: Snapshot = load_snapshot(&path).await?;
        let webhooks = snapshot
            .webhooks
            .into_iter()
            .map(|w| (w.webhook_uuid, w))
            .collect();
        let deliveries = snapshot
            .deliveries
            .into_iter()
            .map(|d| (d.delivery_uuid, d))
            .collect();
        Ok(Self {
            state: Arc::new(RwLock::new(State { webhooks, deliveries })),
            path,
        })
    }

    async fn persist(&self, state: &State) -> Result<()> {
        let snapshot = Snapshot {
            webhooks: state.webhooks.values().cloned().collect(),
            deliveries: state.deliveries.values().cloned().collect(),
        };
        write_snapshot(&self.path, &snapshot).await
    }

    pub async fn register(&self, webhook: Webhook) -> Result<Webhook> {
        let mut state = self.state.write().await;
        state.webhooks.insert(webhook.webhook_uuid, webhook.clone());
        self.persist(&state).await?;
        Ok(webhook)
    }

    pub async fn get(&self, webhook_uuid: Uuid) -> Result<Webhook> {
        let state = self.state.read().await;
        state
            .webhooks
            .get(&webhook_uuid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("webhook {webhook_uuid} not found")))
    }

    pub async fn list_for_team_event(&self, team_uuid: Uuid, event_type: &str) -> Result<Vec<Webhook>> {
        let state = self.state.read().await;
        Ok(state
            .webhooks
            .values()
            .filter(|w| w.team_uuid == team_uuid && w.matches(event_type))
            .cloned()
            .collect())
    }

    pub async fn deactivate(&self, webhook_uuid: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let webhook = state
            .webhooks
            .get_mut(&webhook_uuid)
            .ok_or_else(|| Error::NotFound(format!("webhook {webhook_uuid} not found")))?;
        webhook.active = false;
        self.persist(&state).await?;
        Ok(())
    }

    pub async fn create_delivery(&self, delivery: WebhookDelivery) -> Result<WebhookDelivery> {
        let mut state = self.state.write().await;
        state.deliveries.insert(delivery.delivery_uuid, delivery.clone());
        self.persist(&state).await?;
        Ok(delivery)
    }

    pub async fn update_delivery<F>(&self, delivery_uuid: Uuid, mutate: F) -> Result<WebhookDelivery>
    where
        F: FnOnce(&mut WebhookDelivery),
    {
        let mut state = self.state.write().await;
        let delivery = state
            .deliveries
            .get_mut(&delivery_uuid)
            .ok_or_else(|| Error::NotFound(format!("delivery {delivery_uuid} not found")))?;
        mutate(delivery);
        let updated = delivery.clone();
        self.persist(&state).await?;
        Ok(updated)
    }

    /// Sweep candidates: `pending`/`failed` deliveries whose `next_retry_at`
    /// has elapsed, capped at 50 per call per §4.9.
    pub async fn list_due_deliveries(&self, limit: usize) -> Result<Vec<WebhookDelivery>> {
        let now = Utc::now();
        let state = self.state.read().await;
        let mut due: Vec<WebhookDelivery> = state
            .deliveries
            .values()
            .filter(|d| {
                matches!(
                    d.status,
                    WebhookDeliveryStatus::Pending | WebhookDeliveryStatus::Failed
                ) && d.next_retry_at.map(|t| t <= now).unwrap_or(true)
            })
            .cloned()
            .collect();
        due.sort_by_key(|d| d.created_at);
        due.truncate(limit);
        Ok(due)
    }
}
