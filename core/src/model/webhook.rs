use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub webhook_uuid: Uuid,
    pub team_uuid: Uuid,
    pub url: String,
    pub secret: String,
    pub events: BTreeSet<String>,
    pub active: bool,
}

impl Webhook {
    pub fn new(team_uuid: Uuid, url: String, secret: String, events: BTreeSet<String>) -> Self {
        Self {
            webhook_uuid: Uuid::new_v4(),
            team_uuid,
            url,
            secret,
            events,
            active: true,
        }
    }

    pub fn matches(&self, event_type: &str) -> bool {
        self.active && self.events.contains(event_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDeliveryStatus {
    Pending,
    Success,
    Failed,
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub delivery_uuid: Uuid,
    pub webhook_uuid: Uuid,
    pub event_type: String,
    pub status: WebhookDeliveryStatus,
    pub attempts: u32,
    #[serde(default = "WebhookDelivery::default_max_attempts")]
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_code: Option<u16>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl WebhookDelivery {
    fn default_max_attempts() -> u32 {
        5
    }

    pub fn new(webhook_uuid: Uuid, event_type: String, payload: Value) -> Self {
        Self {
            delivery_uuid: Uuid::new_v4(),
            webhook_uuid,
            event_type,
            status: WebhookDeliveryStatus::Pending,
            attempts: 0,
            max_attempts: Self::default_max_attempts(),
            next_retry_at: None,
            response_code: None,
            payload,
            created_at: Utc::now(),
        }
    }
}
