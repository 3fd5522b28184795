//! C9: matches team events against registered webhooks, signs and
//! delivers them over HTTP, and sweeps due retries with capped exponential
//! backoff to dead-letter.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Webhook, WebhookDelivery, WebhookDeliveryStatus};
use crate::store::WebhookStore;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const BASE_BACKOFF_SECS: i64 = 60;
const MAX_BACKOFF_SECS: i64 = 3600;
const SWEEP_BATCH: usize = 50;

pub fn canonical_body(event_type: &str, payload: &Value) -> Value {
    json!({
        "event": event_type,
        "timestamp": Utc::now().to_rfc3339(),
        "payload": payload,
    })
}

pub fn sign_body(body: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn next_backoff(attempts: u32) -> i64 {
    let exp = BASE_BACKOFF_SECS.saturating_mul(1i64 << attempts.saturating_sub(1).min(20));
    exp.min(MAX_BACKOFF_SECS)
}

pub struct DeliveryOutcome {
    pub delivery_uuid: Uuid,
    pub status: WebhookDeliveryStatus,
    pub response_code: Option<u16>,
}

pub struct WebhookDispatcher<'a> {
    store: &'a WebhookStore,
    http: reqwest::Client,
}

impl<'a> WebhookDispatcher<'a> {
    pub fn new(store: &'a WebhookStore) -> Self {
        Self {
            store,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Called by the event bus subscriber wired in the API server: queues
    /// a delivery for every registered, active webhook matching `event_type`.
    pub async fn enqueue_for_event(
        &self,
        team_uuid: Uuid,
        event_type: &str,
        payload: Value,
    ) -> Result<Vec<WebhookDelivery>> {
        let webhooks = self.store.list_for_team_event(team_uuid, event_type).await?;
        let mut queued = Vec::with_capacity(webhooks.len());
        for webhook in webhooks {
            let delivery = WebhookDelivery::new(webhook.webhook_uuid, event_type.to_string(), payload.clone());
            queued.push(self.store.create_delivery(delivery).await?);
        }
        Ok(queued)
    }

    async fn attempt(&self, webhook: &Webhook, delivery: &WebhookDelivery) -> DeliveryOutcome {
        let body = canonical_body(&delivery.event_type, &delivery.payload);
        let encoded = serde_json::to_string(&body).unwrap_or_default();
        let signature = sign_body(&encoded, &webhook.secret);

        let response = self
            .http
            .post(&webhook.url)
            .header("X-Signature", format!("sha256={signature}"))
            .header("X-Event", &delivery.event_type)
            .header("X-Delivery", delivery.delivery_uuid.to_string())
            .header("Content-Type", "application/json")
            .body(encoded)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => DeliveryOutcome {
                delivery_uuid: delivery.delivery_uuid,
                status: WebhookDeliveryStatus::Success,
                response_code: Some(resp.status().as_u16()),
            },
            Ok(resp) => DeliveryOutcome {
                delivery_uuid: delivery.delivery_uuid,
                status: WebhookDeliveryStatus::Failed,
                response_code: Some(resp.status().as_u16()),
            },
            Err(_) => DeliveryOutcome {
                delivery_uuid: delivery.delivery_uuid,
                status: WebhookDeliveryStatus::Failed,
                response_code: None,
            },
        }
    }

    async fn record_outcome(&self, webhook: &Webhook, outcome: DeliveryOutcome) -> Result<WebhookDelivery> {
        self.store
            .update_delivery(outcome.delivery_uuid, |d| {
                d.attempts += 1;
                d.response_code = outcome.response_code;
                match outcome.status {
                    WebhookDeliveryStatus::Success => {
                        d.status = WebhookDeliveryStatus::Success;
                        d.next_retry_at = None;
                    }
                    _ if !webhook.active => {
                        d.status = WebhookDeliveryStatus::DeadLetter;
                        d.next_retry_at = None;
                    }
                    _ if d.attempts >= d.max_attempts => {
                        d.status = WebhookDeliveryStatus::DeadLetter;
                        d.next_retry_at = None;
                    }
                    _ => {
                        d.status = WebhookDeliveryStatus::Failed;
                        d.next_retry_at = Some(Utc::now() + chrono::Duration::seconds(next_backoff(d.attempts)));
                    }
                }
            })
            .await
    }

    /// One sweep cycle: up to `SWEEP_BATCH` due deliveries are attempted.
    pub async fn sweep(&self) -> Result<usize> {
        let due = self.store.list_due_deliveries(SWEEP_BATCH).await?;
        let mut attempted = 0;
        for delivery in due {
            let webhook = match self.store.get(delivery.webhook_uuid).await {
                Ok(w) => w,
                Err(_) => continue,
            };
            if !webhook.active {
                self.store
                    .update_delivery(delivery.delivery_uuid, |d| {
                        d.status = WebhookDeliveryStatus::DeadLetter;
                        d.next_retry_at = None;
                    })
                    .await?;
                continue;
            }
            let outcome = self.attempt(&webhook, &delivery).await;
            self.record_outcome(&webhook, outcome).await?;
            attempted += 1;
        }
        Ok(attempted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_one_hour() {
        assert_eq!(next_backoff(1), 60);
        assert_eq!(next_backoff(2), 120);
        assert_eq!(next_backoff(3), 240);
        assert_eq!(next_backoff(20), MAX_BACKOFF_SECS);
    }

    #[test]
    fn signature_is_deterministic_for_same_body_and_secret() {
        let a = sign_body("{\"x\":1}", "secret");
        let b = sign_body("{\"x\":1}", "secret");
        assert_eq!(a, b);
        let c = sign_body("{\"x\":1}", "other-secret");
        assert_ne!(a, c);
    }
}
