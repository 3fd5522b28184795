//! C1 — in-process topic pub/sub.
//!
//! Channels are free-form strings (`team:<uuid>`, `agent:<uuid>`,
//! `user:<uuid>`). Delivery is synchronous to every registered handler, in
//! registration order; a panicking/erroring handler must not stop the
//! others from running. There is no cross-process propagation — C6 and C9
//! are themselves subscribers that turn bus events into outbound frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub channel: String,
    pub event_type: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    handler: EventHandler,
}

/// Process-wide singleton, shared by capability (an `Arc<EventBus>`
/// handed to every component that needs to publish or subscribe) rather
/// than reached for as a global.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    // Serializes `publish` calls so that, per §4.1, events published by a
    // single component appear to subscribers in publish order even under
    // concurrent callers.
    publish_order: Mutex<()>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            publish_order: Mutex::new(()),
        }
    }

    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers
            .write()
            .expect("event bus subscribers lock poisoned")
            .push(Subscriber { id, handler });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .write()
            .expect("event bus subscribers lock poisoned")
            .retain(|s| s.id != id);
    }

    pub fn publish(&self, channel: impl Into<String>, event_type: impl Into<String>, payload: Value) {
        let _order_guard = self
            .publish_order
            .lock()
            .expect("event bus publish lock poisoned");
        let event = Event {
            channel: channel.into(),
            event_type: event_type.into(),
            payload,
            published_at: Utc::now(),
        };
        let subscribers = self
            .subscribers
            .read()
            .expect("event bus subscribers lock poisoned");
        for subscriber in subscribers.iter() {
            let handler = subscriber.handler.clone();
            let event = event.clone();
            // A handler panic must not take down the publisher or the
            // other subscribers.
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(&event);
            }));
            if outcome.is_err() {
                tracing::error!(channel = %event.channel, event_type = %event.event_type, "event bus handler panicked");
            }
        }
    }
}

pub fn team_channel(team_uuid: impl std::fmt::Display) -> String {
    format!("team:{team_uuid}")
}

pub fn agent_channel(agent_uuid: impl std::fmt::Display) -> String {
    format!("agent:{agent_uuid}")
}

pub fn user_channel(user_uuid: impl std::fmt::Display) -> String {
    format!("user:{user_uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(Arc::new(move |_e| o1.lock().unwrap().push(1)));
        let o2 = order.clone();
        bus.subscribe(Arc::new(move |_e| o2.lock().unwrap().push(2)));

        bus.publish("team:abc", "task:claimed", serde_json::json!({}));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn handler_panic_does_not_stop_other_handlers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Arc::new(|_e| panic!("boom")));
        let h = hits.clone();
        bus.subscribe(Arc::new(move |_e| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish("team:abc", "task:claimed", serde_json::json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = bus.subscribe(Arc::new(move |_e| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        bus.unsubscribe(id);
        bus.publish("team:abc", "task:claimed", serde_json::json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
