use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Active,
    Released,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    Fail,
    Queue,
    Merge,
    Escalate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLock {
    pub lock_uuid: Uuid,
    pub resource_type: String,
    pub resource_id: String,
    pub owner_agent: Uuid,
    pub status: LockStatus,
    pub conflict_strategy: ConflictStrategy,
    pub content_hash: Option<String>,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    /// Bumped on every idempotent re-acquire by the same owner; used to
    /// satisfy the round-trip law "re-acquiring returns a lock whose
    /// version is incremented."
    #[serde(default)]
    pub version: u64,
}

impl ResourceLock {
    pub fn new(
        resource_type: String,
        resource_id: String,
        owner_agent: Uuid,
        conflict_strategy: ConflictStrategy,
        content_hash: Option<String>,
        timeout_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            lock_uuid: Uuid::new_v4(),
            resource_type,
            resource_id,
            owner_agent,
            status: LockStatus::Active,
            conflict_strategy,
            content_hash,
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(timeout_seconds),
            released_at: None,
            version: 1,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == LockStatus::Active && self.expires_at > now
    }
}
