//! C11 persistence for `ResourceLock`, keyed by `(resource_type, resource_id)`.
//!
//! Uses the atomic snapshot writer: lock state guards concurrent agent
//! writes to shared resources, so a torn write here is worse than the
//! extra fsync cost.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{ConflictStrategy, LockStatus, ResourceLock};

use super::file_backed::{load_snapshot, persist_snapshot_atomic};

fn key(resource_type: &str, resource_id: &str) -> String {
    format!("{resource_type}::{resource_id}")
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    locks: Vec<ResourceLock>,
}

#[derive(Clone)]
pub struct LockStore {
    locks: Arc<RwLock<HashMap<String, ResourceLock>>>,
    path: PathBuf,
}

impl LockStore {
    pub async fn new(path: PathBuf) -> Result<Self> {
        let snapshot: Snapshot = load_snapshot(&path).await?;
        let locks = snapshot
            .locks
            .into_iter()
            .map(|l| (key(&l.resource_type, &l.resource_id), l))
            .collect();
        Ok(Self {
            locks: Arc::new(RwLock::new(locks)),
            path,
        })
    }

    async fn persist(&self, locks: &HashMap<String, ResourceLock>) -> Result<()> {
        let snapshot = Snapshot {
            locks: locks.values().cloned().collect(),
        };
        persist_snapshot_atomic(&self.path, &snapshot).await
    }

    /// §4.11 acquire: a held, unexpired lock on the same resource held by
    /// a different owner is a conflict resolved per `conflict_strategy`;
    /// the same owner re-acquiring is idempotent and bumps `version`.
    pub async fn acquire(
        &self,
        resource_type: String,
        resource_id: String,
        owner_agent: Uuid,
        conflict_strategy: ConflictStrategy,
        content_hash: Option<String>,
        timeout_seconds: i64,
    ) -> Result<ResourceLock> {
        let now = Utc::now();
        let mut locks = self.locks.write().await;
        let k = key(&resource_type, &resource_id);

        if let Some(existing) = locks.get(&k) {
            if existing.is_active(now) {
                if existing.owner_agent == owner_agent {
                    let mut renewed = existing.clone();
                    renewed.version += 1;
                    renewed.expires_at = now + chrono::Duration::seconds(timeout_seconds);
                    renewed.content_hash = content_hash;
                    locks.insert(k, renewed.clone());
                    self.persist(&locks).await?;
                    return Ok(renewed);
                }
                return Err(Error::Conflict(format!(
                    "RESOURCE_LOCKED: {resource_type}/{resource_id} is held by agent {} until {} (strategy: {conflict_strategy:?})",
                    existing.owner_agent,
                    existing.expires_at.to_rfc3339(),
                )));
            }
        }

        let lock = ResourceLock::new(
            resource_type,
            resource_id,
            owner_agent,
            conflict_strategy,
            content_hash,
            timeout_seconds,
        );
        locks.insert(k, lock.clone());
        self.persist(&locks).await?;
        Ok(lock)
    }

    pub async fn release(&self, resource_type: &str, resource_id: &str, owner_agent: Uuid) -> Result<()> {
        let mut locks = self.locks.write().await;
        let k = key(resource_type, resource_id);
        let lock = locks
            .get_mut(&k)
            .ok_or_else(|| Error::NotFound(format!("lock {resource_type}/{resource_id} not found")))?;
        if lock.owner_agent != owner_agent {
            return Err(Error::Authorization(
                "only the owning agent may release this lock".into(),
            ));
        }
        lock.status = LockStatus::Released;
        lock.released_at = Some(Utc::now());
        self.persist(&locks).await?;
        Ok(())
    }

    pub async fn get(&self, resource_type: &str, resource_id: &str) -> Result<Option<ResourceLock>> {
        let locks = self.locks.read().await;
        Ok(locks.get(&key(resource_type, resource_id)).cloned())
    }

    /// §4.11 optimistic check: true when the lock's recorded hash differs
    /// from `current_hash`, i.e. the resource changed underneath the lock.
    pub async fn detect_conflict(&self, lock_uuid: Uuid, current_hash: &str) -> Result<bool> {
        let locks = self.locks.read().await;
        let lock = locks
            .values()
            .find(|l| l.lock_uuid == lock_uuid)
            .ok_or_else(|| Error::NotFound(format!("lock {lock_uuid} not found")))?;
        Ok(lock.content_hash.as_deref() != Some(current_hash))
    }

    /// Expiry sweep: transitions active-but-expired locks to `expired`.
    pub async fn expire_overdue(&self) -> Result<Vec<ResourceLock>> {
        let now = Utc::now();
        let mut locks = self.locks.write().await;
        let mut expired = Vec::new();
        for lock in locks.values_mut() {
            if lock.status == LockStatus::Active && lock.expires_at <= now {
                lock.status = LockStatus::Expired;
                expired.push(lock.clone());
            }
        }
        if !expired.is_empty() {
            self.persist(&locks).await?;
        }
        Ok(expired)
    }
}
