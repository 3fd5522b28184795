//! C3 append-only JSONL persistence for `AuditRecord`.
//!
//! Appends are fsync'd one event at a time and mirrored into an in-memory
//! `Vec` for paginated reads; malformed lines in a pre-existing log are
//! skipped with a warning rather than failing startup.

use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::model::AuditRecord;

#[derive(Default, Clone)]
pub struct AuditListQuery {
    pub run_id: Option<String>,
    pub stage_id: Option<String>,
    pub agent_id: Option<String>,
    pub action: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

pub struct AuditStore {
    log_path: PathBuf,
    records: RwLock<Vec<AuditRecord>>,
}

impl AuditStore {
    pub async fn new(root_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root_dir).await?;
        let log_path = root_dir.join("audit.jsonl");
        if fs::metadata(&log_path).await.is_err() {
            fs::File::create(&log_path).await?;
        }
        let records = Self::load(&log_path).await?;
        Ok(Self {
            log_path,
            records: RwLock::new(records),
        })
    }

    async fn load(path: &Path) -> Result<Vec<AuditRecord>> {
        let file = fs::File::open(path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(%err, path = %path.display(), "ignoring malformed audit record"),
            }
        }
        Ok(records)
    }

    pub async fn append(&self, record: AuditRecord) -> Result<AuditRecord> {
        let encoded = serde_json::to_string(&record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(encoded.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        let mut records = self.records.write().await;
        records.push(record.clone());
        Ok(record)
    }

    pub async fn get(&self, record_id: Uuid) -> Option<AuditRecord> {
        let records = self.records.read().await;
        records.iter().find(|r| r.record_id == record_id).cloned()
    }

    /// Newest-first pagination with filters, mirroring the teacher's
    /// `list_paginated` shape; returns `(page, has_more)`.
    pub async fn list_paginated(&self, query: &AuditListQuery) -> (Vec<AuditRecord>, bool) {
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(100).clamp(1, 1000);

        let records = self.records.read().await;
        let mut matched = 0usize;
        let mut page = Vec::with_capacity(limit);

        for record in records.iter().rev() {
            if let Some(run_id) = query.run_id.as_deref() {
                if record.run_id != run_id {
                    continue;
                }
            }
            if let Some(stage_id) = query.stage_id.as_deref() {
                if record.stage_id != stage_id {
                    continue;
                }
            }
            if let Some(agent_id) = query.agent_id.as_deref() {
                if record.agent_id.as_deref() != Some(agent_id) {
                    continue;
                }
            }
            if let Some(action) = query.action.as_deref() {
                if format!("{:?}", record.action).to_lowercase() != action.to_lowercase() {
                    continue;
                }
            }

            if matched < offset {
                matched += 1;
                continue;
            }
            if page.len() < limit {
                page.push(record.clone());
            }
            matched += 1;
        }

        let has_more = matched > offset + page.len();
        (page, has_more)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuditAction;
    use chrono::Utc;

    fn sample(run_id: &str, action: AuditAction) -> AuditRecord {
        AuditRecord {
            record_id: Uuid::new_v4(),
            run_id: run_id.to_string(),
            stage_id: "stage-1".into(),
            agent_id: None,
            action,
            status: "ok".into(),
            input_hash: "h1".into(),
            output_hash: None,
            logged_at: Utc::now(),
            signature: None,
        }
    }

    #[tokio::test]
    async fn append_and_list_returns_latest_first() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = AuditStore::new(dir.path().to_path_buf()).await.unwrap();

        let first = sample("run-1", AuditAction::Execute);
        let second = sample("run-1", AuditAction::Retry);
        store.append(first.clone()).await.unwrap();
        store.append(second.clone()).await.unwrap();

        let (page, has_more) = store.list_paginated(&AuditListQuery::default()).await;
        assert!(!has_more);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].record_id, second.record_id);
        assert_eq!(page[1].record_id, first.record_id);
    }

    #[tokio::test]
    async fn filters_by_run_id() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = AuditStore::new(dir.path().to_path_buf()).await.unwrap();
        store.append(sample("run-1", AuditAction::Execute)).await.unwrap();
        store.append(sample("run-2", AuditAction::Execute)).await.unwrap();

        let query = AuditListQuery {
            run_id: Some("run-2".into()),
            ..Default::default()
        };
        let (page, _) = store.list_paginated(&query).await;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].run_id, "run-2");
    }
}
