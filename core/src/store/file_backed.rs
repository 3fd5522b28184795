//! Shared persistence primitives for the file-backed stores in this
//! module. Every store keeps an in-memory index guarded by
//! `tokio::sync::RwLock` for lock-free reads, and writes through a full
//! JSON snapshot on every mutation — the pattern used throughout this
//! codebase's entity stores.
//!
//! [`persist_snapshot_atomic`] additionally guards against partial writes
//! with a temp-file-then-rename-with-backup sequence, for stores whose
//! corruption would be expensive to recover from (workflow runs, resource
//! locks). Simpler stores may call [`write_snapshot`] directly.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

pub async fn load_snapshot<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&content).map_err(Error::from)
}

pub async fn write_snapshot<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, content).await.map_err(Error::from)
}

/// Atomic write: serialize to a temp file, back up the existing file (if
/// any), rename the temp file into place, then drop the backup. On any
/// failure after the backup is made, the original file is restored.
pub async fn persist_snapshot_atomic<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let token = uuid::Uuid::new_v4();
    let tmp_path = path.with_extension(format!("{token}.tmp"));
    let backup_path = path.with_extension(format!("{token}.bak"));

    tokio::fs::write(&tmp_path, &content).await?;

    let had_existing = path.exists();
    if had_existing {
        tokio::fs::rename(path, &backup_path).await?;
    }

    match tokio::fs::rename(&tmp_path, path).await {
        Ok(()) => {
            if had_existing {
                let _ = tokio::fs::remove_file(&backup_path).await;
            }
            Ok(())
        }
        Err(err) => {
            if had_existing {
                let _ = tokio::fs::rename(&backup_path, path).await;
            }
            Err(Error::from(err))
        }
    }
}
