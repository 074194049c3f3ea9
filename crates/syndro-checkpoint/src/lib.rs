//! Per-transfer JSON checkpoints on disk with advisory file locking and
//! staleness detection, enabling resume after a crashed or killed process.

mod error;
mod lock;

pub use error::CheckpointError;

use chrono::Utc;
use lock::LockGuard;
use std::path::{Path, PathBuf};
use syndro_types::model::Checkpoint;
use tracing::warn;

/// Checkpoints older than this without being refreshed are treated as
/// invalid and deleted on next encounter, the same as a corrupt file —
/// a transfer that never resumes within a day is assumed abandoned.
const STALE_AFTER: chrono::Duration = chrono::Duration::hours(24);

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn checkpoint_path(&self, transfer_id: &str) -> PathBuf {
        self.dir.join(format!("{transfer_id}.json"))
    }

    fn lock_path(&self, transfer_id: &str) -> PathBuf {
        self.dir.join(format!("{transfer_id}.lock"))
    }

    async fn lock(&self, transfer_id: &str) -> Result<LockGuard, CheckpointError> {
        Ok(LockGuard::acquire(self.lock_path(transfer_id)).await?)
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let _guard = self.lock(&checkpoint.transfer_id).await?;
        let raw = serde_json::to_string(checkpoint)?;
        tokio::fs::write(self.checkpoint_path(&checkpoint.transfer_id), raw).await?;
        Ok(())
    }

    /// Loads the checkpoint for `transfer_id`, if one exists and is valid.
    /// A corrupt or stale checkpoint is deleted and treated as absent.
    pub async fn load(&self, transfer_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let _guard = self.lock(transfer_id).await?;
        let path = self.checkpoint_path(transfer_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match validate(&raw) {
            Some(checkpoint) => Ok(Some(checkpoint)),
            None => {
                warn!("discarding invalid checkpoint {transfer_id}");
                let _ = tokio::fs::remove_file(&path).await;
                Ok(None)
            }
        }
    }

    pub async fn clear(&self, transfer_id: &str) -> Result<(), CheckpointError> {
        let _guard = self.lock(transfer_id).await?;
        match tokio::fs::remove_file(self.checkpoint_path(transfer_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists valid checkpoints across all transfers, `offset`/`limit`
    /// applied after filtering out invalid entries (which are deleted as
    /// encountered, same as [`CheckpointStore::load`]).
    pub async fn list_paginated(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Checkpoint>, CheckpointError> {
        let all = self.load_all_valid().await?;
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    pub async fn count(&self) -> Result<usize, CheckpointError> {
        Ok(self.load_all_valid().await?.len())
    }

    pub async fn clear_all(&self) -> Result<(), CheckpointError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        Ok(())
    }

    async fn load_all_valid(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(transfer_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(checkpoint) = self.load(transfer_id).await? {
                out.push(checkpoint);
            }
        }
        Ok(out)
    }
}

/// A checkpoint is invalid if it fails to parse, is explicitly marked
/// `is_valid: false`, or has not been refreshed within [`STALE_AFTER`].
fn validate(raw: &str) -> Option<Checkpoint> {
    let checkpoint: Checkpoint = serde_json::from_str(raw).ok()?;
    if !checkpoint.is_valid {
        return None;
    }
    if Utc::now() - checkpoint.timestamp > STALE_AFTER {
        return None;
    }
    Some(checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(transfer_id: &str) -> Checkpoint {
        Checkpoint {
            transfer_id: transfer_id.to_string(),
            file_id: "a.txt".into(),
            bytes_transferred: 10,
            timestamp: Utc::now(),
            current_file_index: 1,
            total_files: 3,
            is_valid: true,
        }
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).await.unwrap();
        store.save(&checkpoint("t1")).await.unwrap();
        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.current_file_index, 1);
        assert_eq!(loaded.bytes_transferred, 10);
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).await.unwrap();
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_checkpoint_is_deleted_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).await.unwrap();
        tokio::fs::write(store.checkpoint_path("bad"), b"not json").await.unwrap();
        assert!(store.load("bad").await.unwrap().is_none());
        assert!(tokio::fs::metadata(store.checkpoint_path("bad")).await.is_err());
    }

    #[tokio::test]
    async fn clear_removes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).await.unwrap();
        store.save(&checkpoint("t1")).await.unwrap();
        store.clear("t1").await.unwrap();
        assert!(store.load("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_paginated_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).await.unwrap();
        for i in 0..5 {
            store.save(&checkpoint(&format!("t{i}"))).await.unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 5);
        let page = store.list_paginated(2, 2).await.unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn clear_all_removes_every_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).await.unwrap();
        store.save(&checkpoint("t1")).await.unwrap();
        store.save(&checkpoint("t2")).await.unwrap();
        store.clear_all().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("t1.lock");
        tokio::fs::write(&lock_path, b"").await.unwrap();
        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(31);
        let old = filetime::FileTime::from_system_time(old);
        filetime::set_file_mtime(&lock_path, old).unwrap();

        let store = CheckpointStore::new(dir.path()).await.unwrap();
        // Should reclaim the stale lock rather than hang.
        store.save(&checkpoint("t1")).await.unwrap();
    }
}
