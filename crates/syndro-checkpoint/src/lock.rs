use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tracing::debug;

/// A lock file is reclaimed if it is older than this, protecting against a
/// crashed holder leaving the lock behind forever.
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Advisory mutual exclusion for one checkpoint, backed by a sibling
/// `.lock` file. Exclusive within one process via the retry loop below, and
/// best-effort across processes via `create_new`.
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    pub async fn acquire(path: PathBuf) -> std::io::Result<Self> {
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path).await {
                        debug!("reclaiming stale checkpoint lock {}", path.display());
                        let _ = tokio::fs::remove_file(&path).await;
                        continue;
                    }
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn is_stale(path: &PathBuf) -> bool {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified.elapsed().map(|age| age > STALE_LOCK_AGE).unwrap_or(false),
        Err(_) => true,
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
