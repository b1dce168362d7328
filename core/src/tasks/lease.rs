//! File-lease locking for the task store. A plain file-lock primitive with
//! staleness detection, rather than a database-backed lock table.
//!
//! One lease file per (entity kind, id) under a `.lock/` sibling directory,
//! created with `create_new` for atomicity and carrying `{pid, acquiredAt}`.

use crate::errors::{TaskStoreError, TaskStoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{instrument, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseFile {
    pid: u32,
    acquired_at: chrono::DateTime<chrono::Utc>,
}

/// A held lease; dropping it without calling `release` still leaves the
/// file in place; the next would-be holder reclaims it once it goes stale.
pub struct Lease {
    path: PathBuf,
}

pub struct LeaseManager {
    lock_dir: PathBuf,
    staleness: Duration,
}

impl LeaseManager {
    pub fn new(base_path: &Path, staleness: Duration) -> Self {
        Self { lock_dir: base_path.join(".lock"), staleness }
    }

    fn lease_path(&self, entity_id: &str) -> PathBuf {
        self.lock_dir.join(format!("{entity_id}.lock"))
    }

    /// Attempt to acquire the lease, retrying (with a stale-lock reclaim
    /// check each pass) until `timeout` elapses.
    #[instrument(skip(self))]
    pub async fn acquire(&self, entity_id: &str, timeout: Duration) -> TaskStoreResult<Lease> {
        tokio::fs::create_dir_all(&self.lock_dir).await?;
        let path = self.lease_path(entity_id);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.try_create(&path).await {
                Ok(()) => return Ok(Lease { path }),
                Err(_) => {
                    if self.reclaim_if_stale(&path).await {
                        continue;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(TaskStoreError::LockTimeout(entity_id.to_string(), timeout));
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    async fn try_create(&self, path: &Path) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new().create_new(true).write(true).open(path).await?;
        let lease = LeaseFile { pid: std::process::id(), acquired_at: chrono::Utc::now() };
        let bytes = serde_json::to_vec(&lease)?;
        file.write_all(&bytes).await?;
        Ok(())
    }

    /// Reclaim a lock file whose age exceeds the staleness threshold.
    /// Returns true if it reclaimed (removed) the stale lock.
    async fn reclaim_if_stale(&self, path: &Path) -> bool {
        let Ok(contents) = tokio::fs::read(path).await else { return false };
        let Ok(lease) = serde_json::from_slice::<LeaseFile>(&contents) else { return false };
        let age = chrono::Utc::now().signed_duration_since(lease.acquired_at);
        if age.num_milliseconds() as u64 > self.staleness.as_millis() as u64 {
            warn!(?path, pid = lease.pid, "reclaiming stale lease");
            tokio::fs::remove_file(path).await.is_ok()
        } else {
            false
        }
    }

    pub async fn release(&self, lease: Lease) -> TaskStoreResult<()> {
        match tokio::fs::remove_file(&lease.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Periodic hook: scan the lock directory and remove every stale lease,
    /// independent of any in-flight `acquire` call.
    pub async fn reclaim_stale_locks(&self) -> TaskStoreResult<usize> {
        let mut reclaimed = 0;
        let mut entries = match tokio::fs::read_dir(&self.lock_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if self.reclaim_if_stale(&entry.path()).await {
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_times_out_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LeaseManager::new(dir.path(), Duration::from_secs(30));
        let lease = manager.acquire("task-1", Duration::from_millis(100)).await.unwrap();
        let result = manager.acquire("task-1", Duration::from_millis(150)).await;
        assert!(matches!(result, Err(TaskStoreError::LockTimeout(_, _))));
        manager.release(lease).await.unwrap();
    }

    #[tokio::test]
    async fn stale_lease_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LeaseManager::new(dir.path(), Duration::from_millis(10));
        let lease = manager.acquire("task-1", Duration::from_millis(100)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        // staleness has passed; a fresh acquire should succeed by reclaiming.
        let second = manager.acquire("task-1", Duration::from_millis(500)).await;
        assert!(second.is_ok());
        // avoid double-remove races in the test itself
        std::mem::forget(lease);
    }
}
