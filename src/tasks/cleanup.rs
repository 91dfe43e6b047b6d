//! Temp File Sweep Task
//!
//! Background task that removes temp files abandoned by interrupted disk
//! store writes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::DiskStore;

/// Temp files older than this are considered abandoned.
pub const ABANDONED_AFTER: Duration = Duration::from_secs(10 * 60);

/// Spawns a background task that periodically sweeps abandoned temp files.
///
/// Published entries are never touched; a write still in progress is far
/// younger than `max_age` and is left alone.
///
/// # Arguments
/// * `store` - Disk store whose root is swept
/// * `sweep_interval_secs` - Interval in seconds between sweeps
/// * `max_age` - Minimum age of a temp file before it is removed
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_cleanup_task(
    store: Arc<DiskStore>,
    sweep_interval_secs: u64,
    max_age: Duration,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(sweep_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting temp file sweep in {} every {} seconds",
            store.root().display(),
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            match store.sweep_temp_files(max_age).await {
                Ok(0) => debug!("Temp sweep: nothing to remove"),
                Ok(removed) => info!("Temp sweep: removed {} abandoned files", removed),
                Err(e) => warn!(error = %e, "Temp sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweep_task_removes_abandoned_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("ab");
        std::fs::create_dir(&shard).unwrap();
        let temp = shard.join("deadbeef.1-0.tmp");
        std::fs::write(&temp, b"partial").unwrap();

        let store = Arc::new(DiskStore::new(dir.path()));
        let handle = spawn_cleanup_task(store, 1, Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!temp.exists(), "Abandoned temp file should have been swept");

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_task_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("ab");
        std::fs::create_dir(&shard).unwrap();
        let entry = shard.join("deadbeef.entry");
        std::fs::write(&entry, b"published").unwrap();

        let store = Arc::new(DiskStore::new(dir.path()));
        let handle = spawn_cleanup_task(store, 1, Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(entry.exists(), "Published entries must not be swept");

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_task_can_be_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DiskStore::new(dir.path()));

        let handle = spawn_cleanup_task(store, 1, ABANDONED_AFTER);
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
