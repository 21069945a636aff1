//! Stalled-task reconciliation
//!
//! A worker cannot detect its own hang, so Running tasks whose `started_at`
//! is too old are returned to the queue by a separate sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::error::Result;
use crate::store::TaskStore;
use crate::task::TaskId;
use crate::worker::sleep_unless_stopped;

pub struct StallReaper {
    store: Arc<dyn TaskStore>,
    stalled_after: Duration,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl StallReaper {
    pub fn new(store: Arc<dyn TaskStore>, stalled_after: Duration, interval: Duration) -> Self {
        Self {
            store,
            stalled_after,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// One sweep; returns the requeued ids
    pub async fn sweep(&self) -> Result<Vec<TaskId>> {
        let requeued = self.store.requeue_stalled(self.stalled_after).await?;
        if !requeued.is_empty() {
            info!(
                count = requeued.len(),
                "Requeued tasks running longer than {:?}", self.stalled_after
            );
        }
        Ok(requeued)
    }

    /// Sweep every `interval` until shutdown
    pub async fn run(&self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.sweep().await {
                error!("Stall sweep failed: {}", e);
            }
            sleep_unless_stopped(&self.shutdown, self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;
    use crate::strategy::ClaimingStrategy;
    use crate::task::{NewTask, TaskStatus};

    #[tokio::test]
    async fn test_sweep_requeues_old_running_tasks() {
        let store = Arc::new(MemoryTaskStore::new());
        store.add_task(NewTask::new("video").id("v1")).await.unwrap();
        store
            .claim_task("dead-worker", &[], ClaimingStrategy::Fifo)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let reaper = StallReaper::new(store.clone(), Duration::from_millis(10), Duration::from_secs(1));
        let requeued = reaper.sweep().await.unwrap();
        assert_eq!(requeued, vec![TaskId::from("v1")]);

        let task = store.get_task(&TaskId::from("v1")).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryTaskStore::new());
        let reaper = Arc::new(StallReaper::new(
            store,
            Duration::from_secs(60),
            Duration::from_millis(10),
        ));
        let handle = reaper.shutdown_handle();

        let running = tokio::spawn({
            let reaper = Arc::clone(&reaper);
            async move { reaper.run().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.store(true, Ordering::Relaxed);

        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap();
    }
}
