//! Task store contract and the in-process backend
//!
//! [`TaskStore`] is the only component that mutates task state. The claim
//! is the one operation that must be atomic: selecting the best eligible
//! Queued task and flipping it to Running happen in a single step, so two
//! workers can never own the same task. The Postgres backend lives in
//! [`crate::db::PgTaskStore`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::strategy::{ClaimingStrategy, WeightedSampler};
use crate::task::{NewTask, Task, TaskId, TaskStats, TaskStatus};

/// Durable task queue
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Enqueue a task. An existing id yields [`IngestError::DuplicateTask`]
    /// and leaves the stored row untouched.
    async fn add_task(&self, task: NewTask) -> Result<TaskId>;

    /// Atomically claim the best Queued task whose type is in
    /// `allowed_types` (empty = any type). `Ok(None)` when nothing is
    /// eligible, including when a competing worker won the race.
    async fn claim_task(
        &self,
        worker_id: &str,
        allowed_types: &[String],
        strategy: ClaimingStrategy,
    ) -> Result<Option<Task>>;

    /// Finish a Running task owned by `worker_id`. Completed stamps
    /// `completed_at`; Failed stores the error and bumps `retry_count`.
    async fn update_status(
        &self,
        task_id: &TaskId,
        worker_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<()>;

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>>;

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    async fn get_stats(&self) -> Result<TaskStats>;

    /// Reconciliation: move Running tasks started more than `older_than`
    /// ago back to Queued.
    async fn requeue_stalled(&self, older_than: std::time::Duration) -> Result<Vec<TaskId>>;

    /// Explicit requeue of a Failed task, refused once `retry_count`
    /// reached `max_retries`.
    async fn requeue_failed(&self, task_id: &TaskId, max_retries: u32) -> Result<()>;
}

/// Reject a finishing report that does not come from the owning worker.
pub(crate) fn check_report(
    task: &Task,
    worker_id: &str,
    status: TaskStatus,
) -> Result<()> {
    if !task.status.can_report(status) {
        return Err(IngestError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to: status,
        });
    }
    if task.worker_id.as_deref() != Some(worker_id) {
        return Err(IngestError::NotOwner {
            task_id: task.id.clone(),
            worker_id: worker_id.to_string(),
        });
    }
    Ok(())
}

/// Diagnose why a Failed task could not be requeued.
pub(crate) fn check_requeue(task: &Task, max_retries: u32) -> Result<()> {
    if task.status != TaskStatus::Failed {
        return Err(IngestError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to: TaskStatus::Queued,
        });
    }
    if task.retry_count >= max_retries {
        return Err(IngestError::RetriesExhausted {
            task_id: task.id.clone(),
            retry_count: task.retry_count,
            max_retries,
        });
    }
    Ok(())
}

struct Inner {
    tasks: HashMap<TaskId, Task>,
    last_created: Option<DateTime<Utc>>,
    sampler: WeightedSampler,
}

impl Inner {
    /// Microsecond timestamps (Postgres precision), strictly increasing so
    /// insertion order is preserved for FIFO/LIFO.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = truncate_micros(Utc::now());
        let created = match self.last_created {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created = Some(created);
        created
    }
}

fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

/// In-process task store. A single mutex guards the whole table, which
/// makes every claim atomic with respect to concurrent workers sharing the
/// same instance (e.g. through an `Arc`).
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::with_sampler(WeightedSampler::default())
    }

    /// Store whose weighted claims replay the same picks for the same seed
    pub fn with_seed(seed: u64) -> Self {
        Self::with_sampler(WeightedSampler::new(Some(seed)))
    }

    fn with_sampler(sampler: WeightedSampler) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                last_created: None,
                sampler,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| IngestError::Store("task table lock poisoned".to_string()))
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn add_task(&self, new: NewTask) -> Result<TaskId> {
        let mut inner = self.lock()?;
        let id = new.id.unwrap_or_else(TaskId::generate);
        if inner.tasks.contains_key(&id) {
            return Err(IngestError::DuplicateTask(id));
        }

        let created_at = inner.next_created_at();
        inner.tasks.insert(
            id.clone(),
            Task {
                id: id.clone(),
                task_type: new.task_type,
                parameters: new.parameters,
                priority: new.priority,
                status: TaskStatus::Queued,
                created_at,
                started_at: None,
                completed_at: None,
                worker_id: None,
                error_message: None,
                retry_count: 0,
            },
        );
        Ok(id)
    }

    async fn claim_task(
        &self,
        worker_id: &str,
        allowed_types: &[String],
        strategy: ClaimingStrategy,
    ) -> Result<Option<Task>> {
        let mut inner = self.lock()?;

        let mut candidates: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .filter(|t| allowed_types.is_empty() || allowed_types.contains(&t.task_type))
            .cloned()
            .collect();
        strategy.rank(&mut candidates);
        candidates.truncate(strategy.candidate_limit());

        inner.sampler.align(strategy.seed());
        let Some(idx) = strategy.pick(&candidates, &mut inner.sampler) else {
            return Ok(None);
        };
        let id = candidates.swap_remove(idx).id;

        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| IngestError::TaskNotFound(id.clone()))?;
        task.status = TaskStatus::Running;
        task.worker_id = Some(worker_id.to_string());
        task.started_at = Some(truncate_micros(Utc::now()));

        debug!(task_id = %task.id, worker_id, "claimed task");
        Ok(Some(task.clone()))
    }

    async fn update_status(
        &self,
        task_id: &TaskId,
        worker_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| IngestError::TaskNotFound(task_id.clone()))?;
        check_report(task, worker_id, status)?;

        task.status = status;
        match status {
            TaskStatus::Completed => {
                task.completed_at = Some(truncate_micros(Utc::now()));
            }
            TaskStatus::Failed => {
                task.error_message = Some(error.unwrap_or("unknown error").to_string());
                task.retry_count += 1;
            }
            TaskStatus::Queued | TaskStatus::Running => {}
        }
        Ok(())
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        Ok(self.lock()?.tasks.get(task_id).cloned())
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let inner = self.lock()?;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn get_stats(&self) -> Result<TaskStats> {
        let inner = self.lock()?;
        let mut stats = TaskStats::default();
        for task in inner.tasks.values() {
            stats.add(task.status, 1);
        }
        Ok(stats)
    }

    async fn requeue_stalled(&self, older_than: std::time::Duration) -> Result<Vec<TaskId>> {
        let older_than = Duration::from_std(older_than)
            .map_err(|e| IngestError::ConfigError(format!("stall threshold out of range: {e}")))?;
        let cutoff = Utc::now() - older_than;

        let mut inner = self.lock()?;
        let mut requeued = Vec::new();
        for task in inner.tasks.values_mut() {
            let stalled = task.status == TaskStatus::Running
                && task.started_at.is_some_and(|started| started < cutoff);
            if stalled {
                task.status = TaskStatus::Queued;
                task.worker_id = None;
                task.started_at = None;
                requeued.push(task.id.clone());
            }
        }
        requeued.sort();
        Ok(requeued)
    }

    async fn requeue_failed(&self, task_id: &TaskId, max_retries: u32) -> Result<()> {
        let mut inner = self.lock()?;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| IngestError::TaskNotFound(task_id.clone()))?;
        check_requeue(task, max_retries)?;

        task.status = TaskStatus::Queued;
        task.worker_id = None;
        task.started_at = None;
        task.completed_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn types(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let store = MemoryTaskStore::new();
        let id = store
            .add_task(NewTask::new("text").priority(3).parameters(json!({"source": "hi"})))
            .await
            .unwrap();

        let task = store.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.priority, 3);
        assert_eq!(task.param_str("source"), Some("hi"));
        assert_eq!(task.retry_count, 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = MemoryTaskStore::new();
        store.add_task(NewTask::new("text").id("dup")).await.unwrap();
        let err = store
            .add_task(NewTask::new("video").id("dup").priority(9))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DuplicateTask(ref id) if id.as_str() == "dup"));

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total(), 1);
        let task = store.get_task(&TaskId::from("dup")).await.unwrap().unwrap();
        assert_eq!(task.task_type, "text");
    }

    #[tokio::test]
    async fn test_claim_respects_allowed_types() {
        let store = MemoryTaskStore::new();
        store.add_task(NewTask::new("video").id("v")).await.unwrap();
        store.add_task(NewTask::new("text").id("t")).await.unwrap();

        let claimed = store
            .claim_task("w1", &types(&["text"]), ClaimingStrategy::Fifo)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id.as_str(), "t");
        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(claimed.worker_id.as_deref(), Some("w1"));
        assert!(claimed.started_at.is_some());

        let none = store
            .claim_task("w1", &types(&["text"]), ClaimingStrategy::Fifo)
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_empty_type_filter_claims_anything() {
        let store = MemoryTaskStore::new();
        store.add_task(NewTask::new("audio")).await.unwrap();
        let claimed = store
            .claim_task("w1", &[], ClaimingStrategy::Priority)
            .await
            .unwrap();
        assert!(claimed.is_some());
    }

    #[tokio::test]
    async fn test_update_status_requires_running_and_owner() {
        let store = MemoryTaskStore::new();
        let id = store.add_task(NewTask::new("text")).await.unwrap();

        let err = store
            .update_status(&id, "w1", TaskStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidTransition { .. }));

        store
            .claim_task("w1", &[], ClaimingStrategy::Fifo)
            .await
            .unwrap();
        let err = store
            .update_status(&id, "w2", TaskStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NotOwner { .. }));

        store
            .update_status(&id, "w1", TaskStatus::Completed, None)
            .await
            .unwrap();
        let task = store.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());

        let err = store
            .update_status(&id, "w1", TaskStatus::Failed, Some("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_fail_records_error_and_retry() {
        let store = MemoryTaskStore::new();
        let id = store.add_task(NewTask::new("text")).await.unwrap();
        store
            .claim_task("w1", &[], ClaimingStrategy::Fifo)
            .await
            .unwrap();
        store
            .update_status(&id, "w1", TaskStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let task = store.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("boom"));
        assert_eq!(task.retry_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_task_update() {
        let store = MemoryTaskStore::new();
        let err = store
            .update_status(&TaskId::from("nope"), "w1", TaskStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_requeue_stalled_only_touches_old_running() {
        let store = MemoryTaskStore::new();
        let stalled = store.add_task(NewTask::new("text").id("a")).await.unwrap();
        let queued = store.add_task(NewTask::new("text").id("b")).await.unwrap();
        store
            .claim_task("w1", &[], ClaimingStrategy::Fifo)
            .await
            .unwrap();

        assert!(store
            .requeue_stalled(std::time::Duration::from_secs(3600))
            .await
            .unwrap()
            .is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let requeued = store
            .requeue_stalled(std::time::Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(requeued, vec![stalled.clone()]);

        let task = store.get_task(&stalled).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.worker_id.is_none());
        assert!(task.started_at.is_none());
        let other = store.get_task(&queued).await.unwrap().unwrap();
        assert_eq!(other.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_requeue_failed_honours_max_retries() {
        let store = MemoryTaskStore::new();
        let id = store.add_task(NewTask::new("text")).await.unwrap();

        let err = store.requeue_failed(&id, 3).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidTransition { .. }));

        for attempt in 1..=2u32 {
            store
                .claim_task("w1", &[], ClaimingStrategy::Fifo)
                .await
                .unwrap()
                .unwrap();
            store
                .update_status(&id, "w1", TaskStatus::Failed, Some("boom"))
                .await
                .unwrap();
            let task = store.get_task(&id).await.unwrap().unwrap();
            assert_eq!(task.retry_count, attempt);
            if attempt < 2 {
                store.requeue_failed(&id, 2).await.unwrap();
            }
        }

        let err = store.requeue_failed(&id, 2).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::RetriesExhausted {
                retry_count: 2,
                max_retries: 2,
                ..
            }
        ));
        let task = store.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_created_at_strictly_increases() {
        let store = MemoryTaskStore::new();
        for i in 0..50 {
            store
                .add_task(NewTask::new("text").id(format!("t{i:02}")))
                .await
                .unwrap();
        }
        let tasks = store.list_by_status(TaskStatus::Queued).await.unwrap();
        for pair in tasks.windows(2) {
            assert!(pair[0].created_at < pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn test_seeded_weighted_claims_replay() {
        async fn claim_order(seed: u64) -> Vec<String> {
            let store = MemoryTaskStore::new();
            for (id, priority) in [("a", 1), ("b", 5), ("c", 10), ("d", 3)] {
                store
                    .add_task(NewTask::new("text").id(id).priority(priority))
                    .await
                    .unwrap();
            }
            let strategy = ClaimingStrategy::WeightedRandom {
                top_n: 4,
                seed: Some(seed),
            };
            let mut order = Vec::new();
            while let Some(task) = store.claim_task("w", &[], strategy).await.unwrap() {
                order.push(task.id.0);
            }
            order
        }

        let first = claim_order(99).await;
        assert_eq!(first.len(), 4);
        assert_eq!(first, claim_order(99).await);
    }
}
