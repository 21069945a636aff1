//! Postgres-backed [`TaskStore`]

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::debug;

use crate::db::tasks;
use crate::db::DbPool;
use crate::error::{IngestError, Result};
use crate::store::{check_report, check_requeue, TaskStore};
use crate::strategy::{ClaimingStrategy, WeightedSampler};
use crate::task::{NewTask, Task, TaskId, TaskStats, TaskStatus};

/// Task store over the `ingest_tasks` table.
///
/// Deterministic strategies claim with a single `FOR UPDATE SKIP LOCKED`
/// statement; the weighted strategy locks its candidate window in a
/// transaction and samples inside it.
pub struct PgTaskStore {
    pool: DbPool,
    sampler: Mutex<WeightedSampler>,
}

impl PgTaskStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            sampler: Mutex::new(WeightedSampler::default()),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Turn a zero-row update into the precise error
    async fn diagnose(&self, task_id: &TaskId, check: impl FnOnce(&Task) -> Result<()>) -> Result<()> {
        let task = tasks::get_task_by_id(&self.pool, task_id)
            .await?
            .ok_or_else(|| IngestError::TaskNotFound(task_id.clone()))?;
        check(&task)?;
        // The row changed between the update and the lookup
        Err(IngestError::Store(format!(
            "task {task_id} changed concurrently, update not applied"
        )))
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn add_task(&self, task: NewTask) -> Result<TaskId> {
        let id = task.id.clone().unwrap_or_else(TaskId::generate);
        match tasks::insert_task(&self.pool, &id, &task).await? {
            Some(id) => Ok(id),
            None => Err(IngestError::DuplicateTask(id)),
        }
    }

    async fn claim_task(
        &self,
        worker_id: &str,
        allowed_types: &[String],
        strategy: ClaimingStrategy,
    ) -> Result<Option<Task>> {
        let task = match strategy {
            ClaimingStrategy::WeightedRandom { .. } => {
                tasks::claim_sampled_task(&self.pool, worker_id, allowed_types, strategy, &self.sampler)
                    .await?
            }
            _ => tasks::claim_next_task(&self.pool, worker_id, allowed_types, strategy).await?,
        };

        if let Some(task) = &task {
            debug!(task_id = %task.id, worker_id, %strategy, "claimed task");
        }
        Ok(task)
    }

    async fn update_status(
        &self,
        task_id: &TaskId,
        worker_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let applied = match status {
            TaskStatus::Completed => tasks::complete_task(&self.pool, task_id, worker_id).await?,
            TaskStatus::Failed => {
                let message = error.unwrap_or("unknown error");
                tasks::fail_task(&self.pool, task_id, worker_id, message).await?
            }
            TaskStatus::Queued | TaskStatus::Running => false,
        };

        if applied {
            return Ok(());
        }
        self.diagnose(task_id, |task| check_report(task, worker_id, status))
            .await
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        tasks::get_task_by_id(&self.pool, task_id).await
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        tasks::list_tasks_by_status(&self.pool, status).await
    }

    async fn get_stats(&self) -> Result<TaskStats> {
        tasks::count_by_status(&self.pool).await
    }

    async fn requeue_stalled(&self, older_than: std::time::Duration) -> Result<Vec<TaskId>> {
        tasks::requeue_stalled_tasks(&self.pool, older_than.as_secs_f64()).await
    }

    async fn requeue_failed(&self, task_id: &TaskId, max_retries: u32) -> Result<()> {
        if tasks::requeue_failed_task(&self.pool, task_id, max_retries).await? {
            return Ok(());
        }
        self.diagnose(task_id, |task| check_requeue(task, max_retries))
            .await
    }
}
