//! Ingest tasks database operations

use crate::db::models::TaskRow;
use crate::db::DbPool;
use crate::error::{IngestError, Result};
use crate::strategy::{ClaimingStrategy, WeightedSampler};
use crate::task::{NewTask, Task, TaskId, TaskStats, TaskStatus};
use sqlx::Row;
use std::sync::Mutex;

/// Insert a task, returning `None` when the id already exists
pub async fn insert_task(pool: &DbPool, id: &TaskId, task: &NewTask) -> Result<Option<TaskId>> {
    let inserted = sqlx::query_scalar::<_, String>(
        r#"
        INSERT INTO ingest_tasks (id, task_type, parameters, priority, status)
        VALUES ($1, $2, $3, $4, 'queued')
        ON CONFLICT (id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(id.as_str())
    .bind(&task.task_type)
    .bind(&task.parameters)
    .bind(task.priority)
    .fetch_optional(pool)
    .await?;

    Ok(inserted.map(TaskId))
}

/// Atomically claim the next Queued task under a deterministic strategy.
///
/// Selection and the Running transition happen in one statement; rows
/// locked by a concurrent claim are skipped, never double-claimed.
pub async fn claim_next_task(
    pool: &DbPool,
    worker_id: &str,
    allowed_types: &[String],
    strategy: ClaimingStrategy,
) -> Result<Option<Task>> {
    let sql = format!(
        r#"
        WITH next_task AS (
            SELECT id FROM ingest_tasks
            WHERE status = 'queued'
              AND (cardinality($2::text[]) = 0 OR task_type = ANY($2::text[]))
            ORDER BY {}
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE ingest_tasks
        SET status = 'running',
            worker_id = $1,
            started_at = NOW()
        WHERE id = (SELECT id FROM next_task)
        RETURNING *
        "#,
        strategy.order_by_sql()
    );

    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(worker_id)
        .bind(allowed_types)
        .fetch_optional(pool)
        .await?;

    row.map(Task::try_from).transpose()
}

/// `LIMIT` value for the candidate window, saturating at `i64::MAX`
fn candidate_limit_sql(strategy: ClaimingStrategy) -> i64 {
    i64::try_from(strategy.candidate_limit()).unwrap_or(i64::MAX)
}

/// Atomically claim one of the top-N Queued tasks, sampled by priority.
///
/// The candidate window is locked inside a transaction, so the sampled
/// row cannot be taken by anyone else before the update commits.
pub async fn claim_sampled_task(
    pool: &DbPool,
    worker_id: &str,
    allowed_types: &[String],
    strategy: ClaimingStrategy,
    sampler: &Mutex<WeightedSampler>,
) -> Result<Option<Task>> {
    let mut tx = pool.begin().await?;

    let sql = format!(
        r#"
        SELECT * FROM ingest_tasks
        WHERE status = 'queued'
          AND (cardinality($1::text[]) = 0 OR task_type = ANY($1::text[]))
        ORDER BY {}
        LIMIT $2
        FOR UPDATE SKIP LOCKED
        "#,
        strategy.order_by_sql()
    );
    let rows = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(allowed_types)
        .bind(candidate_limit_sql(strategy))
        .fetch_all(&mut *tx)
        .await?;
    let candidates = rows
        .into_iter()
        .map(Task::try_from)
        .collect::<Result<Vec<_>>>()?;

    let picked = {
        let mut sampler = sampler
            .lock()
            .map_err(|_| IngestError::Store("sampler lock poisoned".to_string()))?;
        sampler.align(strategy.seed());
        strategy.pick(&candidates, &mut sampler)
    };
    let Some(idx) = picked else {
        tx.rollback().await?;
        return Ok(None);
    };

    let row = sqlx::query_as::<_, TaskRow>(
        r#"
        UPDATE ingest_tasks
        SET status = 'running',
            worker_id = $2,
            started_at = NOW()
        WHERE id = $1
          AND status = 'queued'
        RETURNING *
        "#,
    )
    .bind(candidates[idx].id.as_str())
    .bind(worker_id)
    .fetch_optional(&mut *tx)
    .await?;

    tx.commit().await?;
    row.map(Task::try_from).transpose()
}

/// Complete a Running task owned by `worker_id`.
///
/// Returns false when no row matched (wrong status or owner).
pub async fn complete_task(pool: &DbPool, task_id: &TaskId, worker_id: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ingest_tasks
        SET status = 'completed',
            completed_at = NOW()
        WHERE id = $1
          AND status = 'running'
          AND worker_id = $2
        "#,
    )
    .bind(task_id.as_str())
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark a Running task owned by `worker_id` as failed
pub async fn fail_task(
    pool: &DbPool,
    task_id: &TaskId,
    worker_id: &str,
    error_msg: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ingest_tasks
        SET status = 'failed',
            error_message = $3,
            retry_count = retry_count + 1
        WHERE id = $1
          AND status = 'running'
          AND worker_id = $2
        "#,
    )
    .bind(task_id.as_str())
    .bind(worker_id)
    .bind(error_msg)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Get a task by ID
pub async fn get_task_by_id(pool: &DbPool, task_id: &TaskId) -> Result<Option<Task>> {
    let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM ingest_tasks WHERE id = $1")
        .bind(task_id.as_str())
        .fetch_optional(pool)
        .await?;

    row.map(Task::try_from).transpose()
}

/// List tasks in a status, oldest first
pub async fn list_tasks_by_status(pool: &DbPool, status: TaskStatus) -> Result<Vec<Task>> {
    let rows = sqlx::query_as::<_, TaskRow>(
        r#"SELECT * FROM ingest_tasks WHERE status = $1 ORDER BY created_at ASC, id COLLATE "C" ASC"#,
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Task::try_from).collect()
}

/// Count tasks per status for monitoring
pub async fn count_by_status(pool: &DbPool) -> Result<TaskStats> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM ingest_tasks GROUP BY status")
        .fetch_all(pool)
        .await?;

    let mut stats = TaskStats::default();
    for row in rows {
        let status: String = row.get("status");
        let count: i64 = row.get("count");
        stats.add(status.parse()?, count.max(0) as u64);
    }
    Ok(stats)
}

/// Return Running tasks started more than `older_than_secs` ago to the queue
pub async fn requeue_stalled_tasks(pool: &DbPool, older_than_secs: f64) -> Result<Vec<TaskId>> {
    let ids = sqlx::query_scalar::<_, String>(
        r#"
        UPDATE ingest_tasks
        SET status = 'queued',
            worker_id = NULL,
            started_at = NULL
        WHERE status = 'running'
          AND started_at < NOW() - make_interval(secs => $1)
        RETURNING id
        "#,
    )
    .bind(older_than_secs)
    .fetch_all(pool)
    .await?;

    let mut ids: Vec<TaskId> = ids.into_iter().map(TaskId).collect();
    ids.sort();
    Ok(ids)
}

/// Requeue a Failed task that still has retries left
pub async fn requeue_failed_task(pool: &DbPool, task_id: &TaskId, max_retries: u32) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ingest_tasks
        SET status = 'queued',
            worker_id = NULL,
            started_at = NULL,
            completed_at = NULL
        WHERE id = $1
          AND status = 'failed'
          AND retry_count < $2
        "#,
    )
    .bind(task_id.as_str())
    .bind(i64::from(max_retries))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
