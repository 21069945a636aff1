//! Row types for the ingest_tasks and ingest_artifacts tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{IngestError, Result};
use crate::task::{Task, TaskId};

// ============================================================================
// Tasks
// ============================================================================

/// TaskRow - Matches ingest_tasks table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: String,
    pub task_type: String,
    pub parameters: serde_json::Value,
    pub priority: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
}

impl TryFrom<TaskRow> for Task {
    type Error = IngestError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let retry_count = u32::try_from(row.retry_count).map_err(|_| {
            IngestError::Store(format!(
                "task {} has negative retry_count {}",
                row.id, row.retry_count
            ))
        })?;
        Ok(Task {
            id: TaskId(row.id),
            task_type: row.task_type,
            parameters: row.parameters,
            priority: row.priority,
            status: row.status.parse()?,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            worker_id: row.worker_id,
            error_message: row.error_message,
            retry_count,
        })
    }
}

// ============================================================================
// Artifacts
// ============================================================================

/// ArtifactRow - Matches ingest_artifacts table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ArtifactRow {
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub source: String,
    pub source_type: String,
    pub content: String,
    pub content_hash: String,
    pub metadata: serde_json::Value,
    pub history: serde_json::Value,
    pub stored_at: DateTime<Utc>,
}
