//! Error types for ingest-worker

use crate::task::{TaskId, TaskStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {task_id} is not owned by worker {worker_id}")]
    NotOwner { task_id: TaskId, worker_id: String },

    #[error("Task {task_id} exhausted its retries ({retry_count}/{max_retries})")]
    RetriesExhausted {
        task_id: TaskId,
        retry_count: u32,
        max_retries: u32,
    },

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Extraction failed ({method}): {message}")]
    Extraction { method: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("No handler registered for task type: {0}")]
    UnknownTaskType(String),

    #[error("Invalid task parameters: {0}")]
    InvalidParameters(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("File system error")]
    FsError(#[from] std::io::Error),

    #[error("OpenAI API error: {0}")]
    OpenAiError(#[from] async_openai::error::OpenAIError),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Task timeout")]
    TaskTimeout,
}

impl IngestError {
    /// Infrastructure failures that the polling loop retries under backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::Store(_) | IngestError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_transient() {
        assert!(IngestError::Store("connection reset".to_string()).is_transient());
        assert!(!IngestError::Handler("boom".to_string()).is_transient());
        assert!(!IngestError::Persistence("disk full".to_string()).is_transient());
    }

    #[test]
    fn test_transition_message() {
        let err = IngestError::InvalidTransition {
            task_id: TaskId::from("t1"),
            from: TaskStatus::Queued,
            to: TaskStatus::Completed,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition for task t1: queued -> completed"
        );
    }
}
