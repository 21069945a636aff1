//! Result reporting
//!
//! A task only reaches Completed after its artifact has been stored. When
//! storage fails the attempt is reported Failed with the persistence error,
//! even though the handler itself succeeded.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::db::artifacts::generate_content_hash;
use crate::error::{IngestError, Result};
use crate::funnel::ContentArtifact;
use crate::store::TaskStore;
use crate::task::{Task, TaskId, TaskStatus};

/// Durable storage for produced artifacts
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn persist(&self, task: &Task, artifact: &ContentArtifact) -> Result<()>;
}

/// Final status written for a task attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Completed,
    Failed(String),
}

/// Persists artifacts and finalizes task status
#[derive(Clone)]
pub struct ResultReporter {
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn ArtifactSink>,
}

impl ResultReporter {
    pub fn new(store: Arc<dyn TaskStore>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self { store, sink }
    }

    /// Store the artifact, then mark the task Completed. A storage failure
    /// marks the task Failed instead.
    pub async fn report_success(&self, task: &Task, artifact: &ContentArtifact) -> Result<ReportOutcome> {
        let worker_id = owner(task)?;

        if let Err(e) = self.sink.persist(task, artifact).await {
            let reason = if matches!(e, IngestError::Persistence(_)) {
                e.to_string()
            } else {
                IngestError::Persistence(e.to_string()).to_string()
            };
            error!(task_id = %task.id, "{}", reason);
            self.store
                .update_status(&task.id, worker_id, TaskStatus::Failed, Some(&reason))
                .await?;
            return Ok(ReportOutcome::Failed(reason));
        }

        self.store
            .update_status(&task.id, worker_id, TaskStatus::Completed, None)
            .await?;
        info!(
            task_id = %task.id,
            artifact_id = %artifact.id,
            chars = artifact.content.chars().count(),
            "task completed"
        );
        Ok(ReportOutcome::Completed)
    }

    /// Mark the task Failed with `error`
    pub async fn report_failure(&self, task: &Task, error: &str) -> Result<ReportOutcome> {
        let worker_id = owner(task)?;
        self.store
            .update_status(&task.id, worker_id, TaskStatus::Failed, Some(error))
            .await?;
        warn!(task_id = %task.id, error, "task failed");
        Ok(ReportOutcome::Failed(error.to_string()))
    }
}

fn owner(task: &Task) -> Result<&str> {
    task.worker_id
        .as_deref()
        .ok_or_else(|| IngestError::NotOwner {
            task_id: task.id.clone(),
            worker_id: "<unclaimed>".to_string(),
        })
}

/// Make an id safe to use as a file name
pub fn sanitize_file_name(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let sanitized = sanitized.trim_matches('-').to_string();
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

#[derive(Serialize)]
struct StoredArtifact<'a> {
    task_id: &'a TaskId,
    task_type: &'a str,
    #[serde(flatten)]
    artifact: &'a ContentArtifact,
}

/// Writes each artifact to `<dir>/<sanitized-id>-<id-hash>.json`. The hash
/// suffix keeps ids that sanitize alike in separate files.
pub struct FsArtifactSink {
    dir: PathBuf,
}

impl FsArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, artifact: &ContentArtifact) -> PathBuf {
        self.dir.join(format!(
            "{}-{}.json",
            sanitize_file_name(&artifact.id),
            generate_content_hash(&artifact.id)
        ))
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn persist(&self, task: &Task, artifact: &ContentArtifact) -> Result<()> {
        let body = serde_json::to_vec_pretty(&StoredArtifact {
            task_id: &task.id,
            task_type: &task.task_type,
            artifact,
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| IngestError::Persistence(format!("{}: {e}", self.dir.display())))?;

        // Write then rename so a crash never leaves a half-written artifact
        let path = self.path_for(artifact);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| IngestError::Persistence(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| IngestError::Persistence(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}

/// Keeps artifacts in memory, for tests and dry runs
#[derive(Default)]
pub struct MemoryArtifactSink {
    stored: Mutex<Vec<(TaskId, ContentArtifact)>>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<(TaskId, ContentArtifact)> {
        self.stored
            .lock()
            .map(|stored| stored.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactSink {
    async fn persist(&self, task: &Task, artifact: &ContentArtifact) -> Result<()> {
        self.stored
            .lock()
            .map_err(|_| IngestError::Persistence("artifact buffer lock poisoned".to_string()))?
            .push((task.id.clone(), artifact.clone()));
        Ok(())
    }
}
