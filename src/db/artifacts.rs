//! Ingest artifacts database operations

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::db::models::ArtifactRow;
use crate::db::DbPool;
use crate::error::{IngestError, Result};
use crate::funnel::ContentArtifact;
use crate::reporter::ArtifactSink;
use crate::task::{Task, TaskId};

/// Insert or replace the artifact produced by a task
pub async fn upsert_artifact(pool: &DbPool, task_id: &TaskId, artifact: &ContentArtifact) -> Result<()> {
    let metadata = serde_json::to_value(&artifact.metadata)?;
    let history = serde_json::to_value(&artifact.transformation_history)?;

    sqlx::query(
        r#"
        INSERT INTO ingest_artifacts (
            id, task_id, title, source, source_type, content, content_hash, metadata, history
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE
        SET task_id = EXCLUDED.task_id,
            title = EXCLUDED.title,
            source = EXCLUDED.source,
            source_type = EXCLUDED.source_type,
            content = EXCLUDED.content,
            content_hash = EXCLUDED.content_hash,
            metadata = EXCLUDED.metadata,
            history = EXCLUDED.history,
            stored_at = NOW()
        "#,
    )
    .bind(&artifact.id)
    .bind(task_id.as_str())
    .bind(&artifact.title)
    .bind(&artifact.source)
    .bind(artifact.source_type.as_str())
    .bind(&artifact.content)
    .bind(generate_content_hash(&artifact.content))
    .bind(metadata)
    .bind(history)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get an artifact by ID
pub async fn get_artifact_by_id(pool: &DbPool, artifact_id: &str) -> Result<Option<ArtifactRow>> {
    let row = sqlx::query_as::<_, ArtifactRow>("SELECT * FROM ingest_artifacts WHERE id = $1")
        .bind(artifact_id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// Generate content hash (SHA256, first 16 chars for brevity)
pub fn generate_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Artifact sink backed by the `ingest_artifacts` table
#[derive(Clone)]
pub struct PgArtifactSink {
    pool: DbPool,
}

impl PgArtifactSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactSink for PgArtifactSink {
    async fn persist(&self, task: &Task, artifact: &ContentArtifact) -> Result<()> {
        upsert_artifact(&self.pool, &task.id, artifact)
            .await
            .map_err(|e| IngestError::Persistence(e.to_string()))
    }
}
