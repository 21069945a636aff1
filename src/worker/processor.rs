//! Ingest task processor

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{IngestError, Result};
use crate::funnel::{
    ContentArtifact, ContentFunnel, FunnelOptions, OptionalTranscriber, SidecarAudioExtractor,
    SidecarSubtitleExtractor, SourceType,
};
use crate::task::Task;
use crate::worker::handler::TaskHandler;

/// Handler for `video`, `audio` and `text` tasks.
///
/// Parameters:
/// - `source` (required): locator for media, the raw payload for text
/// - `title`: defaults to the source locator
/// - `source_type`: defaults to the task type
/// - `language`: hint for transcription
/// - `content`: already-known text; the funnel leaves it untouched
/// - `transcribe`: `false` disables transcription for this task (video keeps
///   subtitles only, audio comes back empty)
pub struct IngestProcessor {
    funnel: ContentFunnel,
}

impl IngestProcessor {
    pub fn new(funnel: ContentFunnel) -> Self {
        Self { funnel }
    }

    /// Sidecar subtitle/audio lookup plus Whisper when `OPENAI_API_KEY` is set
    pub fn from_env() -> Self {
        let transcriber = OptionalTranscriber::from_env();
        if !transcriber.is_enabled() {
            warn!("OPENAI_API_KEY not set - audio transcription will be skipped");
        }

        Self::new(ContentFunnel::new(
            Arc::new(SidecarSubtitleExtractor),
            Arc::new(SidecarAudioExtractor),
            Arc::new(transcriber),
        ))
    }

    /// Build the initial artifact from task parameters
    pub fn artifact_for(task: &Task) -> Result<ContentArtifact> {
        let source = task.param_str("source").ok_or_else(|| {
            IngestError::InvalidParameters(format!("task {} has no 'source' parameter", task.id))
        })?;
        let source_type: SourceType = task
            .param_str("source_type")
            .unwrap_or(task.task_type.as_str())
            .parse()?;
        let title = task.param_str("title").unwrap_or(source);

        let mut artifact = ContentArtifact::new(task.id.as_str(), title, source_type, source);
        if let Some(content) = task.param_str("content") {
            artifact.content = content.to_string();
        }
        Ok(artifact)
    }

    fn options_for(task: &Task) -> FunnelOptions {
        FunnelOptions {
            language: task.param_str("language").map(str::to_string),
            enable_transcription: task
                .parameters
                .get("transcribe")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
        }
    }
}

#[async_trait]
impl TaskHandler for IngestProcessor {
    async fn process(&self, task: &Task) -> Result<ContentArtifact> {
        let artifact = Self::artifact_for(task)?;
        info!(
            task_id = %task.id,
            source_type = %artifact.source_type,
            "Ingesting {}",
            artifact.source
        );

        let artifact = self.funnel.process(artifact, &Self::options_for(task)).await;
        Ok(artifact)
    }
}
