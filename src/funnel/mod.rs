//! Content funnel
//!
//! Turns a raw source payload into normalized text through an ordered
//! fallback chain, recording one [`TransformationStage`] per attempted
//! method. The extraction backends are injected; the funnel only owns the
//! ordering, the fallback decisions and the provenance bookkeeping.
//!
//! Stage outcomes:
//! - `Ok(Some(text))` succeeded, the chain stops (even if `text` is empty)
//! - `Ok(None)` no result, fall through to the next stage
//! - `Err(_)` extraction error, logged and treated like `Ok(None)`

pub mod extractors;
pub mod subtitles;
pub mod transcriber;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
pub use extractors::{
    AudioExtractor, AudioTranscriber, SidecarAudioExtractor, SidecarSubtitleExtractor,
    SubtitleExtractor,
};
pub use transcriber::{OptionalTranscriber, WhisperTranscriber};

/// Method names recorded in provenance and metadata
pub const METHOD_SUBTITLES: &str = "subtitles";
pub const METHOD_AUDIO_TRANSCRIPTION: &str = "audio_transcription";
pub const METHOD_TRANSCRIPTION: &str = "transcription";
pub const METHOD_VERBATIM: &str = "verbatim";

/// Target stage of every transformation
const TEXT_STAGE: &str = "text";

/// Kind of source payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Video,
    Audio,
    Text,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Video => "video",
            SourceType::Audio => "audio",
            SourceType::Text => "text",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(SourceType::Video),
            "audio" => Ok(SourceType::Audio),
            "text" => Ok(SourceType::Text),
            other => Err(IngestError::InvalidParameters(format!(
                "unknown source type: {other}"
            ))),
        }
    }
}

/// One attempted extraction method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationStage {
    pub from_stage: String,
    pub to_stage: String,
    pub method_used: String,
    pub timestamp: DateTime<Utc>,
    pub succeeded: bool,
    /// Set when the extractor raised instead of returning "no result"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Normalized content plus provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentArtifact {
    pub id: String,
    pub title: String,
    /// Locator (video/audio) or the raw payload (text)
    pub source: String,
    pub source_type: SourceType,
    /// Normalized text, may be empty
    pub content: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Append-only
    pub transformation_history: Vec<TransformationStage>,
}

impl ContentArtifact {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        source_type: SourceType,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source: source.into(),
            source_type,
            content: String::new(),
            metadata: BTreeMap::new(),
            transformation_history: Vec::new(),
        }
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// Method that produced the content, if any stage succeeded
    pub fn extraction_method(&self) -> Option<&str> {
        self.metadata.get("extraction_method").and_then(|v| v.as_str())
    }

    fn record_stage(&mut self, method: &str, succeeded: bool, error: Option<String>) {
        self.transformation_history.push(TransformationStage {
            from_stage: self.source_type.as_str().to_string(),
            to_stage: TEXT_STAGE.to_string(),
            method_used: method.to_string(),
            timestamp: Utc::now(),
            succeeded,
            error,
        });
    }

    fn accept(&mut self, method: &str, text: String) {
        let words = text.split_whitespace().count();
        self.metadata
            .insert("extraction_method".to_string(), method.into());
        self.metadata
            .insert("content_chars".to_string(), text.chars().count().into());
        self.metadata.insert("word_count".to_string(), words.into());
        self.content = text;
    }
}

/// Per-call funnel options
#[derive(Debug, Clone)]
pub struct FunnelOptions {
    /// Language hint passed to the transcriber
    pub language: Option<String>,
    /// When false no transcription runs: video stops after subtitles and
    /// audio sources are left empty
    pub enable_transcription: bool,
}

impl Default for FunnelOptions {
    fn default() -> Self {
        Self {
            language: None,
            enable_transcription: true,
        }
    }
}

/// Fallback-driven extraction pipeline
#[derive(Clone)]
pub struct ContentFunnel {
    subtitles: Arc<dyn SubtitleExtractor>,
    audio: Arc<dyn AudioExtractor>,
    transcriber: Arc<dyn AudioTranscriber>,
}

impl ContentFunnel {
    pub fn new(
        subtitles: Arc<dyn SubtitleExtractor>,
        audio: Arc<dyn AudioExtractor>,
        transcriber: Arc<dyn AudioTranscriber>,
    ) -> Self {
        Self {
            subtitles,
            audio,
            transcriber,
        }
    }

    /// Extract normalized content into `artifact`.
    ///
    /// An artifact that already has content is returned untouched. Running
    /// out of stages is not an error: the artifact comes back with empty
    /// content and a failed stage record per attempt.
    pub async fn process(&self, mut artifact: ContentArtifact, options: &FunnelOptions) -> ContentArtifact {
        if artifact.has_content() {
            debug!(artifact_id = %artifact.id, "content already present, skipping funnel");
            return artifact;
        }

        match artifact.source_type {
            SourceType::Text => {
                let text = artifact.source.clone();
                artifact.accept(METHOD_VERBATIM, text);
            }
            SourceType::Video => self.process_video(&mut artifact, options).await,
            SourceType::Audio if !options.enable_transcription => {
                debug!(artifact_id = %artifact.id, "transcription disabled, skipping audio source");
            }
            SourceType::Audio => {
                let outcome = self.extract_and_transcribe(&artifact.source, options).await;
                self.settle(&mut artifact, METHOD_TRANSCRIPTION, outcome);
            }
        }

        if artifact.extraction_method().is_none() {
            warn!(
                artifact_id = %artifact.id,
                attempts = artifact.transformation_history.len(),
                "all extraction stages exhausted, content left empty"
            );
            artifact
                .metadata
                .insert("extraction_exhausted".to_string(), true.into());
        } else {
            info!(
                artifact_id = %artifact.id,
                method = artifact.extraction_method().unwrap_or_default(),
                chars = artifact.content.chars().count(),
                "content extracted"
            );
        }
        artifact
    }

    async fn process_video(&self, artifact: &mut ContentArtifact, options: &FunnelOptions) {
        let source = artifact.source.clone();

        let outcome = self.subtitles.extract(&source).await;
        if self.settle(artifact, METHOD_SUBTITLES, outcome) {
            return;
        }

        if !options.enable_transcription {
            debug!(artifact_id = %artifact.id, "transcription disabled, stopping chain");
            return;
        }

        let outcome = self.extract_and_transcribe(&source, options).await;
        self.settle(artifact, METHOD_AUDIO_TRANSCRIPTION, outcome);
    }

    /// Audio extraction followed by transcription, as one stage
    async fn extract_and_transcribe(
        &self,
        source: &str,
        options: &FunnelOptions,
    ) -> Result<Option<String>> {
        let Some(audio_ref) = self.audio.extract(source).await? else {
            debug!(source, "no audio available");
            return Ok(None);
        };
        self.transcriber
            .transcribe(&audio_ref, options.language.as_deref())
            .await
    }

    /// Record the stage outcome. Returns true when the chain should stop.
    fn settle(
        &self,
        artifact: &mut ContentArtifact,
        method: &str,
        outcome: Result<Option<String>>,
    ) -> bool {
        match outcome {
            Ok(Some(text)) => {
                artifact.record_stage(method, true, None);
                artifact.accept(method, text);
                true
            }
            Ok(None) => {
                debug!(artifact_id = %artifact.id, method, "stage produced no result");
                artifact.record_stage(method, false, None);
                false
            }
            Err(e) => {
                let err = IngestError::Extraction {
                    method: method.to_string(),
                    message: e.to_string(),
                };
                warn!(artifact_id = %artifact.id, "{}", err);
                artifact.record_stage(method, false, Some(e.to_string()));
                false
            }
        }
    }
}
