//! OpenAI Whisper transcription client

use crate::error::{IngestError, Result};
use crate::funnel::extractors::{local_path, AudioTranscriber};
use async_openai::{
    config::OpenAIConfig,
    types::{AudioResponseFormat, CreateTranscriptionRequestArgs},
    Client,
};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Default transcription model
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// OpenAI transcription client
pub struct WhisperTranscriber {
    client: Client<OpenAIConfig>,
    model: String,
    max_retries: usize,
}

impl WhisperTranscriber {
    /// Create a new transcription client
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (e.g., "whisper-1")
    pub fn new(api_key: &str, model: &str) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            max_retries: 3,
        }
    }

    /// Create client from environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| IngestError::ConfigError("OPENAI_API_KEY not set".to_string()))?;

        Ok(Self::new(&api_key, DEFAULT_TRANSCRIPTION_MODEL))
    }

    /// Transcribe a local audio file
    pub async fn transcribe_file(&self, audio_ref: &str, language: Option<&str>) -> Result<String> {
        let path = local_path(audio_ref).ok_or_else(|| IngestError::Extraction {
            method: "transcription".to_string(),
            message: format!("not a local audio file: {audio_ref}"),
        })?;
        debug!("Transcribing {}", path.display());

        let mut args = CreateTranscriptionRequestArgs::default();
        args.file(path.as_path())
            .model(&self.model)
            .response_format(AudioResponseFormat::Json);
        if let Some(language) = language {
            args.language(language);
        }
        let request = args.build()?;

        let response = self.client.audio().transcribe(request).await?;
        Ok(response.text.trim().to_string())
    }

    /// Transcribe with retry on transient failures
    pub async fn transcribe_with_retry(
        &self,
        audio_ref: &str,
        language: Option<&str>,
    ) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            match self.transcribe_file(audio_ref, language).await {
                Ok(text) => return Ok(text),
                Err(e @ IngestError::Extraction { .. }) => return Err(e),
                Err(e) => {
                    warn!(
                        "Transcription attempt {}/{} failed: {}",
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                    last_error = Some(e);

                    // Exponential backoff
                    let delay = std::time::Duration::from_millis(500 * (2_u64.pow(attempt as u32)));
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| IngestError::Extraction {
            method: "transcription".to_string(),
            message: "Max retries exceeded".to_string(),
        }))
    }
}

/// Optional transcriber wrapper
///
/// Reports "no result" when the client is not configured
pub struct OptionalTranscriber {
    client: Option<WhisperTranscriber>,
}

impl OptionalTranscriber {
    /// Create from environment (disabled if API key not set)
    pub fn from_env() -> Self {
        Self {
            client: WhisperTranscriber::from_env().ok(),
        }
    }

    /// Create with explicit client
    pub fn with_client(client: WhisperTranscriber) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// Create without client
    pub fn none() -> Self {
        Self { client: None }
    }

    /// Check if transcription is enabled
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait]
impl AudioTranscriber for OptionalTranscriber {
    async fn transcribe(&self, audio_ref: &str, language: Option<&str>) -> Result<Option<String>> {
        let Some(client) = &self.client else {
            debug!("Transcription not configured, skipping {}", audio_ref);
            return Ok(None);
        };

        let text = client.transcribe_with_retry(audio_ref, language).await?;
        info!("Transcribed {} ({} chars)", audio_ref, text.len());
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_transcriber_none() {
        let transcriber = OptionalTranscriber::none();
        assert!(!transcriber.is_enabled());
    }

    #[tokio::test]
    async fn test_unconfigured_transcriber_reports_no_result() {
        let transcriber = OptionalTranscriber::none();
        let text = transcriber.transcribe("/media/a.m4a", Some("en")).await.unwrap();
        assert!(text.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires API key and a sample file in TRANSCRIBE_SAMPLE
    async fn test_transcribe_sample() {
        dotenvy::dotenv().ok();
        let sample = std::env::var("TRANSCRIBE_SAMPLE").unwrap();
        let client = WhisperTranscriber::from_env().unwrap();
        let text = client.transcribe_file(&sample, None).await.unwrap();
        assert!(!text.is_empty());
    }
}
