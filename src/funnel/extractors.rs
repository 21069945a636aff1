//! Extractor seams and the filesystem sidecar implementations
//!
//! Each extractor answers one question about a source locator. `Ok(None)`
//! means "nothing here, try the next stage".

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use crate::error::Result;
use crate::funnel::subtitles;

/// Caption/subtitle text for a source
#[async_trait]
pub trait SubtitleExtractor: Send + Sync {
    async fn extract(&self, source: &str) -> Result<Option<String>>;
}

/// Reference to extracted audio (path or URL) for a source
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn extract(&self, source: &str) -> Result<Option<String>>;
}

/// Speech-to-text for an audio reference
#[async_trait]
pub trait AudioTranscriber: Send + Sync {
    async fn transcribe(&self, audio_ref: &str, language: Option<&str>) -> Result<Option<String>>;
}

const SUBTITLE_EXTENSIONS: &[&str] = &["vtt", "srt"];

const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp3", "wav", "ogg", "opus", "flac", "aac"];

/// Resolve a locator to a local path. Remote URLs have no local sidecars.
pub fn local_path(source: &str) -> Option<PathBuf> {
    match Url::parse(source) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        // Single-letter schemes are Windows drive letters
        Ok(url) if url.scheme().len() > 1 => None,
        _ => Some(PathBuf::from(source)),
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// First existing `<stem>.<ext>` next to `path`
async fn find_sibling(path: &Path, extensions: &[&str]) -> Option<PathBuf> {
    for ext in extensions {
        let candidate = path.with_extension(ext);
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

/// Reads a `.vtt`/`.srt` file stored next to the media file (or the
/// locator itself when it already is a subtitle file) and flattens the
/// cues to plain text.
#[derive(Debug, Default, Clone)]
pub struct SidecarSubtitleExtractor;

#[async_trait]
impl SubtitleExtractor for SidecarSubtitleExtractor {
    async fn extract(&self, source: &str) -> Result<Option<String>> {
        let Some(path) = local_path(source) else {
            debug!(source, "remote source has no subtitle sidecar");
            return Ok(None);
        };

        let subtitle_path = if has_extension(&path, SUBTITLE_EXTENSIONS) {
            Some(path)
        } else {
            find_sibling(&path, SUBTITLE_EXTENSIONS).await
        };
        let Some(subtitle_path) = subtitle_path else {
            return Ok(None);
        };

        debug!("Reading subtitles from {}", subtitle_path.display());
        let raw = tokio::fs::read_to_string(&subtitle_path).await?;
        Ok(Some(subtitles::to_plain_text(&raw)))
    }
}

/// Finds an audio track for a source: the locator itself when it is an
/// audio file, otherwise an audio file with the same stem.
#[derive(Debug, Default, Clone)]
pub struct SidecarAudioExtractor;

#[async_trait]
impl AudioExtractor for SidecarAudioExtractor {
    async fn extract(&self, source: &str) -> Result<Option<String>> {
        let Some(path) = local_path(source) else {
            return Ok(None);
        };

        if has_extension(&path, AUDIO_EXTENSIONS) {
            if tokio::fs::try_exists(&path).await? {
                return Ok(Some(path.to_string_lossy().into_owned()));
            }
            return Ok(None);
        }

        Ok(find_sibling(&path, AUDIO_EXTENSIONS)
            .await
            .map(|p| p.to_string_lossy().into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path_resolution() {
        assert_eq!(local_path("/media/a.mp4"), Some(PathBuf::from("/media/a.mp4")));
        assert_eq!(local_path("clips/a.mp4"), Some(PathBuf::from("clips/a.mp4")));
        assert_eq!(
            local_path("file:///media/a.mp4"),
            Some(PathBuf::from("/media/a.mp4"))
        );
        assert_eq!(local_path("https://example.com/watch?v=1"), None);
    }

    #[tokio::test]
    async fn test_subtitle_sidecar_found() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("talk.mp4");
        std::fs::write(&video, b"").unwrap();
        std::fs::write(
            dir.path().join("talk.vtt"),
            "WEBVTT\n\n00:00:00.000 --> 00:00:02.000\nHello there\n",
        )
        .unwrap();

        let text = SidecarSubtitleExtractor
            .extract(video.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(text.as_deref(), Some("Hello there"));
    }

    #[tokio::test]
    async fn test_subtitle_sidecar_missing() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("talk.mp4");
        std::fs::write(&video, b"").unwrap();

        let text = SidecarSubtitleExtractor
            .extract(video.to_str().unwrap())
            .await
            .unwrap();
        assert!(text.is_none());
    }

    #[tokio::test]
    async fn test_audio_sidecar_and_direct() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("talk.mp4");
        let audio = dir.path().join("talk.m4a");
        std::fs::write(&video, b"").unwrap();
        std::fs::write(&audio, b"").unwrap();

        let found = SidecarAudioExtractor
            .extract(video.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(found.as_deref(), audio.to_str());

        let direct = SidecarAudioExtractor
            .extract(audio.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(direct.as_deref(), audio.to_str());

        let missing = SidecarAudioExtractor
            .extract(dir.path().join("gone.mp3").to_str().unwrap())
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
