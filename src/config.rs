//! Analysis and speech-service configuration.
//!
//! Collaborators (settings layer, CLI) hand the core one of these per job;
//! everything has a serde default so a partial TOML file works.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::features::{FeatureKind, FeatureParams};

/// Which channels a job analyzes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSelection {
    /// One artifact per channel for every per-channel feature kind.
    All,
    /// A single specific channel.
    Index(usize),
}

/// How much of the file the transcription span covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationPolicy {
    /// Exactly the span used for the audio preview.
    Preview,
    SixtySeconds,
    FullFile,
}

/// Which samples feed the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionChannel {
    /// Average of all channels.
    MonoMix,
    Channel(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub enabled: bool,
    pub duration: DurationPolicy,
    /// Span used when `duration` is `Preview`, seconds.
    pub preview_seconds: f32,
    /// Language hint forwarded to the recognizer; auto-detect when absent.
    pub language: Option<String>,
    pub channel: TranscriptionChannel,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: DurationPolicy::Preview,
            preview_seconds: 10.0,
            language: None,
            channel: TranscriptionChannel::MonoMix,
        }
    }
}

/// Connection and chunking parameters for the external speech service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub endpoint: String,
    /// Credential supplied by the settings collaborator. Absence surfaces
    /// as an authentication failure, never a crash.
    pub api_key: Option<String>,
    /// Bounded duration of one submitted chunk, seconds.
    pub chunk_seconds: f32,
    /// Overlap between consecutive chunks so boundary words are not clipped.
    pub chunk_overlap_seconds: f32,
    /// Transient-failure retries per chunk.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub retry_backoff_ms: u64,
    /// Per-chunk submission timeout; exceeding it counts as transient.
    pub request_timeout_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:7071".to_string(),
            api_key: None,
            chunk_seconds: 30.0,
            chunk_overlap_seconds: 1.0,
            max_retries: 3,
            retry_backoff_ms: 500,
            request_timeout_ms: 30_000,
        }
    }
}

/// Root configuration for one analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Requested feature kinds; expanded against the channel selection.
    pub features: Vec<FeatureKind>,
    pub params: FeatureParams,
    pub channel_selection: ChannelSelection,
    pub transcription: TranscriptionConfig,
    pub speech: SpeechConfig,
    /// Resample target; decode keeps the native rate when absent.
    pub target_sample_rate: Option<u32>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            features: vec![FeatureKind::Waveform, FeatureKind::Spectrogram],
            params: FeatureParams::default(),
            channel_selection: ChannelSelection::All,
            transcription: TranscriptionConfig::default(),
            speech: SpeechConfig::default(),
            target_sample_rate: None,
        }
    }
}

impl AnalysisConfig {
    /// Load from a TOML file; missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AnalysisConfig::default();
        assert!(!config.transcription.enabled);
        assert_eq!(config.transcription.preview_seconds, 10.0);
        assert_eq!(config.speech.chunk_seconds, 30.0);
        assert!(config.speech.api_key.is_none());
    }

    #[test]
    fn partial_toml_parses() {
        let toml_str = r#"
            features = ["waveform", "mel_spectrogram"]

            [transcription]
            enabled = true
            duration = "full_file"

            [speech]
            endpoint = "https://speech.example.com"
            api_key = "k-123"
        "#;

        let config: AnalysisConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.features,
            vec![FeatureKind::Waveform, FeatureKind::MelSpectrogram]
        );
        assert!(config.transcription.enabled);
        assert_eq!(config.transcription.duration, DurationPolicy::FullFile);
        assert_eq!(config.speech.endpoint, "https://speech.example.com");
        // Untouched sections keep defaults.
        assert_eq!(config.speech.max_retries, 3);
        assert_eq!(config.params.window_size, 2048);
    }
}
