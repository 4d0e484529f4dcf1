//! The speech-recognition capability and its HTTP implementation.
//!
//! The external service is a capability, not a protocol we own: submit an
//! audio chunk with its sequence position, receive recognized-text events
//! with chunk-local offsets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SpeechConfig;
use crate::error::TranscribeError;
use crate::transcribe::{RecognitionEvent, SpeechChunk};

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Submit one chunk and wait for its recognition events.
    ///
    /// `Unavailable` errors are transient and retried by the orchestrator;
    /// `Auth` errors are terminal.
    async fn recognize_chunk(
        &self,
        chunk: &SpeechChunk,
    ) -> Result<Vec<RecognitionEvent>, TranscribeError>;
}

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    sequence: usize,
    sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    samples: &'a [f32],
}

#[derive(Deserialize)]
struct RecognizeResponse {
    events: Vec<RecognitionEvent>,
}

/// Cloud speech client over HTTP.
#[derive(Clone)]
pub struct HttpSpeechClient {
    client: Client,
    endpoint: String,
    api_key: String,
    language: Option<String>,
}

impl HttpSpeechClient {
    /// Build a client from the speech configuration. A missing credential
    /// is an authentication failure, surfaced here so feature analysis can
    /// still proceed without transcription.
    pub fn new(config: &SpeechConfig, language: Option<String>) -> Result<Self, TranscribeError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                TranscribeError::Auth("speech credentials not configured".to_string())
            })?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| TranscribeError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            language,
        })
    }
}

#[async_trait]
impl SpeechRecognizer for HttpSpeechClient {
    async fn recognize_chunk(
        &self,
        chunk: &SpeechChunk,
    ) -> Result<Vec<RecognitionEvent>, TranscribeError> {
        let body = RecognizeRequest {
            sequence: chunk.sequence,
            sample_rate: chunk.sample_rate,
            language: self.language.as_deref(),
            samples: &chunk.samples,
        };

        debug!(
            "submitting chunk {} ({:.2}s at {:.2}s)",
            chunk.sequence,
            chunk.duration_seconds(),
            chunk.start_seconds
        );

        let response = self
            .client
            .post(format!("{}/v1/recognize", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TranscribeError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TranscribeError::Auth(
                format!("service rejected credentials ({})", response.status()),
            )),
            status if status.is_success() => {
                let parsed: RecognizeResponse = response
                    .json()
                    .await
                    .map_err(|e| TranscribeError::Unavailable(format!("malformed response: {e}")))?;
                Ok(parsed.events)
            }
            status => Err(TranscribeError::Unavailable(format!(
                "service returned {status}"
            ))),
        }
    }
}
