//! Chunked continuous speech recognition against an external service.

pub mod client;
pub mod orchestrator;
pub mod transcript;

pub use client::{HttpSpeechClient, SpeechRecognizer};
pub use orchestrator::{OrchestratorState, TranscriptionOrchestrator, TranscriptionOutcome};
pub use transcript::{Transcript, TranscriptSegment};

use serde::{Deserialize, Serialize};

/// Provisional vs confirmed recognition output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionKind {
    /// Low-latency text for the currently open utterance; subject to
    /// revision.
    Partial,
    /// An utterance boundary has been confirmed; immutable.
    Final,
}

/// One recognized-text event emitted by the speech capability.
/// Offsets are local to the submitted chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub kind: RecognitionKind,
    pub text: String,
    pub offset_seconds: f32,
    pub duration_seconds: f32,
    pub confidence: f32,
}

/// A bounded-duration slice of audio submitted as one unit.
#[derive(Debug, Clone)]
pub struct SpeechChunk {
    pub sequence: usize,
    /// Absolute position of the chunk within the asset, seconds.
    pub start_seconds: f32,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl SpeechChunk {
    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f32 / self.sample_rate as f32
        }
    }
}
