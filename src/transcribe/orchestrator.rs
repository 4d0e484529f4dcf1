//! Drives chunked continuous recognition and stitches the transcript.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DurationPolicy, SpeechConfig, TranscriptionConfig};
use crate::error::TranscribeError;
use crate::transcribe::{SpeechChunk, SpeechRecognizer, Transcript};

/// Orchestrator lifecycle. `Streaming` re-enters itself on a transient
/// network error until the retry budget for the current chunk is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// Terminal result of one transcription run. The transcript is always
/// present: segments accumulated before a failure or cancellation are
/// preserved, never silently discarded.
#[derive(Debug)]
pub struct TranscriptionOutcome {
    pub transcript: Transcript,
    pub state: OrchestratorState,
    pub error: Option<TranscribeError>,
}

impl TranscriptionOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == OrchestratorState::Completed
    }
}

/// Splits an audio span into bounded chunks, submits them in order to the
/// recognizer and reconciles the resulting events into one ordered
/// transcript. Network waits are suspension points; no worker thread is
/// held while a chunk is in flight.
pub struct TranscriptionOrchestrator {
    recognizer: Arc<dyn SpeechRecognizer>,
    chunk_seconds: f32,
    overlap_seconds: f32,
    max_retries: u32,
    retry_backoff: Duration,
    request_timeout: Duration,
}

/// Chunk layout over a span: (start, length) pairs in seconds, consecutive
/// chunks overlapping so words at boundaries are not clipped.
pub fn chunk_spans(span_seconds: f32, chunk_seconds: f32, overlap_seconds: f32) -> Vec<(f32, f32)> {
    let chunk = chunk_seconds.max(0.1);
    let overlap = if overlap_seconds >= chunk {
        0.0
    } else {
        overlap_seconds.max(0.0)
    };
    let step = chunk - overlap;

    let mut spans = Vec::new();
    let mut start = 0.0f32;
    while start < span_seconds {
        let len = chunk.min(span_seconds - start);
        spans.push((start, len));
        if start + len >= span_seconds {
            break;
        }
        start += step;
    }
    spans
}

impl TranscriptionOrchestrator {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, speech: &SpeechConfig) -> Self {
        Self {
            recognizer,
            chunk_seconds: speech.chunk_seconds,
            overlap_seconds: speech.chunk_overlap_seconds,
            max_retries: speech.max_retries,
            retry_backoff: Duration::from_millis(speech.retry_backoff_ms),
            request_timeout: Duration::from_millis(speech.request_timeout_ms),
        }
    }

    /// Span to process under the duration policy. "Preview" transcribes
    /// exactly the span used for the audio preview.
    pub fn resolve_span(policy: DurationPolicy, preview_seconds: f32, total_seconds: f32) -> f32 {
        match policy {
            DurationPolicy::Preview => preview_seconds.min(total_seconds),
            DurationPolicy::SixtySeconds => 60.0f32.min(total_seconds),
            DurationPolicy::FullFile => total_seconds,
        }
    }

    /// Run recognition over `samples` and return the stitched transcript.
    ///
    /// `channel` labels the segments' source channel; `on_progress` receives
    /// (chunks done, chunks total). Cancellation is checked between chunk
    /// submissions and during waits; an already-dispatched request is
    /// abandoned, not awaited.
    pub async fn run(
        &self,
        samples: &[f32],
        sample_rate: u32,
        channel: Option<usize>,
        transcription: &TranscriptionConfig,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(usize, usize),
    ) -> TranscriptionOutcome {
        let total_seconds = samples.len() as f32 / sample_rate.max(1) as f32;
        let span = Self::resolve_span(
            transcription.duration,
            transcription.preview_seconds,
            total_seconds,
        );
        let plan = chunk_spans(span, self.chunk_seconds, self.overlap_seconds);
        let total_chunks = plan.len();

        let mut transcript = Transcript::new();
        let mut state = OrchestratorState::Idle;
        debug!("transcription state {:?} -> Streaming", state);
        state = OrchestratorState::Streaming;
        info!(
            "transcribing {:.2}s of {:.2}s in {} chunk(s)",
            span, total_seconds, total_chunks
        );

        for (sequence, &(start, len)) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("transcription cancelled before chunk {}", sequence);
                return self.finish(transcript, OrchestratorState::Cancelled, None, state);
            }

            let first = ((start * sample_rate as f32).round() as usize).min(samples.len());
            let count = ((len * sample_rate as f32).round() as usize).min(samples.len() - first);
            let chunk = SpeechChunk {
                sequence,
                start_seconds: start,
                sample_rate,
                samples: samples[first..first + count].to_vec(),
            };

            let mut attempt = 0u32;
            loop {
                let submission = self.recognizer.recognize_chunk(&chunk);
                let result = tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("transcription cancelled; in-flight chunk {} abandoned", sequence);
                        return self.finish(transcript, OrchestratorState::Cancelled, None, state);
                    }
                    r = timeout(self.request_timeout, submission) => r,
                };

                let transient = match result {
                    Ok(Ok(events)) => {
                        for event in &events {
                            transcript.apply(channel, chunk.start_seconds, event);
                        }
                        None
                    }
                    Ok(Err(TranscribeError::Auth(msg))) => {
                        warn!("authentication failure, not retrying: {}", msg);
                        return self.finish(
                            transcript,
                            OrchestratorState::Failed,
                            Some(TranscribeError::Auth(msg)),
                            state,
                        );
                    }
                    Ok(Err(TranscribeError::Unavailable(msg))) => Some(msg),
                    Err(_) => Some("chunk submission timed out".to_string()),
                };

                let reason = match transient {
                    None => break,
                    Some(reason) => reason,
                };

                attempt += 1;
                if attempt > self.max_retries {
                    warn!(
                        "chunk {} failed permanently after {} retries: {}",
                        sequence, self.max_retries, reason
                    );
                    return self.finish(
                        transcript,
                        OrchestratorState::Failed,
                        Some(TranscribeError::Unavailable(reason)),
                        state,
                    );
                }

                let backoff = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
                warn!(
                    "chunk {} transient failure ({}), retry {}/{} in {:?}",
                    sequence, reason, attempt, self.max_retries, backoff
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return self.finish(transcript, OrchestratorState::Cancelled, None, state);
                    }
                    _ = sleep(backoff) => {}
                }
            }

            on_progress(sequence + 1, total_chunks);
        }

        transcript.freeze();
        self.finish(transcript, OrchestratorState::Completed, None, state)
    }

    fn finish(
        &self,
        transcript: Transcript,
        terminal: OrchestratorState,
        error: Option<TranscribeError>,
        previous: OrchestratorState,
    ) -> TranscriptionOutcome {
        debug!("transcription state {:?} -> {:?}", previous, terminal);
        TranscriptionOutcome {
            transcript,
            state: terminal,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_plan_covers_span_without_gaps() {
        let spans = chunk_spans(180.0, 30.0, 1.0);
        assert_eq!(spans[0].0, 0.0);
        // Consecutive chunks must overlap, never leave a gap.
        for pair in spans.windows(2) {
            let (start_a, len_a) = pair[0];
            let (start_b, _) = pair[1];
            assert!(start_b < start_a + len_a);
        }
        let (last_start, last_len) = *spans.last().unwrap();
        assert!((last_start + last_len - 180.0).abs() < 1e-3);
    }

    #[test]
    fn short_span_is_one_chunk() {
        let spans = chunk_spans(5.0, 30.0, 1.0);
        assert_eq!(spans, vec![(0.0, 5.0)]);
    }

    #[test]
    fn span_resolution_follows_policy() {
        let resolve = TranscriptionOrchestrator::resolve_span;
        assert_eq!(resolve(DurationPolicy::Preview, 10.0, 200.0), 10.0);
        assert_eq!(resolve(DurationPolicy::Preview, 10.0, 4.0), 4.0);
        assert_eq!(resolve(DurationPolicy::SixtySeconds, 10.0, 200.0), 60.0);
        assert_eq!(resolve(DurationPolicy::FullFile, 10.0, 200.0), 200.0);
    }
}
