//! The ordered transcript and its stitching rules.

use serde::Serialize;
use tracing::debug;

use crate::transcribe::{RecognitionEvent, RecognitionKind};

/// One recognized span of speech.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptSegment {
    pub start_seconds: f32,
    pub end_seconds: f32,
    pub text: String,
    pub confidence: f32,
    /// Source channel, when a single channel fed the recognizer.
    pub channel: Option<usize>,
    pub is_final: bool,
}

impl TranscriptSegment {
    pub fn overlaps(&self, other: &TranscriptSegment) -> bool {
        const EPS: f32 = 1e-3;
        self.start_seconds < other.end_seconds - EPS && self.end_seconds > other.start_seconds + EPS
    }
}

/// Ordered sequence of final segments plus at most one pending provisional
/// segment. Final segments are non-overlapping and sorted by start time;
/// insertion order of network responses does not matter. Append-only while
/// streaming, frozen once the audio span is exhausted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    segments: Vec<TranscriptSegment>,
    pending: Option<TranscriptSegment>,
    frozen: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    pub fn pending(&self) -> Option<&TranscriptSegment> {
        self.pending.as_ref()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Apply one recognition event at its absolute offset
    /// (chunk start + event-local offset).
    pub fn apply(&mut self, channel: Option<usize>, chunk_start_seconds: f32, event: &RecognitionEvent) {
        let start = chunk_start_seconds + event.offset_seconds;
        let segment = TranscriptSegment {
            start_seconds: start,
            end_seconds: start + event.duration_seconds,
            text: event.text.clone(),
            confidence: event.confidence,
            channel,
            is_final: event.kind == RecognitionKind::Final,
        };
        match event.kind {
            RecognitionKind::Final => self.insert_final(segment),
            RecognitionKind::Partial => self.set_pending(segment),
        }
    }

    /// Insert a confirmed segment in time order. A segment overlapping an
    /// already-confirmed interval is a re-delivery (retried or overlapping
    /// chunk) and is dropped; a pending partial covering the interval is
    /// superseded.
    pub fn insert_final(&mut self, segment: TranscriptSegment) {
        if self.frozen {
            debug!("final segment after freeze ignored: {:?}", segment.text);
            return;
        }
        if self.segments.iter().any(|s| s.overlaps(&segment)) {
            debug!(
                "duplicate final segment for [{:.2}s, {:.2}s] dropped",
                segment.start_seconds, segment.end_seconds
            );
            return;
        }
        if let Some(pending) = &self.pending {
            if pending.overlaps(&segment) {
                self.pending = None;
            }
        }
        let at = self
            .segments
            .partition_point(|s| s.start_seconds <= segment.start_seconds);
        self.segments.insert(at, segment);
    }

    /// Replace (never append) the provisional segment so the visible
    /// transcript never duplicates text.
    pub fn set_pending(&mut self, segment: TranscriptSegment) {
        if self.frozen {
            return;
        }
        self.pending = Some(segment);
    }

    /// The audio span is exhausted: discard any never-confirmed partial and
    /// refuse further mutation.
    pub fn freeze(&mut self) {
        self.pending = None;
        self.frozen = true;
    }

    /// Concatenated text of all final segments.
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// End of the last confirmed segment, seconds.
    pub fn covered_until(&self) -> f32 {
        self.segments
            .iter()
            .map(|s| s.end_seconds)
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::RecognitionKind;

    fn final_event(text: &str, offset: f32, duration: f32) -> RecognitionEvent {
        RecognitionEvent {
            kind: RecognitionKind::Final,
            text: text.to_string(),
            offset_seconds: offset,
            duration_seconds: duration,
            confidence: 0.9,
        }
    }

    #[test]
    fn finals_sort_by_start_regardless_of_arrival() {
        let mut t = Transcript::new();
        t.apply(None, 20.0, &final_event("third", 0.0, 2.0));
        t.apply(None, 0.0, &final_event("first", 0.0, 2.0));
        t.apply(None, 10.0, &final_event("second", 0.0, 2.0));

        let texts: Vec<_> = t.segments().iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn partial_is_replaced_then_superseded() {
        let mut t = Transcript::new();
        let partial = RecognitionEvent {
            kind: RecognitionKind::Partial,
            text: "hel".to_string(),
            offset_seconds: 0.0,
            duration_seconds: 1.0,
            confidence: 0.3,
        };
        t.apply(None, 0.0, &partial);
        let partial2 = RecognitionEvent {
            text: "hello wo".to_string(),
            ..partial.clone()
        };
        t.apply(None, 0.0, &partial2);
        assert_eq!(t.pending().unwrap().text, "hello wo");
        assert!(t.is_empty());

        t.apply(None, 0.0, &final_event("hello world", 0.0, 1.5));
        assert!(t.pending().is_none());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn redelivered_final_is_dropped() {
        let mut t = Transcript::new();
        t.apply(None, 0.0, &final_event("once", 1.0, 2.0));
        // Retried chunk re-delivers the same utterance.
        t.apply(None, 0.0, &final_event("once", 1.0, 2.0));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn freeze_discards_pending() {
        let mut t = Transcript::new();
        t.set_pending(TranscriptSegment {
            start_seconds: 0.0,
            end_seconds: 1.0,
            text: "maybe".to_string(),
            confidence: 0.2,
            channel: None,
            is_final: false,
        });
        t.freeze();
        assert!(t.pending().is_none());

        t.insert_final(TranscriptSegment {
            start_seconds: 5.0,
            end_seconds: 6.0,
            text: "late".to_string(),
            confidence: 0.9,
            channel: None,
            is_final: true,
        });
        assert!(t.is_empty(), "frozen transcript must refuse mutation");
    }
}
