//! Derived audio representations and their request/result types.

pub mod extractor;
pub mod stft;

pub use extractor::FeatureExtractor;

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// The representations the engine knows how to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Waveform,
    Spectrogram,
    MelSpectrogram,
    Chromagram,
    DoubleWaveform,
}

impl FeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Waveform => "waveform",
            FeatureKind::Spectrogram => "spectrogram",
            FeatureKind::MelSpectrogram => "mel_spectrogram",
            FeatureKind::Chromagram => "chromagram",
            FeatureKind::DoubleWaveform => "double_waveform",
        }
    }
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Analysis parameters shared by all feature kinds.
///
/// Every field is integral so a request can act as a cache key; identical
/// parameters against identical samples must reproduce bit-identical output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    /// STFT window size in samples.
    pub window_size: usize,
    /// STFT hop size in samples.
    pub hop_size: usize,
    /// Number of mel bands for the mel-spectrogram.
    pub mel_bands: usize,
    /// Upper frequency bound of the mel filterbank, Hz.
    pub mel_fmax_hz: u32,
    /// Display budget for waveform decimation.
    pub display_points: usize,
    /// Log-scale spectral magnitudes for display; linear when false.
    pub db_scale: bool,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            window_size: 2048,
            hop_size: 512,
            mel_bands: 128,
            mel_fmax_hz: 8000,
            display_points: 10_000,
            db_scale: true,
        }
    }
}

/// One requested representation of one channel.
///
/// Two requests with equal (kind, channel, params) are interchangeable; the
/// cache relies on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureRequest {
    pub kind: FeatureKind,
    /// Source channel index. Ignored for `DoubleWaveform`, which always
    /// consumes the stereo pair.
    pub channel: usize,
    pub params: FeatureParams,
}

impl FeatureRequest {
    pub fn new(kind: FeatureKind, channel: usize) -> Self {
        Self {
            kind,
            channel,
            params: FeatureParams::default(),
        }
    }
}

/// Dense row-major matrix of feature values.
///
/// Spectral kinds use rows = frequency bins, cols = time frames. Waveforms
/// are a single row; the double waveform is two rows (positive, negative).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f32>,
}

impl FeatureMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.values[row * self.cols + col] = value;
    }

    pub fn value_range(&self) -> (f32, f32) {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &v in &self.values {
            if v < min {
                min = v;
            }
            if v > max {
                max = v;
            }
        }
        if min > max {
            (0.0, 0.0)
        } else {
            (min, max)
        }
    }
}

/// An immutable computed feature. Shared by the cache and any number of
/// visualization consumers; never mutated after construction.
#[derive(Debug, Clone)]
pub struct FeatureResult {
    pub request: FeatureRequest,
    pub data: FeatureMatrix,
    /// Covered time span in seconds.
    pub time_range: (f32, f32),
    /// Frequency axis in Hz, where the kind has one.
    pub freq_range: Option<(f32, f32)>,
    /// Min/max of `data`, for color scaling.
    pub value_range: (f32, f32),
    pub computed_at: SystemTime,
}

impl FeatureResult {
    pub fn kind(&self) -> FeatureKind {
        self.request.kind
    }
}
