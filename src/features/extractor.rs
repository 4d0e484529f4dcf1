//! Pure computation of derived representations from channel samples.
//!
//! No I/O and no shared mutable state here: identical (samples, parameters)
//! inputs reproduce bit-identical output, which is what makes the cache and
//! parallel per-channel computation safe.

use std::time::SystemTime;

use tracing::warn;

use crate::audio::{AudioAsset, ChannelView};
use crate::error::FeatureError;
use crate::features::stft::Stft;
use crate::features::{FeatureKind, FeatureMatrix, FeatureRequest, FeatureResult};

const DB_FLOOR: f32 = -80.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(
        &self,
        asset: &AudioAsset,
        request: &FeatureRequest,
    ) -> Result<FeatureResult, FeatureError> {
        let data = match request.kind {
            FeatureKind::Waveform => self.waveform(asset, request)?,
            FeatureKind::Spectrogram => self.spectrogram(asset, request)?,
            FeatureKind::MelSpectrogram => self.mel_spectrogram(asset, request)?,
            FeatureKind::Chromagram => self.chromagram(asset, request)?,
            FeatureKind::DoubleWaveform => self.double_waveform(asset)?,
        };

        let sr = asset.sample_rate as f32;
        let time_range = (0.0, asset.frames as f32 / sr.max(1.0));
        let freq_range = match request.kind {
            FeatureKind::Spectrogram => Some((0.0, sr / 2.0)),
            FeatureKind::MelSpectrogram => {
                Some((0.0, (request.params.mel_fmax_hz as f32).min(sr / 2.0)))
            }
            _ => None,
        };
        let value_range = data.value_range();

        Ok(FeatureResult {
            request: request.clone(),
            data,
            time_range,
            freq_range,
            value_range,
            computed_at: SystemTime::now(),
        })
    }

    fn channel_samples<'a>(
        &self,
        asset: &'a AudioAsset,
        index: usize,
    ) -> Result<&'a [f32], FeatureError> {
        if let Some(samples) = asset.samples(index) {
            return Ok(samples);
        }
        // Requested channel missing: fall back to the first one rather than
        // abort the whole request.
        warn!(
            "channel {} not available ({} channels), using channel 0",
            index, asset.channel_count
        );
        asset
            .samples(0)
            .ok_or(FeatureError::ChannelCountUnsupported(asset.channel_count))
    }

    fn waveform(
        &self,
        asset: &AudioAsset,
        request: &FeatureRequest,
    ) -> Result<FeatureMatrix, FeatureError> {
        let samples = self.channel_samples(asset, request.channel)?;
        if samples.is_empty() {
            return Err(FeatureError::InsufficientSamples { needed: 1, got: 0 });
        }
        let budget = request.params.display_points.max(2);
        let stride = (samples.len() + budget - 1) / budget;
        let values: Vec<f32> = samples.iter().step_by(stride.max(1)).copied().collect();
        Ok(FeatureMatrix {
            rows: 1,
            cols: values.len(),
            values,
        })
    }

    fn spectrogram(
        &self,
        asset: &AudioAsset,
        request: &FeatureRequest,
    ) -> Result<FeatureMatrix, FeatureError> {
        let samples = self.channel_samples(asset, request.channel)?;
        let stft = Stft::new(request.params.window_size, request.params.hop_size);
        let mut mags = stft.magnitudes(samples)?;
        if request.params.db_scale {
            amplitude_to_db(&mut mags);
        }
        Ok(mags)
    }

    fn mel_spectrogram(
        &self,
        asset: &AudioAsset,
        request: &FeatureRequest,
    ) -> Result<FeatureMatrix, FeatureError> {
        let samples = self.channel_samples(asset, request.channel)?;
        let stft = Stft::new(request.params.window_size, request.params.hop_size);
        let mags = stft.magnitudes(samples)?;

        let fmax = (request.params.mel_fmax_hz as f32).min(asset.sample_rate as f32 / 2.0);
        let filterbank = mel_filterbank(
            request.params.mel_bands,
            mags.rows,
            asset.sample_rate,
            request.params.window_size,
            fmax,
        );

        let mut mel = FeatureMatrix::zeros(request.params.mel_bands, mags.cols);
        for frame in 0..mags.cols {
            for (band, filter) in filterbank.iter().enumerate() {
                let mut acc = 0.0f32;
                for (bin, &w) in filter.iter().enumerate() {
                    if w > 0.0 {
                        let m = mags.get(bin, frame);
                        acc += w * m * m;
                    }
                }
                mel.set(band, frame, acc);
            }
        }
        if request.params.db_scale {
            power_to_db(&mut mel);
        }
        Ok(mel)
    }

    fn chromagram(
        &self,
        asset: &AudioAsset,
        request: &FeatureRequest,
    ) -> Result<FeatureMatrix, FeatureError> {
        let samples = self.channel_samples(asset, request.channel)?;
        let stft = Stft::new(request.params.window_size, request.params.hop_size);
        let mags = stft.magnitudes(samples)?;

        // Pre-map every bin to its pitch class; bins below the audible
        // pitch floor contribute nothing.
        let bin_hz = asset.sample_rate as f32 / request.params.window_size as f32;
        let classes: Vec<Option<usize>> = (0..mags.rows)
            .map(|bin| {
                let freq = bin as f32 * bin_hz;
                if freq < 27.5 {
                    return None;
                }
                let midi = 69.0 + 12.0 * (freq / 440.0).log2();
                Some((midi.round() as i64).rem_euclid(12) as usize)
            })
            .collect();

        let mut chroma = FeatureMatrix::zeros(12, mags.cols);
        for frame in 0..mags.cols {
            for (bin, class) in classes.iter().enumerate() {
                if let Some(pc) = class {
                    let m = mags.get(bin, frame);
                    let current = chroma.get(*pc, frame);
                    chroma.set(*pc, frame, current + m * m);
                }
            }
            // Per-frame peak normalization so each column is comparable.
            let mut peak = 0.0f32;
            for pc in 0..12 {
                peak = peak.max(chroma.get(pc, frame));
            }
            if peak > 0.0 {
                for pc in 0..12 {
                    let v = chroma.get(pc, frame);
                    chroma.set(pc, frame, v / peak);
                }
            }
        }
        Ok(chroma)
    }

    fn double_waveform(&self, asset: &AudioAsset) -> Result<FeatureMatrix, FeatureError> {
        let composed = ChannelView::new(asset).double_waveform()?;
        let cols = composed.positive.len();
        let mut values = composed.positive;
        values.extend_from_slice(&composed.negative);
        Ok(FeatureMatrix {
            rows: 2,
            cols,
            values,
        })
    }
}

/// 20·log10 relative to the peak, floored at -80 dB.
fn amplitude_to_db(matrix: &mut FeatureMatrix) {
    let reference = matrix.values.iter().cloned().fold(0.0f32, f32::max).max(1e-10);
    for v in matrix.values.iter_mut() {
        *v = (20.0 * (v.max(1e-10) / reference).log10()).max(DB_FLOOR);
    }
}

/// 10·log10 relative to the peak, floored at -80 dB.
fn power_to_db(matrix: &mut FeatureMatrix) {
    let reference = matrix.values.iter().cloned().fold(0.0f32, f32::max).max(1e-10);
    for v in matrix.values.iter_mut() {
        *v = (10.0 * (v.max(1e-10) / reference).log10()).max(DB_FLOOR);
    }
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank: `bands` rows of `bins` weights.
fn mel_filterbank(
    bands: usize,
    bins: usize,
    sample_rate: u32,
    window_size: usize,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let mel_max = hz_to_mel(fmax);
    let bin_hz = sample_rate as f32 / window_size as f32;

    // bands + 2 equally spaced mel anchor points.
    let anchors: Vec<f32> = (0..bands + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (bands + 1) as f32))
        .collect();

    let mut filterbank = Vec::with_capacity(bands);
    for band in 0..bands {
        let (lo, center, hi) = (anchors[band], anchors[band + 1], anchors[band + 2]);
        let mut filter = vec![0.0f32; bins];
        for (bin, w) in filter.iter_mut().enumerate() {
            let freq = bin as f32 * bin_hz;
            if freq > lo && freq < hi {
                *w = if freq <= center {
                    (freq - lo) / (center - lo).max(1e-6)
                } else {
                    (hi - freq) / (hi - center).max(1e-6)
                };
            }
        }
        filterbank.push(filter);
    }
    filterbank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_roundtrip() {
        for hz in [100.0f32, 440.0, 1000.0, 8000.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((back - hz).abs() < 0.5, "{hz} -> {back}");
        }
    }

    #[test]
    fn filterbank_rows_cover_spectrum() {
        let fb = mel_filterbank(32, 1025, 44_100, 2048, 8000.0);
        assert_eq!(fb.len(), 32);
        // Every band must carry at least some weight.
        for (i, filter) in fb.iter().enumerate() {
            assert!(filter.iter().any(|&w| w > 0.0), "band {i} is empty");
        }
    }

    #[test]
    fn db_conversion_peaks_at_zero() {
        let mut m = FeatureMatrix {
            rows: 1,
            cols: 3,
            values: vec![0.5, 1.0, 0.001],
        };
        amplitude_to_db(&mut m);
        assert!((m.values[1] - 0.0).abs() < 1e-5);
        assert!(m.values[0] < 0.0);
        assert!(m.values[2] >= DB_FLOOR);
    }
}
