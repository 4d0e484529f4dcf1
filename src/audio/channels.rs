//! Per-channel views and stereo channel-pair operations.

use num_complex::Complex;
use rustfft::FftPlanner;
use tracing::debug;

use crate::audio::AudioAsset;
use crate::error::FeatureError;

/// Estimated inter-channel time offset. Positive lag means the right
/// channel trails the left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayEstimate {
    pub lag_samples: i64,
    pub lag_ms: f32,
    pub peak_correlation: f32,
}

/// Stereo composition: left-channel amplitude plotted positive, right-channel
/// amplitude plotted negative, aligned sample-for-sample. No time-shifting is
/// applied even when a delay was detected; delay is reported, not corrected.
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleWaveform {
    pub positive: Vec<f32>,
    pub negative: Vec<f32>,
    pub sample_rate: u32,
}

/// Read-only channel accessor over a decoded asset. Never outlives the
/// asset it borrows from.
pub struct ChannelView<'a> {
    asset: &'a AudioAsset,
}

impl<'a> ChannelView<'a> {
    pub fn new(asset: &'a AudioAsset) -> Self {
        Self { asset }
    }

    /// Human label for a channel index: "Left"/"Right" for stereo pairs,
    /// "Ch N" otherwise.
    pub fn label(&self, index: usize) -> String {
        if self.asset.channel_count == 2 {
            match index {
                0 => "Left".to_string(),
                1 => "Right".to_string(),
                n => format!("Ch {}", n + 1),
            }
        } else {
            format!("Ch {}", index + 1)
        }
    }

    pub fn samples(&self, index: usize) -> Option<&'a [f32]> {
        self.asset.samples(index)
    }

    /// Average of all channels, for transcription input.
    pub fn mono_mix(&self) -> Vec<f32> {
        let count = self.asset.channel_count as usize;
        if count == 1 {
            return self.asset.samples(0).map(|s| s.to_vec()).unwrap_or_default();
        }
        let frames = self.asset.frames;
        let mut mix = vec![0.0f32; frames];
        for ch in 0..count {
            if let Some(samples) = self.asset.samples(ch) {
                for (acc, &s) in mix.iter_mut().zip(samples.iter()) {
                    *acc += s;
                }
            }
        }
        let inv = 1.0 / count as f32;
        for v in mix.iter_mut() {
            *v *= inv;
        }
        mix
    }

    fn stereo_pair(&self) -> Result<(&'a [f32], &'a [f32]), FeatureError> {
        if self.asset.channel_count != 2 {
            return Err(FeatureError::ChannelCountUnsupported(self.asset.channel_count));
        }
        match (self.asset.samples(0), self.asset.samples(1)) {
            (Some(l), Some(r)) => Ok((l, r)),
            _ => Err(FeatureError::ChannelCountUnsupported(self.asset.channel_count)),
        }
    }

    /// Cross-correlate the stereo pair over a bounded lag window and return
    /// the signed lag maximizing correlation. Phase-transform weighting
    /// (spectrum normalized to unit magnitude) sharpens the peak.
    pub fn estimate_delay(&self, max_lag_seconds: f32) -> Result<DelayEstimate, FeatureError> {
        let (left, right) = self.stereo_pair()?;
        let n = left.len().min(right.len());
        if n < 2 {
            return Err(FeatureError::InsufficientSamples { needed: 2, got: n });
        }

        // Zero-pad to twice the signal length so the circular correlation
        // is linear within the lag window.
        let fft_len = (n * 2).next_power_of_two();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_len);
        let ifft = planner.plan_fft_inverse(fft_len);

        let mut spec_l = pad_complex(&left[..n], fft_len);
        let mut spec_r = pad_complex(&right[..n], fft_len);
        fft.process(&mut spec_l);
        fft.process(&mut spec_r);

        // Cross-power spectrum with PHAT normalization.
        let mut cross: Vec<Complex<f32>> = spec_l
            .iter()
            .zip(spec_r.iter())
            .map(|(l, r)| {
                let p = l * r.conj();
                let mag = p.norm().max(1e-6);
                p / mag
            })
            .collect();
        ifft.process(&mut cross);

        let scale = 1.0 / fft_len as f32;
        let max_lag = ((max_lag_seconds * self.asset.sample_rate as f32) as i64)
            .clamp(1, (n - 1) as i64);

        let mut best_lag = 0i64;
        let mut best = f32::NEG_INFINITY;
        for lag in -max_lag..=max_lag {
            // correlation[k] = sum left[i+k] * right[i]; the peak sits at
            // k = -d when right trails left by d samples.
            let idx = lag.rem_euclid(fft_len as i64) as usize;
            let value = cross[idx].re * scale;
            if value > best {
                best = value;
                best_lag = -lag;
            }
        }

        let lag_ms = best_lag as f32 / self.asset.sample_rate as f32 * 1000.0;
        debug!(
            "channel delay estimate: {} samples ({:.2} ms), peak {:.3}",
            best_lag, lag_ms, best
        );
        Ok(DelayEstimate {
            lag_samples: best_lag,
            lag_ms,
            peak_correlation: best,
        })
    }

    /// Compose the stereo pair into one signed double waveform.
    pub fn double_waveform(&self) -> Result<DoubleWaveform, FeatureError> {
        let (left, right) = self.stereo_pair()?;
        let n = left.len().min(right.len());
        let positive = left[..n].iter().map(|v| v.abs()).collect();
        let negative = right[..n].iter().map(|v| -v.abs()).collect();
        Ok(DoubleWaveform {
            positive,
            negative,
            sample_rate: self.asset.sample_rate,
        })
    }
}

fn pad_complex(samples: &[f32], len: usize) -> Vec<Complex<f32>> {
    samples
        .iter()
        .map(|&s| Complex::new(s, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(len)
        .collect()
}
