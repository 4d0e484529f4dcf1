//! Short-time Fourier transform over a fixed window/hop.

use num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::FeatureError;
use crate::features::FeatureMatrix;

/// Hann window of the given size.
pub fn hann_window(size: usize) -> Vec<f32> {
    let denom = (size.max(2) - 1) as f32;
    (0..size)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / denom;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}

/// Windowed STFT producing magnitude frames.
pub struct Stft {
    window_size: usize,
    hop_size: usize,
    window: Vec<f32>,
}

impl Stft {
    pub fn new(window_size: usize, hop_size: usize) -> Self {
        Self {
            window_size,
            hop_size: hop_size.max(1),
            window: hann_window(window_size),
        }
    }

    pub fn frame_count(&self, samples: usize) -> usize {
        if samples < self.window_size {
            0
        } else {
            1 + (samples - self.window_size) / self.hop_size
        }
    }

    /// Number of retained frequency bins (DC through Nyquist).
    pub fn bins(&self) -> usize {
        self.window_size / 2 + 1
    }

    /// Compute magnitude frames: rows = bins, cols = frames.
    ///
    /// Fails with `InsufficientSamples` when the input is shorter than one
    /// analysis window.
    pub fn magnitudes(&self, samples: &[f32]) -> Result<FeatureMatrix, FeatureError> {
        if samples.len() < self.window_size {
            return Err(FeatureError::InsufficientSamples {
                needed: self.window_size,
                got: samples.len(),
            });
        }

        let frames = self.frame_count(samples.len());
        let bins = self.bins();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(self.window_size);

        let mut out = FeatureMatrix::zeros(bins, frames);
        let mut buffer: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); self.window_size];

        for frame in 0..frames {
            let start = frame * self.hop_size;
            for (i, (&s, &w)) in samples[start..start + self.window_size]
                .iter()
                .zip(self.window.iter())
                .enumerate()
            {
                buffer[i] = Complex::new(s * w, 0.0);
            }
            fft.process(&mut buffer);
            for bin in 0..bins {
                let c = buffer[bin];
                out.set(bin, frame, (c.re * c.re + c.im * c.im).sqrt());
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_window_is_symmetric_and_zero_edged() {
        let w = hann_window(8);
        assert!(w[0].abs() < 1e-6);
        assert!(w[7].abs() < 1e-6);
        for i in 0..4 {
            assert!((w[i] - w[7 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn short_input_is_rejected() {
        let stft = Stft::new(256, 64);
        let err = stft.magnitudes(&vec![0.0; 100]).unwrap_err();
        match err {
            FeatureError::InsufficientSamples { needed, got } => {
                assert_eq!(needed, 256);
                assert_eq!(got, 100);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sine_peaks_in_matching_bin() {
        // 1 kHz tone at 16 kHz with a 512 window lands in bin 32.
        let sr = 16_000.0f32;
        let samples: Vec<f32> = (0..4096)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sr).sin())
            .collect();
        let stft = Stft::new(512, 128);
        let mags = stft.magnitudes(&samples).unwrap();

        let mut best_bin = 0;
        let mut best = 0.0f32;
        for bin in 0..mags.rows {
            let v = mags.get(bin, mags.cols / 2);
            if v > best {
                best = v;
                best_bin = bin;
            }
        }
        assert_eq!(best_bin, 32);
    }
}
