//! Rendering of feature results into RGB pixel buffers.
//!
//! No UI dependency: the output is a plain `image::RgbImage` plus the
//! mapping that produced it, regenerable from the feature at no data loss.

use image::{Rgb, RgbImage};

use crate::features::{FeatureKind, FeatureResult};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const WAVEFORM_COLOR: Rgb<u8> = Rgb([52, 101, 164]);
// Double waveform keeps the red-positive / blue-negative convention.
const LEFT_COLOR: Rgb<u8> = Rgb([231, 76, 60]);
const RIGHT_COLOR: Rgb<u8> = Rgb([52, 152, 219]);

/// A rendered visualization derived from exactly one feature result.
#[derive(Debug, Clone)]
pub struct VisualizationImage {
    pub kind: FeatureKind,
    pub colormap: &'static str,
    pub value_range: (f32, f32),
    pub image: RgbImage,
}

/// Builds images from immutable feature results. The builder never mutates
/// its input, so any number of images may be built concurrently from the
/// same result.
#[derive(Debug, Clone, Copy)]
pub struct VisualizationBuilder {
    pub width: u32,
    pub height: u32,
}

impl Default for VisualizationBuilder {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 256,
        }
    }
}

impl VisualizationBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn build(&self, result: &FeatureResult) -> VisualizationImage {
        match result.kind() {
            FeatureKind::Waveform => self.render_waveform(result),
            FeatureKind::DoubleWaveform => self.render_double_waveform(result),
            FeatureKind::Spectrogram | FeatureKind::MelSpectrogram => {
                self.render_heatmap(result, sequential_ramp, "sequential")
            }
            FeatureKind::Chromagram => self.render_heatmap(result, diverging_ramp, "diverging"),
        }
    }

    fn render_heatmap(
        &self,
        result: &FeatureResult,
        ramp: fn(f32) -> Rgb<u8>,
        colormap: &'static str,
    ) -> VisualizationImage {
        let data = &result.data;
        let (min, max) = result.value_range;
        let span = (max - min).max(1e-10);

        let mut image = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        if data.rows == 0 || data.cols == 0 {
            return VisualizationImage {
                kind: result.kind(),
                colormap,
                value_range: result.value_range,
                image,
            };
        }
        for x in 0..self.width {
            let col = (x as usize * data.cols) / self.width.max(1) as usize;
            let col = col.min(data.cols.saturating_sub(1));
            for y in 0..self.height {
                // Row 0 is the lowest bin; draw it at the bottom.
                let row = ((self.height - 1 - y) as usize * data.rows) / self.height as usize;
                let row = row.min(data.rows.saturating_sub(1));
                let t = (data.get(row, col) - min) / span;
                image.put_pixel(x, y, ramp(t.clamp(0.0, 1.0)));
            }
        }

        VisualizationImage {
            kind: result.kind(),
            colormap,
            value_range: result.value_range,
            image,
        }
    }

    fn render_waveform(&self, result: &FeatureResult) -> VisualizationImage {
        let values = &result.data.values;
        let mut image = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        let mid = self.height as f32 / 2.0;

        for x in 0..self.width {
            let idx = (x as usize * values.len()) / self.width.max(1) as usize;
            let v = values.get(idx).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
            let extent = (v.abs() * (mid - 1.0)).ceil() as i64;
            for d in 0..=extent {
                let y = if v >= 0.0 { mid as i64 - d } else { mid as i64 + d };
                if y >= 0 && (y as u32) < self.height {
                    image.put_pixel(x, y as u32, WAVEFORM_COLOR);
                }
            }
        }

        VisualizationImage {
            kind: result.kind(),
            colormap: "line",
            value_range: result.value_range,
            image,
        }
    }

    fn render_double_waveform(&self, result: &FeatureResult) -> VisualizationImage {
        let data = &result.data;
        let mut image = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        let mid = self.height as f32 / 2.0;

        if data.cols == 0 {
            return VisualizationImage {
                kind: result.kind(),
                colormap: "split",
                value_range: result.value_range,
                image,
            };
        }
        for x in 0..self.width {
            let idx = (x as usize * data.cols) / self.width.max(1) as usize;
            let idx = idx.min(data.cols.saturating_sub(1));

            let pos = data.get(0, idx).clamp(0.0, 1.0);
            let neg = data.get(1, idx).clamp(-1.0, 0.0);

            let up = (pos * (mid - 1.0)).ceil() as i64;
            for d in 0..=up {
                let y = mid as i64 - d;
                if y >= 0 {
                    image.put_pixel(x, y as u32, LEFT_COLOR);
                }
            }
            let down = (-neg * (mid - 1.0)).ceil() as i64;
            for d in 0..=down {
                let y = mid as i64 + d;
                if (y as u32) < self.height {
                    image.put_pixel(x, y as u32, RIGHT_COLOR);
                }
            }
        }

        VisualizationImage {
            kind: result.kind(),
            colormap: "split",
            value_range: result.value_range,
            image,
        }
    }
}

/// Perceptual dark-to-bright ramp for spectral heatmaps.
fn sequential_ramp(t: f32) -> Rgb<u8> {
    const ANCHORS: [[f32; 3]; 5] = [
        [68.0, 1.0, 84.0],
        [59.0, 82.0, 139.0],
        [33.0, 145.0, 140.0],
        [94.0, 201.0, 98.0],
        [253.0, 231.0, 37.0],
    ];
    interpolate(&ANCHORS, t)
}

/// Cool-to-warm ramp for the chromagram.
fn diverging_ramp(t: f32) -> Rgb<u8> {
    const ANCHORS: [[f32; 3]; 3] = [
        [59.0, 76.0, 192.0],
        [221.0, 221.0, 221.0],
        [180.0, 4.0, 38.0],
    ];
    interpolate(&ANCHORS, t)
}

fn interpolate(anchors: &[[f32; 3]], t: f32) -> Rgb<u8> {
    let t = t.clamp(0.0, 1.0);
    let scaled = t * (anchors.len() - 1) as f32;
    let lo = (scaled.floor() as usize).min(anchors.len() - 2);
    let frac = scaled - lo as f32;
    let mut rgb = [0u8; 3];
    for c in 0..3 {
        rgb[c] = (anchors[lo][c] + (anchors[lo + 1][c] - anchors[lo][c]) * frac).round() as u8;
    }
    Rgb(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramps_hit_their_endpoints() {
        assert_eq!(sequential_ramp(0.0), Rgb([68, 1, 84]));
        assert_eq!(sequential_ramp(1.0), Rgb([253, 231, 37]));
        assert_eq!(diverging_ramp(0.5), Rgb([221, 221, 221]));
    }
}
