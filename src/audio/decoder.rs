//! WAV file decoding into a normalized, planar, immutable sample asset.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use hound::{SampleFormat, WavReader};
use rubato::{FftFixedIn, Resampler};
use tracing::{debug, info, warn};

use crate::error::DecodeError;

/// Stable identity of a file's content: path + size + mtime.
/// A re-analysis after the file changed must not reuse cached results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub path: PathBuf,
    pub size: u64,
    pub modified_ms: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> Result<Self, DecodeError> {
        let meta = with_io_retry(|| std::fs::metadata(path))?;
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            size: meta.len(),
            modified_ms,
        })
    }
}

/// A decoded audio file. Immutable once built; channels are planar and
/// normalized to [-1, 1] regardless of source bit depth. Shared read-only
/// (via `Arc`) across all feature computations of the job that decoded it.
#[derive(Debug)]
pub struct AudioAsset {
    pub fingerprint: Fingerprint,
    pub sample_rate: u32,
    /// Source bit depth, kept for display only; samples are already f32.
    pub bits_per_sample: u16,
    pub channel_count: u16,
    pub frames: usize,
    pub codec: &'static str,
    channels: Vec<Vec<f32>>,
}

impl AudioAsset {
    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames as f32 / self.sample_rate as f32
        }
    }

    /// Full sample range of one channel.
    pub fn samples(&self, channel: usize) -> Option<&[f32]> {
        self.channels.get(channel).map(|c| c.as_slice())
    }

    /// A contiguous window of one channel, clamped to the channel length.
    pub fn window(&self, channel: usize, start: usize, len: usize) -> Option<&[f32]> {
        let samples = self.channels.get(channel)?;
        let start = start.min(samples.len());
        let end = (start + len).min(samples.len());
        Some(&samples[start..end])
    }

    /// Human-readable metadata block for the presentation layer.
    pub fn metadata_report(&self) -> String {
        let total = self.duration_seconds();
        let minutes = (total / 60.0) as u32;
        let seconds = (total % 60.0) as u32;
        let mut lines = vec![
            format!("Duration: {}:{:02}", minutes, seconds),
            format!("Sample Rate: {} Hz", self.sample_rate),
            format!("Channels: {}", self.channel_count),
            format!("Bit Depth: {} bit", self.bits_per_sample),
            format!("Codec: {}", self.codec),
            format!(
                "File Size: {:.2} MB",
                self.fingerprint.size as f64 / (1024.0 * 1024.0)
            ),
        ];
        if self.channel_count == 2 {
            lines.push("Layout: stereo".to_string());
        }
        lines.join("\n")
    }
}

/// Decodes files into [`AudioAsset`]s. Stateless apart from an optional
/// target sample rate; never mutates the source file.
#[derive(Debug, Default, Clone)]
pub struct AudioDecoder {
    /// Resample everything to this rate when set.
    pub target_sample_rate: Option<u32>,
}

const IO_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Retry a filesystem operation once after a short backoff. Network-mounted
/// paths surface transient errors that a single retry usually absorbs.
fn with_io_retry<T>(mut op: impl FnMut() -> std::io::Result<T>) -> Result<T, DecodeError> {
    match op() {
        Ok(v) => Ok(v),
        Err(first) => {
            warn!("transient I/O error, retrying once: {}", first);
            std::thread::sleep(IO_RETRY_BACKOFF);
            op().map_err(DecodeError::Io)
        }
    }
}

fn map_hound(err: hound::Error) -> DecodeError {
    match err {
        hound::Error::IoError(e) => DecodeError::Io(e),
        hound::Error::FormatError(msg) => DecodeError::CorruptData(msg.to_string()),
        hound::Error::Unsupported => {
            DecodeError::UnsupportedFormat("unsupported WAV encoding".to_string())
        }
        other => DecodeError::CorruptData(other.to_string()),
    }
}

impl AudioDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target_rate(rate: u32) -> Self {
        Self {
            target_sample_rate: Some(rate),
        }
    }

    /// Decode `path` into an immutable asset.
    ///
    /// This blocks on file I/O and must run on a blocking worker, never on
    /// a caller-facing thread.
    pub fn decode(&self, path: &Path) -> Result<Arc<AudioAsset>, DecodeError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if extension != "wav" {
            return Err(DecodeError::UnsupportedFormat(format!(
                "container '{}' is not supported",
                if extension.is_empty() { "<none>" } else { &extension }
            )));
        }

        let fingerprint = Fingerprint::of(path)?;
        if fingerprint.size == 0 {
            return Err(DecodeError::CorruptData("file is empty".to_string()));
        }

        let mut reader = open_with_retry(path)?;
        let spec = reader.spec();
        let channel_count = spec.channels.max(1);
        debug!(
            "decoding {:?}: {} Hz, {} ch, {} bit",
            path, spec.sample_rate, channel_count, spec.bits_per_sample
        );

        let (interleaved, codec) = match spec.sample_format {
            SampleFormat::Float => {
                let samples = reader
                    .samples::<f32>()
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(map_hound)?;
                (samples, "wav/float")
            }
            SampleFormat::Int => {
                // Normalize by the full scale of the source bit depth.
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                let samples = reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(map_hound)?;
                (samples, "wav/pcm")
            }
        };

        let mut channels = deinterleave(&interleaved, channel_count as usize);

        let mut sample_rate = spec.sample_rate;
        if let Some(target) = self.target_sample_rate {
            if target != sample_rate {
                for ch in channels.iter_mut() {
                    *ch = resample(ch, sample_rate, target)?;
                }
                sample_rate = target;
            }
        }

        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        info!(
            "decoded {:?}: {:.2}s, {} ch at {} Hz",
            path,
            frames as f32 / sample_rate.max(1) as f32,
            channel_count,
            sample_rate
        );

        Ok(Arc::new(AudioAsset {
            fingerprint,
            sample_rate,
            bits_per_sample: spec.bits_per_sample,
            channel_count,
            frames,
            codec,
            channels,
        }))
    }
}

fn open_with_retry(path: &Path) -> Result<WavReader<std::io::BufReader<std::fs::File>>, DecodeError> {
    match WavReader::open(path) {
        Ok(reader) => Ok(reader),
        Err(hound::Error::IoError(e)) => {
            warn!("transient I/O error opening {:?}, retrying once: {}", path, e);
            std::thread::sleep(IO_RETRY_BACKOFF);
            WavReader::open(path).map_err(map_hound)
        }
        Err(other) => Err(map_hound(other)),
    }
}

fn deinterleave(interleaved: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = interleaved.len() / channels.max(1);
    let mut planar: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();
    if channels > 1 {
        for frame in interleaved.chunks_exact(channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                planar[ch].push(sample);
            }
        }
    } else if let Some(first) = planar.get_mut(0) {
        *first = interleaved.to_vec();
    }
    planar
}

/// Resample one channel with a fixed-input FFT resampler.
fn resample(samples: &[f32], source_sr: u32, target_sr: u32) -> Result<Vec<f32>, DecodeError> {
    const CHUNK: usize = 1024;
    let mut resampler = FftFixedIn::<f32>::new(source_sr as usize, target_sr as usize, CHUNK, 1, 1)
        .map_err(|e| DecodeError::CorruptData(format!("resampler init: {e}")))?;

    let mut output = vec![vec![0.0f32; resampler.output_frames_max()]; 1];
    let mut resampled = Vec::new();
    for chunk in samples.chunks(CHUNK) {
        let mut input = vec![chunk.to_vec()];
        // The resampler wants full chunks; zero-pad the tail.
        input[0].resize(CHUNK, 0.0);
        let (_, out_len) = resampler
            .process_into_buffer(&input, &mut output, None)
            .map_err(|e| DecodeError::CorruptData(format!("resampling: {e}")))?;
        resampled.extend_from_slice(&output[0][..out_len]);
    }
    Ok(resampled)
}
