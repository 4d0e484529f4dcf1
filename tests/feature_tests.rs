//! Feature extraction properties: determinism, dimensions, the double
//! waveform mapping and delay estimation on synthetic signals.

use std::path::Path;
use std::sync::Arc;

use audiolens::audio::{AudioAsset, AudioDecoder, ChannelView};
use audiolens::error::FeatureError;
use audiolens::features::{FeatureExtractor, FeatureKind, FeatureRequest};

/// Write a float WAV with explicit per-channel sample values.
fn write_wav_f32(path: &Path, channels: &[Vec<f32>], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let frames = channels[0].len();
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        for ch in channels {
            writer.write_sample(ch[i]).unwrap();
        }
    }
    writer.finalize().unwrap();
}

fn sine(freq: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
    (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
        .collect()
}

fn decode(path: &Path) -> Arc<AudioAsset> {
    AudioDecoder::new().decode(path).unwrap()
}

#[test]
fn recomputation_is_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav_f32(&path, &[sine(440.0, 16_000, 16_000)], 16_000);
    let asset = decode(&path);

    let extractor = FeatureExtractor::new();
    for kind in [
        FeatureKind::Waveform,
        FeatureKind::Spectrogram,
        FeatureKind::MelSpectrogram,
        FeatureKind::Chromagram,
    ] {
        let request = FeatureRequest::new(kind, 0);
        let a = extractor.compute(&asset, &request).unwrap();
        let b = extractor.compute(&asset, &request).unwrap();
        assert_eq!(
            a.data.values, b.data.values,
            "{kind} must be bit-reproducible"
        );
    }
}

#[test]
fn output_dimensions_follow_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_wav_f32(&path, &[sine(440.0, 16_000, 16_000)], 16_000);
    let asset = decode(&path);
    let extractor = FeatureExtractor::new();

    let mut request = FeatureRequest::new(FeatureKind::Spectrogram, 0);
    request.params.window_size = 1024;
    request.params.hop_size = 256;
    let spec = extractor.compute(&asset, &request).unwrap();
    assert_eq!(spec.data.rows, 513);
    assert_eq!(spec.data.cols, 1 + (16_000 - 1024) / 256);

    request.kind = FeatureKind::MelSpectrogram;
    request.params.mel_bands = 40;
    let mel = extractor.compute(&asset, &request).unwrap();
    assert_eq!(mel.data.rows, 40);
    assert_eq!(mel.data.cols, spec.data.cols);

    request.kind = FeatureKind::Chromagram;
    let chroma = extractor.compute(&asset, &request).unwrap();
    assert_eq!(chroma.data.rows, 12);

    request.kind = FeatureKind::Waveform;
    request.params.display_points = 1000;
    let wave = extractor.compute(&asset, &request).unwrap();
    assert_eq!(wave.data.rows, 1);
    assert!(wave.data.cols <= 1000);
}

#[test]
fn chromagram_concentrates_on_the_played_pitch_class() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a440.wav");
    write_wav_f32(&path, &[sine(440.0, 16_000, 32_000)], 16_000);
    let asset = decode(&path);

    let request = FeatureRequest::new(FeatureKind::Chromagram, 0);
    let chroma = FeatureExtractor::new().compute(&asset, &request).unwrap();

    // A is pitch class 9; the middle frame should peak there.
    let frame = chroma.data.cols / 2;
    let mut best = 0;
    for pc in 0..12 {
        if chroma.data.get(pc, frame) > chroma.data.get(best, frame) {
            best = pc;
        }
    }
    assert_eq!(best, 9, "440 Hz must land in pitch class A");
}

#[test]
fn too_short_channel_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blip.wav");
    write_wav_f32(&path, &[vec![0.1; 512]], 16_000);
    let asset = decode(&path);

    let request = FeatureRequest::new(FeatureKind::Spectrogram, 0); // window 2048
    let err = FeatureExtractor::new().compute(&asset, &request).unwrap_err();
    assert!(matches!(err, FeatureError::InsufficientSamples { .. }));
}

#[test]
fn double_waveform_maps_left_positive_right_negative() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pair.wav");
    let left = vec![0.1f32, 0.2, 0.3, 0.4];
    let right = vec![0.4f32, 0.3, 0.2, 0.1];
    write_wav_f32(&path, &[left.clone(), right.clone()], 8_000);
    let asset = decode(&path);

    let composed = ChannelView::new(&asset).double_waveform().unwrap();
    for i in 0..left.len() {
        assert!((composed.positive[i] - left[i]).abs() < 1e-6);
        assert!((composed.negative[i] + right[i]).abs() < 1e-6);
    }
}

#[test]
fn double_waveform_applies_no_realignment() {
    // Right channel is a delayed copy of the left; a detected delay must be
    // reported, never corrected in the composition.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("delayed.wav");
    let sr = 8_000;
    let delay = 37usize;
    // Deterministic noise: a periodic tone would make the lag ambiguous.
    let left: Vec<f32> = (0..8_000)
        .map(|i| {
            let x = (i as f32 * 12.9898).sin() * 43_758.547;
            x.fract() - 0.5
        })
        .collect();
    let mut right = vec![0.0f32; delay];
    right.extend_from_slice(&left[..8_000 - delay]);
    write_wav_f32(&path, &[left.clone(), right.clone()], sr);
    let asset = decode(&path);
    let view = ChannelView::new(&asset);

    let estimate = view.estimate_delay(0.05).unwrap();
    assert_eq!(
        estimate.lag_samples, delay as i64,
        "estimator must recover the synthetic lag"
    );

    let composed = view.double_waveform().unwrap();
    for i in 0..128 {
        assert!(
            (composed.negative[i] + right[i].abs()).abs() < 1e-6,
            "sample {i} must stay aligned to the raw right channel"
        );
    }
}

#[test]
fn pair_operations_require_exactly_two_channels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mono.wav");
    write_wav_f32(&path, &[sine(100.0, 8_000, 4_000)], 8_000);
    let asset = decode(&path);
    let view = ChannelView::new(&asset);

    assert!(matches!(
        view.double_waveform().unwrap_err(),
        FeatureError::ChannelCountUnsupported(1)
    ));
    assert!(matches!(
        view.estimate_delay(0.05).unwrap_err(),
        FeatureError::ChannelCountUnsupported(1)
    ));

    let request = FeatureRequest::new(FeatureKind::DoubleWaveform, 0);
    assert!(FeatureExtractor::new().compute(&asset, &request).is_err());
}

#[test]
fn channel_labels_follow_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pair.wav");
    write_wav_f32(&path, &[vec![0.0; 64], vec![0.0; 64]], 8_000);
    let asset = decode(&path);
    let view = ChannelView::new(&asset);
    assert_eq!(view.label(0), "Left");
    assert_eq!(view.label(1), "Right");
}
