//! Serialization of analysis artifacts to user-chosen output files.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

use crate::features::FeatureResult;
use crate::job::{AnalysisResult, ArtifactStatus};
use crate::render::VisualizationImage;
use crate::transcribe::Transcript;

/// Write one visualization as a PNG.
pub fn save_image(image: &VisualizationImage, path: &Path) -> anyhow::Result<()> {
    image
        .image
        .save(path)
        .with_context(|| format!("writing image {:?}", path))?;
    Ok(())
}

/// Plain-text transcript: one `[start --> end] text` line per segment.
pub fn transcript_text(transcript: &Transcript) -> String {
    let mut out = String::new();
    for segment in transcript.segments() {
        out.push_str(&format!(
            "[{} --> {}] {}\n",
            format_timestamp(segment.start_seconds),
            format_timestamp(segment.end_seconds),
            segment.text
        ));
    }
    out
}

/// SRT subtitle rendering of the final segments.
pub fn transcript_srt(transcript: &Transcript) -> String {
    let mut out = String::new();
    for (i, segment) in transcript.segments().iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_srt_timestamp(segment.start_seconds),
            format_srt_timestamp(segment.end_seconds),
            segment.text
        ));
    }
    out
}

/// WebVTT subtitle rendering of the final segments.
pub fn transcript_vtt(transcript: &Transcript) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for segment in transcript.segments() {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_vtt_timestamp(segment.start_seconds),
            format_vtt_timestamp(segment.end_seconds),
            segment.text
        ));
    }
    out
}

/// JSON rendering with full segment metadata.
pub fn transcript_json(transcript: &Transcript) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(transcript)?)
}

/// Raw feature matrix as delimited numeric rows.
pub fn feature_csv(result: &FeatureResult) -> String {
    let data = &result.data;
    let mut out = String::new();
    for row in 0..data.rows {
        let line: Vec<String> = (0..data.cols)
            .map(|col| format!("{:.6}", data.get(row, col)))
            .collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

/// Write every ready artifact of a result into `dir`, returning the paths
/// written. Failed or cancelled artifacts are skipped; their status is the
/// caller's to report.
pub fn save_artifacts(result: &AnalysisResult, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;
    let mut written = Vec::new();

    for artifact in &result.features {
        if artifact.status != ArtifactStatus::Ready {
            continue;
        }
        let stem = format!("{}_ch{}", artifact.request.kind, artifact.request.channel);
        if let Some(image) = &artifact.image {
            let path = dir.join(format!("{stem}.png"));
            save_image(image, &path)?;
            written.push(path);
        }
        if let Some(feature) = &artifact.result {
            let path = dir.join(format!("{stem}.csv"));
            std::fs::write(&path, feature_csv(feature))?;
            written.push(path);
        }
    }

    if let Some(transcript) = &result.transcript {
        if !transcript.transcript.is_empty() {
            let txt = dir.join("transcript.txt");
            std::fs::write(&txt, transcript_text(&transcript.transcript))?;
            written.push(txt);
            let srt = dir.join("transcript.srt");
            std::fs::write(&srt, transcript_srt(&transcript.transcript))?;
            written.push(srt);
        }
    }

    info!("wrote {} artifact file(s) to {:?}", written.len(), dir);
    Ok(written)
}

/// Compact timestamp (MM:SS.mmm) for plain-text output.
fn format_timestamp(seconds: f32) -> String {
    let ms = (seconds * 1000.0).round() as i64;
    let minutes = ms / 60_000;
    let secs = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{:02}:{:02}.{:03}", minutes, secs, millis)
}

/// SRT timestamp (HH:MM:SS,mmm).
fn format_srt_timestamp(seconds: f32) -> String {
    let ms = (seconds * 1000.0).round() as i64;
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// VTT timestamp (HH:MM:SS.mmm).
fn format_vtt_timestamp(seconds: f32) -> String {
    let ms = (seconds * 1000.0).round() as i64;
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::TranscriptSegment;

    fn sample_transcript() -> Transcript {
        let mut t = Transcript::new();
        t.insert_final(TranscriptSegment {
            start_seconds: 1.0,
            end_seconds: 2.5,
            text: "hello world".to_string(),
            confidence: 0.9,
            channel: None,
            is_final: true,
        });
        t
    }

    #[test]
    fn text_format_includes_timestamps() {
        let out = transcript_text(&sample_transcript());
        assert!(out.contains("[00:01.000 --> 00:02.500]"));
        assert!(out.contains("hello world"));
    }

    #[test]
    fn srt_format_is_numbered() {
        let out = transcript_srt(&sample_transcript());
        assert!(out.starts_with("1\n"));
        assert!(out.contains("00:00:01,000 --> 00:00:02,500"));
    }

    #[test]
    fn vtt_format_has_header() {
        let out = transcript_vtt(&sample_transcript());
        assert!(out.starts_with("WEBVTT"));
        assert!(out.contains("00:00:01.000 --> 00:00:02.500"));
    }

    #[test]
    fn srt_timestamp_rolls_over_hours() {
        assert_eq!(format_srt_timestamp(3661.5), "01:01:01,500");
    }

    #[test]
    fn csv_rows_match_matrix() {
        use crate::features::{FeatureKind, FeatureMatrix, FeatureRequest};
        let result = FeatureResult {
            request: FeatureRequest::new(FeatureKind::Chromagram, 0),
            data: FeatureMatrix {
                rows: 2,
                cols: 2,
                values: vec![0.0, 1.0, 0.5, 0.25],
            },
            time_range: (0.0, 1.0),
            freq_range: None,
            value_range: (0.0, 1.0),
            computed_at: std::time::SystemTime::UNIX_EPOCH,
        };
        let csv = feature_csv(&result);
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "0.000000,1.000000");
    }
}
