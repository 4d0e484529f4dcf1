use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{info, warn};

use audiolens::config::AnalysisConfig;
use audiolens::export;
use audiolens::job::{AnalysisJobScheduler, JobRequest, JobStatus};
use audiolens::transcribe::{HttpSpeechClient, SpeechRecognizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let file = match args.next() {
        Some(f) => PathBuf::from(f),
        None => bail!("usage: audiolens <file.wav> [--config <path>] [--out <dir>]"),
    };

    let mut config_path: Option<PathBuf> = None;
    let mut out_dir = PathBuf::from("analysis-out");
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next().map(PathBuf::from),
            "--out" => {
                if let Some(dir) = args.next() {
                    out_dir = PathBuf::from(dir);
                }
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    let config = match config_path {
        Some(path) => AnalysisConfig::from_file(&path)
            .with_context(|| format!("loading config {:?}", path))?,
        None => AnalysisConfig::default(),
    };

    // A missing credential degrades to features-only analysis; the
    // transcript artifact will carry the auth failure.
    let recognizer: Option<Arc<dyn SpeechRecognizer>> = if config.transcription.enabled {
        match HttpSpeechClient::new(&config.speech, config.transcription.language.clone()) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("speech client unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let scheduler = AnalysisJobScheduler::new(2, 32, recognizer);
    let mut handle = scheduler.submit(JobRequest {
        path: file.clone(),
        config,
    });
    info!("analyzing {:?} as job {}", file, handle.id);

    // Print progress while the job runs in the background.
    let mut progress = handle.subscribe_progress();
    let printer = tokio::spawn(async move {
        let mut last_stage = "";
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow().clone();
            if snapshot.stage != last_stage {
                println!("[{:>3.0}%] {}", snapshot.fraction * 100.0, snapshot.stage);
                last_stage = snapshot.stage;
            }
            if matches!(
                snapshot.status,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
            ) {
                break;
            }
        }
    });

    let result = handle
        .result()
        .await
        .context("job worker exited without a result")?;
    printer.abort();

    match result.status {
        JobStatus::Failed => {
            bail!(
                "analysis failed: {}",
                result.failure.as_deref().unwrap_or("unknown error")
            );
        }
        status => println!("job finished: {:?}", status),
    }

    if let Some(asset) = &result.asset {
        println!("\n{}\n", asset.metadata_report);
    }
    if let Some(delay) = &result.channel_delay {
        println!(
            "channel delay: {} samples ({:.2} ms)",
            delay.lag_samples, delay.lag_ms
        );
    }
    for artifact in &result.features {
        println!(
            "  {} (ch {}): {:?}",
            artifact.request.kind, artifact.request.channel, artifact.status
        );
    }
    if let Some(transcript) = &result.transcript {
        println!(
            "  transcript: {:?} ({} segment(s))",
            transcript.status,
            transcript.transcript.len()
        );
    }

    let written = export::save_artifacts(&result, &out_dir)?;
    for path in written {
        println!("wrote {:?}", path);
    }

    // Give the tracing pipeline a moment to flush before exit.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
