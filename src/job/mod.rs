//! Background analysis jobs: submission, progress, cancellation, results.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::{AudioAsset, AudioDecoder, ChannelView, DelayEstimate, Fingerprint};
use crate::cache::AnalysisCache;
use crate::config::{AnalysisConfig, ChannelSelection, DurationPolicy, TranscriptionChannel};
use crate::features::{FeatureExtractor, FeatureKind, FeatureRequest, FeatureResult};
use crate::render::{VisualizationBuilder, VisualizationImage};
use crate::transcribe::{
    OrchestratorState, SpeechRecognizer, Transcript, TranscriptionOrchestrator,
    TranscriptionOutcome,
};

/// Cache key for one computed feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureKey {
    pub fingerprint: Fingerprint,
    pub request: FeatureRequest,
}

/// Cache key for one completed transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranscriptKey {
    pub fingerprint: Fingerprint,
    pub policy: DurationPolicy,
    pub preview_ms: u32,
    pub channel: TranscriptionChannel,
    pub language: Option<String>,
}

/// Lifecycle of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Cancelled,
    Failed,
    Completed,
}

/// Progress snapshot published over a `watch` channel.
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub fraction: f32,
    pub stage: &'static str,
    pub status: JobStatus,
}

/// Per-output terminal state. The composite result reports one of these for
/// every requested output, never a silent omission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactStatus {
    Ready,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct FeatureArtifact {
    pub request: FeatureRequest,
    pub status: ArtifactStatus,
    pub result: Option<Arc<FeatureResult>>,
    pub image: Option<VisualizationImage>,
}

#[derive(Debug, Clone)]
pub struct TranscriptArtifact {
    pub status: ArtifactStatus,
    /// Possibly partial: segments accumulated before a failure or
    /// cancellation are preserved.
    pub transcript: Transcript,
}

/// Decoded-asset metadata carried into the composite result.
#[derive(Debug, Clone)]
pub struct AssetInfo {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channel_count: u16,
    pub duration_seconds: f32,
    pub codec: &'static str,
    pub metadata_report: String,
}

impl AssetInfo {
    fn of(asset: &AudioAsset) -> Self {
        Self {
            path: asset.fingerprint.path.clone(),
            sample_rate: asset.sample_rate,
            bits_per_sample: asset.bits_per_sample,
            channel_count: asset.channel_count,
            duration_seconds: asset.duration_seconds(),
            codec: asset.codec,
            metadata_report: asset.metadata_report(),
        }
    }
}

/// Composite result of one job, consumed by the presentation layer.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub asset: Option<AssetInfo>,
    pub features: Vec<FeatureArtifact>,
    pub transcript: Option<TranscriptArtifact>,
    /// Inter-channel delay, reported (not corrected) for stereo assets.
    pub channel_delay: Option<DelayEstimate>,
    /// Decode-stage failure reason, when the whole job failed.
    pub failure: Option<String>,
}

/// A job request: a validated existing file path plus the configuration.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub path: PathBuf,
    pub config: AnalysisConfig,
}

/// Caller-side handle for one submitted job.
pub struct JobHandle {
    pub id: Uuid,
    cancel: CancellationToken,
    progress: watch::Receiver<JobProgress>,
    result: watch::Receiver<Option<Arc<AnalysisResult>>>,
}

impl JobHandle {
    /// Request cancellation. Idempotent; cancelling a job that already
    /// completed is a no-op and never an error.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn progress(&self) -> JobProgress {
        self.progress.borrow().clone()
    }

    /// A receiver the caller can watch for progress updates.
    pub fn subscribe_progress(&self) -> watch::Receiver<JobProgress> {
        self.progress.clone()
    }

    /// Wait for the composite result. Returns the same result on every
    /// call; `None` only if the worker died without publishing.
    pub async fn result(&mut self) -> Option<Arc<AnalysisResult>> {
        loop {
            if let Some(result) = self.result.borrow().clone() {
                return Some(result);
            }
            if self.result.changed().await.is_err() {
                return self.result.borrow().clone();
            }
        }
    }
}

/// Top-level façade. Executes jobs on a bounded background worker pool so
/// the calling collaborator is never blocked; new submissions do not wait
/// behind a previous query's network calls.
pub struct AnalysisJobScheduler {
    workers: Arc<Semaphore>,
    feature_cache: Arc<AnalysisCache<FeatureKey, FeatureResult>>,
    transcript_cache: Arc<AnalysisCache<TranscriptKey, Transcript>>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    builder: VisualizationBuilder,
}

/// Bounded lag window for the stereo delay estimator.
const DELAY_WINDOW_SECONDS: f32 = 0.05;

impl AnalysisJobScheduler {
    pub fn new(
        workers: usize,
        cache_capacity: usize,
        recognizer: Option<Arc<dyn SpeechRecognizer>>,
    ) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(workers.max(1))),
            feature_cache: Arc::new(AnalysisCache::new(cache_capacity)),
            transcript_cache: Arc::new(AnalysisCache::new(cache_capacity)),
            recognizer,
            builder: VisualizationBuilder::default(),
        }
    }

    pub fn feature_cache(&self) -> &Arc<AnalysisCache<FeatureKey, FeatureResult>> {
        &self.feature_cache
    }

    /// Submit a job and return immediately with its handle.
    pub fn submit(&self, request: JobRequest) -> JobHandle {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(JobProgress {
            fraction: 0.0,
            stage: "queued",
            status: JobStatus::Pending,
        });
        let (result_tx, result_rx) = watch::channel(None);

        let worker = JobWorker {
            id,
            request,
            cancel: cancel.clone(),
            progress: progress_tx,
            workers: Arc::clone(&self.workers),
            feature_cache: Arc::clone(&self.feature_cache),
            transcript_cache: Arc::clone(&self.transcript_cache),
            recognizer: self.recognizer.clone(),
            builder: self.builder,
        };

        tokio::spawn(async move {
            let result = worker.run().await;
            let _ = result_tx.send(Some(Arc::new(result)));
        });

        info!("job {} submitted", id);
        JobHandle {
            id,
            cancel,
            progress: progress_rx,
            result: result_rx,
        }
    }

    /// Cancel through the scheduler; equivalent to `handle.cancel()`.
    pub fn cancel(&self, handle: &JobHandle) {
        handle.cancel();
    }
}

struct JobWorker {
    id: Uuid,
    request: JobRequest,
    cancel: CancellationToken,
    progress: watch::Sender<JobProgress>,
    workers: Arc<Semaphore>,
    feature_cache: Arc<AnalysisCache<FeatureKey, FeatureResult>>,
    transcript_cache: Arc<AnalysisCache<TranscriptKey, Transcript>>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    builder: VisualizationBuilder,
}

impl JobWorker {
    fn publish(&self, fraction: f32, stage: &'static str, status: JobStatus) {
        let _ = self.progress.send(JobProgress {
            fraction,
            stage,
            status,
        });
    }

    async fn run(self) -> AnalysisResult {
        let _permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return self.aborted_result("worker pool closed"),
        };

        if self.cancel.is_cancelled() {
            info!("job {} cancelled before start", self.id);
            return self.cancelled_result();
        }

        self.publish(0.05, "decoding", JobStatus::Running);
        let decoder = AudioDecoder {
            target_sample_rate: self.request.config.target_sample_rate,
        };
        let path = self.request.path.clone();
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&path)).await;
        let asset = match decoded {
            Ok(Ok(asset)) => asset,
            Ok(Err(e)) => {
                warn!("job {} decode failed: {}", self.id, e);
                return self.failed_result(e.to_string());
            }
            Err(e) => return self.aborted_result(&e.to_string()),
        };

        // One decode per job; everything below shares the asset read-only.
        let channel_delay = self.estimate_delay(&asset).await;

        let requests = expand_requests(&self.request.config, asset.channel_count as usize);
        let features = self.compute_features(&asset, &requests).await;

        let transcript = if self.request.config.transcription.enabled {
            Some(self.run_transcription(&asset).await)
        } else {
            None
        };

        let cancelled = features
            .iter()
            .any(|f| f.status == ArtifactStatus::Cancelled)
            || transcript
                .as_ref()
                .map(|t| t.status == ArtifactStatus::Cancelled)
                .unwrap_or(false);
        let status = if cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };

        self.publish(1.0, "done", status);
        info!("job {} finished with {:?}", self.id, status);
        AnalysisResult {
            job_id: self.id,
            status,
            asset: Some(AssetInfo::of(&asset)),
            features,
            transcript,
            channel_delay,
            failure: None,
        }
    }

    async fn estimate_delay(&self, asset: &Arc<AudioAsset>) -> Option<DelayEstimate> {
        if asset.channel_count != 2 {
            return None;
        }
        let asset = Arc::clone(asset);
        let computed = tokio::task::spawn_blocking(move || {
            ChannelView::new(&asset).estimate_delay(DELAY_WINDOW_SECONDS)
        })
        .await;
        match computed {
            Ok(Ok(estimate)) => Some(estimate),
            Ok(Err(e)) => {
                warn!("delay estimation failed: {}", e);
                None
            }
            Err(e) => {
                warn!("delay estimation worker failed: {}", e);
                None
            }
        }
    }

    async fn compute_features(
        &self,
        asset: &Arc<AudioAsset>,
        requests: &[FeatureRequest],
    ) -> Vec<FeatureArtifact> {
        self.publish(0.1, "features", JobStatus::Running);
        let total = requests.len().max(1);

        // Fan out: the extractor is pure, so independent requests may run
        // on as many blocking workers as the runtime grants.
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            if self.cancel.is_cancelled() {
                handles.push(None);
                continue;
            }
            let cache = Arc::clone(&self.feature_cache);
            let asset = Arc::clone(asset);
            let request = request.clone();
            let key = FeatureKey {
                fingerprint: asset.fingerprint.clone(),
                request: request.clone(),
            };
            handles.push(Some(tokio::spawn(async move {
                cache
                    .get_or_try_compute(key, move || async move {
                        tokio::task::spawn_blocking(move || {
                            FeatureExtractor::new()
                                .compute(&asset, &request)
                                .map_err(|e| e.to_string())
                        })
                        .await
                        .map_err(|e| e.to_string())?
                    })
                    .await
            })));
        }

        let mut artifacts = Vec::with_capacity(requests.len());
        for (i, (request, handle)) in requests.iter().zip(handles).enumerate() {
            let artifact = match handle {
                None => FeatureArtifact {
                    request: request.clone(),
                    status: ArtifactStatus::Cancelled,
                    result: None,
                    image: None,
                },
                Some(handle) => match handle.await {
                    Ok(Ok(result)) => {
                        let image = self.builder.build(&result);
                        FeatureArtifact {
                            request: request.clone(),
                            status: ArtifactStatus::Ready,
                            result: Some(result),
                            image: Some(image),
                        }
                    }
                    Ok(Err(reason)) => {
                        debug!("feature {} failed: {}", request.kind, reason);
                        FeatureArtifact {
                            request: request.clone(),
                            status: ArtifactStatus::Failed(reason),
                            result: None,
                            image: None,
                        }
                    }
                    Err(e) => FeatureArtifact {
                        request: request.clone(),
                        status: ArtifactStatus::Failed(e.to_string()),
                        result: None,
                        image: None,
                    },
                },
            };
            artifacts.push(artifact);
            let fraction = 0.1 + 0.5 * (i + 1) as f32 / total as f32;
            self.publish(fraction, "features", JobStatus::Running);
        }
        artifacts
    }

    async fn run_transcription(&self, asset: &Arc<AudioAsset>) -> TranscriptArtifact {
        self.publish(0.6, "transcribing", JobStatus::Running);
        let config = &self.request.config;

        let recognizer = match &self.recognizer {
            Some(recognizer) => Arc::clone(recognizer),
            None => {
                // Features still proceed; only transcription is reported
                // as an authentication failure.
                warn!("job {}: no speech credentials configured", self.id);
                return TranscriptArtifact {
                    status: ArtifactStatus::Failed(
                        "speech service authentication failed: credentials not configured"
                            .to_string(),
                    ),
                    transcript: Transcript::new(),
                };
            }
        };

        let view = ChannelView::new(asset);
        let (samples, channel_label) = match config.transcription.channel {
            TranscriptionChannel::MonoMix => (view.mono_mix(), None),
            TranscriptionChannel::Channel(i) => match asset.samples(i) {
                Some(s) => (s.to_vec(), Some(i)),
                None => {
                    warn!("transcription channel {} not available, using mono mix", i);
                    (view.mono_mix(), None)
                }
            },
        };

        let key = TranscriptKey {
            fingerprint: asset.fingerprint.clone(),
            policy: config.transcription.duration,
            preview_ms: (config.transcription.preview_seconds * 1000.0) as u32,
            channel: config.transcription.channel,
            language: config.transcription.language.clone(),
        };

        let orchestrator = TranscriptionOrchestrator::new(recognizer, &config.speech);
        let sample_rate = asset.sample_rate;
        let progress = &self.progress;
        let cancel = &self.cancel;
        let transcription = &config.transcription;

        // Single-flight per key: only a completed transcript is cached, a
        // partial outcome travels back through the error channel.
        let computed: Result<Arc<Transcript>, TranscriptionOutcome> = self
            .transcript_cache
            .get_or_try_compute(key, move || async move {
                let outcome = orchestrator
                    .run(
                        &samples,
                        sample_rate,
                        channel_label,
                        transcription,
                        cancel,
                        |done, total| {
                            let fraction = 0.6 + 0.35 * done as f32 / total.max(1) as f32;
                            let _ = progress.send(JobProgress {
                                fraction,
                                stage: "transcribing",
                                status: JobStatus::Running,
                            });
                        },
                    )
                    .await;
                if outcome.is_completed() {
                    Ok(outcome.transcript)
                } else {
                    Err(outcome)
                }
            })
            .await;

        match computed {
            Ok(transcript) => TranscriptArtifact {
                status: ArtifactStatus::Ready,
                transcript: (*transcript).clone(),
            },
            Err(outcome) => {
                let status = match outcome.state {
                    OrchestratorState::Cancelled => ArtifactStatus::Cancelled,
                    _ => ArtifactStatus::Failed(
                        outcome
                            .error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "transcription failed".to_string()),
                    ),
                };
                TranscriptArtifact {
                    status,
                    transcript: outcome.transcript,
                }
            }
        }
    }

    fn cancelled_result(self) -> AnalysisResult {
        let requests = expand_requests(&self.request.config, 1);
        let features = requests
            .into_iter()
            .map(|request| FeatureArtifact {
                request,
                status: ArtifactStatus::Cancelled,
                result: None,
                image: None,
            })
            .collect();
        let transcript = self
            .request
            .config
            .transcription
            .enabled
            .then(|| TranscriptArtifact {
                status: ArtifactStatus::Cancelled,
                transcript: Transcript::new(),
            });
        self.publish(1.0, "cancelled", JobStatus::Cancelled);
        AnalysisResult {
            job_id: self.id,
            status: JobStatus::Cancelled,
            asset: None,
            features,
            transcript,
            channel_delay: None,
            failure: None,
        }
    }

    fn failed_result(self, reason: String) -> AnalysisResult {
        let requests = expand_requests(&self.request.config, 1);
        let features = requests
            .into_iter()
            .map(|request| FeatureArtifact {
                request,
                status: ArtifactStatus::Failed(reason.clone()),
                result: None,
                image: None,
            })
            .collect();
        let transcript = self
            .request
            .config
            .transcription
            .enabled
            .then(|| TranscriptArtifact {
                status: ArtifactStatus::Failed(reason.clone()),
                transcript: Transcript::new(),
            });
        self.publish(1.0, "failed", JobStatus::Failed);
        AnalysisResult {
            job_id: self.id,
            status: JobStatus::Failed,
            asset: None,
            features,
            transcript,
            channel_delay: None,
            failure: Some(reason),
        }
    }

    fn aborted_result(self, reason: &str) -> AnalysisResult {
        self.failed_result(reason.to_string())
    }
}

/// Expand requested kinds against the channel selection into concrete
/// per-channel requests. The double waveform is channel-independent and
/// appears once.
fn expand_requests(config: &AnalysisConfig, channel_count: usize) -> Vec<FeatureRequest> {
    let mut requests = Vec::new();
    for &kind in &config.features {
        match kind {
            FeatureKind::DoubleWaveform => requests.push(FeatureRequest {
                kind,
                channel: 0,
                params: config.params,
            }),
            _ => match config.channel_selection {
                ChannelSelection::All => {
                    for channel in 0..channel_count.max(1) {
                        requests.push(FeatureRequest {
                            kind,
                            channel,
                            params: config.params,
                        });
                    }
                }
                ChannelSelection::Index(channel) => requests.push(FeatureRequest {
                    kind,
                    channel,
                    params: config.params,
                }),
            },
        }
    }
    requests
}
