//! Error taxonomy, one enum per pipeline stage.

use thiserror::Error;

/// Errors raised while opening and decoding an audio file.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unsupported container or codec: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt audio data: {0}")]
    CorruptData(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by feature extraction and channel-pair operations.
#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("channel holds {got} samples, need at least {needed}")]
    InsufficientSamples { needed: usize, got: usize },

    #[error("operation requires exactly 2 channels, asset has {0}")]
    ChannelCountUnsupported(u16),
}

/// Errors raised by the speech-recognition capability.
///
/// `Unavailable` covers every transient condition (network, timeout,
/// server-side 5xx) and is retryable; `Auth` is terminal.
#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("speech service unavailable: {0}")]
    Unavailable(String),

    #[error("speech service authentication failed: {0}")]
    Auth(String),
}

/// Crate-level error for callers that don't care about the stage.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Transcribe(#[from] TranscribeError),

    #[error("job was cancelled")]
    JobCancelled,
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
