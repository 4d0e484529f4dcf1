pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod features;
pub mod job;
pub mod render;
pub mod transcribe;

// Re-export the façade most collaborators talk to.
pub use job::{AnalysisJobScheduler, JobHandle, JobRequest};
