//! Vidsmith - A Rust CLI tool for turning online videos into derived content
//!
//! This library drives a five-stage pipeline (download, transcribe, summarize,
//! blog generation, podcast synthesis) over a single video source, with
//! swappable backends per stage and a file-based artifact cache that makes
//! re-runs cheap.

pub mod cli;
pub mod config;
pub mod context;
pub mod output;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod utils;

pub use config::Config;
pub use context::{BackendId, Limits, RunContext, StageKind};
pub use pipeline::{Orchestrator, RunManifest, StageOutcome};
pub use stages::{StageExecutor, StageInputs, StageOutput};
pub use store::{Artifact, ArtifactStore};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Failure raised by a stage executor. Every variant maps onto a
/// [`FailureKind`] recorded in the run manifest.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("invalid source reference: {0}")]
    InvalidInput(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("source not found: {0}")]
    NotFound(String),

    #[error("model load failed: {0}")]
    ModelLoadError(String),

    #[error("decode failed: {0}")]
    DecodeError(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("audio synthesis failed: {0}")]
    SynthesisError(String),

    #[error("stage timed out after {0}s")]
    Timeout(u64),
}

/// Classification of a stage failure, stored as data in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    UnsupportedScheme,
    NetworkError,
    NotFound,
    ModelLoadError,
    DecodeError,
    BackendUnavailable,
    QuotaExceeded,
    SynthesisError,
    Timeout,
    /// Synthetic kind: the stage was never attempted because a predecessor
    /// did not resolve.
    UpstreamFailed,
}

impl StageError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::InvalidInput(_) => FailureKind::InvalidInput,
            StageError::UnsupportedScheme(_) => FailureKind::UnsupportedScheme,
            StageError::NetworkError(_) => FailureKind::NetworkError,
            StageError::NotFound(_) => FailureKind::NotFound,
            StageError::ModelLoadError(_) => FailureKind::ModelLoadError,
            StageError::DecodeError(_) => FailureKind::DecodeError,
            StageError::BackendUnavailable(_) => FailureKind::BackendUnavailable,
            StageError::QuotaExceeded(_) => FailureKind::QuotaExceeded,
            StageError::SynthesisError(_) => FailureKind::SynthesisError,
            StageError::Timeout(_) => FailureKind::Timeout,
        }
    }
}
