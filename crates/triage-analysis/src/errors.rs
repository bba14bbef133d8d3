//! Analysis error types.

use thiserror::Error;

/// Errors raised by an analyzer while starting or producing stages.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The request cannot be analyzed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backing model or service is not reachable.
    #[error("analysis backend unavailable: {0}")]
    Unavailable(String),

    /// A stage failed.
    #[error("stage {stage} failed: {message}")]
    Stage {
        /// One-based stage number.
        stage: usize,
        /// Failure description.
        message: String,
    },

    /// Analyzer-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Result alias for analyzer operations.
pub type AnalysisResult<T> = Result<T, AnalysisError>;
