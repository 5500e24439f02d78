//! Error types for render orchestration.

use thiserror::Error;

use pagecast_capture::CaptureError;
use pagecast_media::MediaError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by render jobs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("media pipeline failed: {0}")]
    Media(#[from] MediaError),

    #[error("chunk {index} failed: {message}")]
    ChunkFailed { index: u32, message: String },

    #[error("chunk task panicked: {0}")]
    ChunkPanicked(String),

    #[error("invalid engine config: {0}")]
    Config(String),
}

impl EngineError {
    pub fn chunk_failed(index: u32, message: impl Into<String>) -> Self {
        Self::ChunkFailed {
            index,
            message: message.into(),
        }
    }
}
