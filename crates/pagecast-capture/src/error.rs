//! Error types for capture operations.

use thiserror::Error;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Errors that can occur while driving a page capture session.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("frame capture timed out after {0} ms")]
    FrameTimeout(u64),

    #[error("page is unavailable and must not be reused")]
    PageUnavailable,

    #[error("page is closed")]
    PageClosed,

    #[error("invalid page state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("media element '{id}' failed: {message}")]
    Media { id: String, message: String },

    #[error("render protocol error: {0}")]
    Protocol(String),

    #[error("capture session stopped")]
    SessionStopped,

    #[error("frame channel closed by consumer")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Create a media-adapter failure error.
    pub fn media(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Media {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a protocol-level failure error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}
