//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during synthesis and composition.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("encoder '{codec}' could not be initialized: {hint}")]
    EncoderUnsupported { codec: String, hint: String },

    #[error("invalid synthesizer state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("chunk {index} does not match the composition: {message}")]
    ChunkMismatch { index: u32, message: String },

    #[error("chunk index {0} was already submitted")]
    DuplicateChunkIndex(u32),

    #[error("composition has no chunks")]
    EmptyComposition,

    #[error("invalid render spec: {0}")]
    InvalidSpec(#[from] pagecast_models::render::RenderSpecError),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Recognized stderr fragments signalling a codec/hardware limitation
/// rather than a job-specific failure.
const ENCODER_LIMITATION_PATTERNS: &[&str] = &[
    "Error while opening encoder",
    "No capable devices found",
    "Cannot load libcuda",
    "OpenEncodeSessionEx failed",
    "Unknown encoder",
];

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a chunk mismatch error.
    pub fn chunk_mismatch(index: u32, message: impl Into<String>) -> Self {
        Self::ChunkMismatch {
            index,
            message: message.into(),
        }
    }

    /// Classify an encoder process failure.
    ///
    /// One pattern family is recognized and rewritten into an actionable
    /// message: codec-initialization failures caused by an unsupported
    /// encoder or a hardware limitation. Everything else surfaces
    /// verbatim with the stderr tail and exit code.
    pub fn from_encoder_failure(codec: &str, stderr: String, exit_code: Option<i32>) -> Self {
        let limitation = ENCODER_LIMITATION_PATTERNS
            .iter()
            .any(|p| stderr.contains(p));

        if limitation {
            Self::EncoderUnsupported {
                codec: codec.to_string(),
                hint: format!(
                    "the encoder is unavailable on this machine (codec unsupported or a \
                     hardware limitation). Try the default software encoder for the \
                     container, or lower the resolution/pixel format. Encoder was '{codec}'."
                ),
            }
        } else {
            Self::FfmpegFailed {
                message: "FFmpeg exited with non-zero status".to_string(),
                stderr: Some(stderr),
                exit_code,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognized_encoder_failure_is_rewritten() {
        let stderr = "[libx265 @ 0x55] Error while opening encoder for output stream #0:0".to_string();
        let err = MediaError::from_encoder_failure("libx265", stderr, Some(1));
        match err {
            MediaError::EncoderUnsupported { codec, hint } => {
                assert_eq!(codec, "libx265");
                assert!(hint.contains("hardware limitation"));
                // actionable text, not the raw stack trace
                assert!(!hint.contains("0x55"));
            }
            other => panic!("expected EncoderUnsupported, got {other:?}"),
        }
    }

    #[test]
    fn test_unrecognized_failure_surfaces_verbatim() {
        let stderr = "pipe:0: Invalid data found when processing input".to_string();
        let err = MediaError::from_encoder_failure("libx264", stderr.clone(), Some(183));
        match err {
            MediaError::FfmpegFailed {
                stderr: Some(s),
                exit_code: Some(code),
                ..
            } => {
                assert_eq!(s, stderr);
                assert_eq!(code, 183);
            }
            other => panic!("expected FfmpegFailed, got {other:?}"),
        }
    }
}
