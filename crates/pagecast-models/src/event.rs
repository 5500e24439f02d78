//! Consumer-facing events emitted by the rendering core.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Events emitted over a render job's event channel.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderEvent {
    /// Encoding/capture progress.
    Progress {
        /// 0-100; capped at 98 while an audio pass is still pending
        percent: f64,
        frames_done: u64,
        total_frames: u64,
    },

    /// The job finished and the output file is in place.
    Completed {
        output: String,
        duration_ms: f64,
        finished_at: DateTime<Utc>,
    },

    /// The job failed. The message is terminal; nothing follows it.
    Error { message: String },

    /// An audio track was added to the job's timeline.
    AudioAdded,

    /// An existing audio track's timeline fields changed.
    AudioUpdated,
}

impl RenderEvent {
    /// Build a progress event, clamping percent into 0-100.
    pub fn progress(percent: f64, frames_done: u64, total_frames: u64) -> Self {
        RenderEvent::Progress {
            percent: percent.clamp(0.0, 100.0),
            frames_done,
            total_frames,
        }
    }

    /// Build a completion event stamped with the current time.
    pub fn completed(output: impl Into<String>, duration_ms: f64) -> Self {
        RenderEvent::Completed {
            output: output.into(),
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    /// Build an error event.
    pub fn error(message: impl Into<String>) -> Self {
        RenderEvent::Error {
            message: message.into(),
        }
    }

    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RenderEvent::Completed { .. } | RenderEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_clamps() {
        match RenderEvent::progress(123.0, 60, 60) {
            RenderEvent::Progress { percent, .. } => assert_eq!(percent, 100.0),
            _ => panic!("expected progress"),
        }
    }

    #[test]
    fn test_terminal_events() {
        assert!(RenderEvent::completed("/tmp/out.mp4", 2000.0).is_terminal());
        assert!(RenderEvent::error("boom").is_terminal());
        assert!(!RenderEvent::progress(50.0, 30, 60).is_terminal());
        assert!(!RenderEvent::AudioAdded.is_terminal());
    }

    #[test]
    fn test_serde_tagging() {
        let json = serde_json::to_string(&RenderEvent::progress(50.0, 30, 60)).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
    }
}
