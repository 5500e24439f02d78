//! FFmpeg progress parsing and render progress scaling.

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg's `-progress pipe:2` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Progress percentage given the total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }
}

/// Scale frame progress to a capped percentage.
///
/// While an audio pass is still pending the video pass reports 0-98,
/// leaving the final two points for the remux; a job with no audio
/// reports the full 0-100.
pub fn frame_progress(frames_done: u64, total_frames: u64, cap: f64) -> f64 {
    if total_frames == 0 {
        return 0.0;
    }
    (frames_done as f64 / total_frames as f64 * cap).min(cap)
}

/// Cap used when an audio pass follows the video pass.
pub const VIDEO_PASS_CAP: f64 = 98.0;
/// Cap when the video pass is the only pass.
pub const FULL_CAP: f64 = 100.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };
        assert!((progress.percentage(10000) - 50.0).abs() < 0.01);
        assert!((progress.percentage(5000) - 100.0).abs() < 0.01);
        assert_eq!(progress.percentage(0), 0.0);
    }

    #[test]
    fn test_frame_progress_caps() {
        assert!((frame_progress(30, 60, FULL_CAP) - 50.0).abs() < 1e-9);
        assert!((frame_progress(60, 60, VIDEO_PASS_CAP) - 98.0).abs() < 1e-9);
        // over-delivery never exceeds the cap
        assert!((frame_progress(70, 60, VIDEO_PASS_CAP) - 98.0).abs() < 1e-9);
        assert_eq!(frame_progress(10, 0, FULL_CAP), 0.0);
    }
}
