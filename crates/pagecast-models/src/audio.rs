//! Audio tracks on the master timeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One audio track positioned against the master video timeline.
///
/// `start_ms`/`end_ms` place the track on the output timeline;
/// `seek_start_ms`/`seek_end_ms` trim within the source file itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioTrack {
    /// Source file path or URL
    pub source: String,

    /// Position on the master timeline where this track starts (ms)
    pub start_ms: f64,

    /// Position on the master timeline where this track ends (ms)
    pub end_ms: f64,

    /// Trim: playback begins this far into the source (ms)
    #[serde(default)]
    pub seek_start_ms: f64,

    /// Trim: playback of the source stops here (ms); ignored for looped
    /// tracks, which repeat until `end_ms`
    #[serde(default)]
    pub seek_end_ms: Option<f64>,

    /// Track volume 0-100
    #[serde(default = "default_volume")]
    pub volume: u8,

    /// Loop the source until `end_ms` is reached
    #[serde(default)]
    pub looped: bool,

    /// Fade-in length from `start_ms` (ms)
    #[serde(default)]
    pub fade_in_ms: f64,

    /// Fade-out length ending at the track's effective end (ms)
    #[serde(default)]
    pub fade_out_ms: f64,
}

fn default_volume() -> u8 {
    100
}

impl AudioTrack {
    /// Create a track spanning `start_ms..end_ms` with defaults.
    pub fn new(source: impl Into<String>, start_ms: f64, end_ms: f64) -> Self {
        Self {
            source: source.into(),
            start_ms,
            end_ms,
            seek_start_ms: 0.0,
            seek_end_ms: None,
            volume: 100,
            looped: false,
            fade_in_ms: 0.0,
            fade_out_ms: 0.0,
        }
    }

    /// Length the track occupies on the master timeline (ms).
    pub fn timeline_duration_ms(&self) -> f64 {
        (self.end_ms - self.start_ms).max(0.0)
    }

    /// Combined track and master volume as a linear 0.0-1.0 factor.
    pub fn effective_volume(&self, master_volume: u8) -> f64 {
        (self.volume.min(100) as f64 / 100.0) * (master_volume.min(100) as f64 / 100.0)
    }

    /// Shift the track's timeline position by `offset_ms`.
    ///
    /// Used when a segment's tracks are merged onto a composed timeline:
    /// only the timeline fields move, source trims are untouched.
    pub fn shift(&mut self, offset_ms: f64) {
        self.start_ms += offset_ms;
        self.end_ms += offset_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_volume() {
        let mut track = AudioTrack::new("music.mp3", 0.0, 5000.0);
        track.volume = 50;
        assert!((track.effective_volume(100) - 0.5).abs() < 1e-9);
        assert!((track.effective_volume(50) - 0.25).abs() < 1e-9);

        // out-of-range volumes clamp rather than amplify
        track.volume = 200;
        assert!((track.effective_volume(100) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shift_moves_timeline_only() {
        let mut track = AudioTrack::new("voice.wav", 1000.0, 4000.0);
        track.seek_start_ms = 250.0;
        track.shift(2500.0);
        assert_eq!(track.start_ms, 3500.0);
        assert_eq!(track.end_ms, 6500.0);
        assert_eq!(track.seek_start_ms, 250.0);
        assert_eq!(track.timeline_duration_ms(), 3000.0);
    }
}
