//! Frame and duration math on the virtual timeline.
//!
//! All timeline positions in pagecast are millisecond offsets from the
//! start of the session. Frame counts are always derived from a duration
//! exactly once, at session start; after that the frame count is
//! authoritative and the duration is advisory.

/// Maximum reasonable render duration (24 hours in milliseconds).
pub const MAX_RENDER_DURATION_MS: f64 = 86_400_000.0;

/// Milliseconds between frames at the given rate.
///
/// # Examples
/// ```
/// use pagecast_models::time::frame_interval_ms;
/// assert!((frame_interval_ms(25) - 40.0).abs() < 1e-9);
/// ```
pub fn frame_interval_ms(fps: u32) -> f64 {
    1000.0 / fps as f64
}

/// Number of frames a session of `duration_ms` produces at `fps`.
///
/// Truncates: a duration that does not land on a frame boundary never
/// rounds up to an extra frame.
///
/// # Examples
/// ```
/// use pagecast_models::time::frame_count;
/// assert_eq!(frame_count(30, 2000.0), 60);
/// assert_eq!(frame_count(30, 2016.0), 60);
/// assert_eq!(frame_count(24, 1001.0), 24);
/// ```
pub fn frame_count(fps: u32, duration_ms: f64) -> u64 {
    (duration_ms / 1000.0 * fps as f64).floor() as u64
}

/// Convert a millisecond offset to seconds.
pub fn ms_to_secs(ms: f64) -> f64 {
    ms / 1000.0
}

/// Convert seconds to a millisecond offset.
pub fn secs_to_ms(secs: f64) -> f64 {
    secs * 1000.0
}

/// Format a millisecond duration as HH:MM:SS or HH:MM:SS.mmm.
///
/// # Examples
/// ```
/// use pagecast_models::time::format_duration_ms;
/// assert_eq!(format_duration_ms(5_400_000.0), "01:30:00");
/// assert_eq!(format_duration_ms(90_500.0), "00:01:30.500");
/// ```
pub fn format_duration_ms(ms: f64) -> String {
    let total_secs = ms / 1000.0;
    let hours = (total_secs / 3600.0).floor() as u32;
    let mins = ((total_secs % 3600.0) / 60.0).floor() as u32;
    let secs = total_secs % 60.0;

    // Include milliseconds only when present
    if (secs - secs.floor()).abs() > 0.0001 {
        format!("{:02}:{:02}:{:06.3}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs.floor() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interval() {
        assert!((frame_interval_ms(30) - 33.333333333333336).abs() < 1e-9);
        assert!((frame_interval_ms(60) - 16.666666666666668).abs() < 1e-9);
    }

    #[test]
    fn test_frame_count_floors() {
        assert_eq!(frame_count(30, 2000.0), 60);
        // 1999 ms at 30 fps is 59.97 frames; never rounds up
        assert_eq!(frame_count(30, 1999.0), 59);
        assert_eq!(frame_count(25, 1000.0), 25);
        assert_eq!(frame_count(1, 500.0), 0);
    }

    #[test]
    fn test_virtual_time_reconstructs_duration() {
        // frame_index * interval stays within one frame of the duration
        let fps = 30;
        let duration = 2000.0;
        let frames = frame_count(fps, duration);
        let last = (frames - 1) as f64 * frame_interval_ms(fps);
        assert!(last < duration);
        assert!(duration - last <= frame_interval_ms(fps) + 1e-9);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(0.0), "00:00:00");
        assert_eq!(format_duration_ms(61_000.0), "00:01:01");
        assert_eq!(format_duration_ms(3_600_000.0), "01:00:00");
    }
}
