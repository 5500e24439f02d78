//! FFmpeg filter-graph fragment builders.
//!
//! Composition and audio mixing assemble their `-filter_complex`
//! graphs from these fragments; everything is plain string building so
//! the graph shape is unit-testable without running FFmpeg.

use pagecast_models::{AudioTrack, Transition};

/// One cross-fade edge between two labeled video streams.
///
/// `offset_secs` is where on the composite timeline the overlap begins:
/// the running sum of prior composed durations minus this transition's
/// length.
pub fn xfade_edge(
    from_label: &str,
    to_label: &str,
    out_label: &str,
    transition: &Transition,
    offset_secs: f64,
) -> String {
    format!(
        "[{from}][{to}]xfade=transition={name}:duration={dur:.3}:offset={offset:.3}[{out}]",
        from = from_label,
        to = to_label,
        name = transition.filter.xfade_name(),
        dur = transition.duration_ms / 1000.0,
        offset = offset_secs,
        out = out_label,
    )
}

/// Overlay a cover image stream onto a labeled video stream.
pub fn overlay_edge(base_label: &str, cover_label: &str, out_label: &str) -> String {
    format!("[{base_label}][{cover_label}]overlay=0:0[{out_label}]")
}

/// Final pixel-format conversion of a labeled stream.
pub fn format_edge(from_label: &str, pixel_format: &str, out_label: &str) -> String {
    format!("[{from_label}]format={pixel_format}[{out_label}]")
}

/// Concat-demuxer list file content for a set of chunk files.
///
/// Single quotes in paths are escaped the way the demuxer expects
/// (`'\''`).
pub fn concat_list(paths: &[impl AsRef<std::path::Path>]) -> String {
    let mut list = String::new();
    for path in paths {
        let escaped = path.as_ref().to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    list
}

/// Per-track audio filter chain feeding the mix node.
///
/// Chain order: delay to the track's timeline start, volume scale,
/// optional infinite loop, trim to the track's timeline length, then
/// fades anchored at absolute timeline positions. No level
/// normalization happens here or in the mix node.
///
/// `source_duration_ms` bounds the fade-out anchor for non-looped
/// tracks whose source is shorter than their window.
pub fn audio_track_chain(
    input_label: &str,
    track: &AudioTrack,
    master_volume: u8,
    source_duration_ms: Option<f64>,
    out_label: &str,
) -> String {
    let mut stages: Vec<String> = Vec::new();

    let delay_ms = track.start_ms.max(0.0).round() as i64;
    stages.push(format!("adelay={delay_ms}|{delay_ms}"));

    stages.push(format!(
        "volume={:.4}",
        track.effective_volume(master_volume)
    ));

    if track.looped {
        stages.push("aloop=loop=-1:size=2147483647".to_string());
    }

    stages.push(format!(
        "atrim=end={:.3}",
        track.end_ms / 1000.0
    ));

    if track.fade_in_ms > 0.0 {
        stages.push(format!(
            "afade=t=in:st={:.3}:d={:.3}",
            track.start_ms / 1000.0,
            track.fade_in_ms / 1000.0
        ));
    }

    if track.fade_out_ms > 0.0 {
        // A looped source has no natural end, so the anchor is the
        // track's own timeline end; otherwise the source may run out
        // before the window closes.
        let end_ms = if track.looped {
            track.end_ms
        } else {
            match source_duration_ms {
                Some(src) => track.end_ms.min(track.start_ms + src),
                None => track.end_ms,
            }
        };
        stages.push(format!(
            "afade=t=out:st={:.3}:d={:.3}",
            (end_ms - track.fade_out_ms) / 1000.0,
            track.fade_out_ms / 1000.0
        ));
    }

    format!("[{input_label}]{}[{out_label}]", stages.join(","))
}

/// The mix node joining all per-track outputs.
///
/// `duration=longest` keeps the mix open until the last track's trim;
/// the mux command hard-trims the output to the video duration, so the
/// mix can never overrun it. `normalize=0` is deliberate: overlapping
/// loud tracks can clip, and that is the accepted contract of the
/// mixer.
pub fn amix_node(track_labels: &[String], out_label: &str) -> String {
    let inputs: String = track_labels
        .iter()
        .map(|l| format!("[{l}]"))
        .collect();
    format!(
        "{inputs}amix=inputs={}:duration=longest:normalize=0[{out_label}]",
        track_labels.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagecast_models::TransitionFilter;

    #[test]
    fn test_xfade_edge() {
        let t = Transition::new(TransitionFilter::Fade, 500.0);
        let edge = xfade_edge("v0", "1:v", "v1", &t, 3.5);
        assert_eq!(
            edge,
            "[v0][1:v]xfade=transition=fade:duration=0.500:offset=3.500[v1]"
        );
    }

    #[test]
    fn test_format_and_overlay_edges() {
        assert_eq!(format_edge("v2", "yuv420p", "vout"), "[v2]format=yuv420p[vout]");
        assert_eq!(overlay_edge("v2", "3:v", "vc"), "[v2][3:v]overlay=0:0[vc]");
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&["/tmp/a.ts", "/tmp/it's.ts"]);
        assert_eq!(list, "file '/tmp/a.ts'\nfile '/tmp/it'\\''s.ts'\n");
    }

    #[test]
    fn test_track_chain_basic() {
        let mut track = AudioTrack::new("music.mp3", 1000.0, 5000.0);
        track.volume = 50;
        let chain = audio_track_chain("1:a", &track, 100, None, "a0");
        assert!(chain.starts_with("[1:a]adelay=1000|1000,volume=0.5000,"));
        assert!(chain.contains("atrim=end=5.000"));
        assert!(!chain.contains("aloop"));
        assert!(chain.ends_with("[a0]"));
    }

    #[test]
    fn test_looped_track_loops_before_trim() {
        let mut track = AudioTrack::new("loop.wav", 0.0, 4000.0);
        track.looped = true;
        track.seek_end_ms = Some(2000.0);
        let chain = audio_track_chain("2:a", &track, 100, Some(1000.0), "a1");
        let loop_pos = chain.find("aloop").expect("looped track gets aloop");
        let trim_pos = chain.find("atrim").unwrap();
        assert!(loop_pos < trim_pos);
        // trimmed by the timeline window, not the source trim
        assert!(chain.contains("atrim=end=4.000"));
    }

    #[test]
    fn test_fades_anchor_to_absolute_positions() {
        let mut track = AudioTrack::new("voice.wav", 2000.0, 10_000.0);
        track.fade_in_ms = 500.0;
        track.fade_out_ms = 1000.0;

        let chain = audio_track_chain("1:a", &track, 100, None, "a0");
        assert!(chain.contains("afade=t=in:st=2.000:d=0.500"));
        assert!(chain.contains("afade=t=out:st=9.000:d=1.000"));

        // a short source pulls the fade-out anchor earlier
        let chain = audio_track_chain("1:a", &track, 100, Some(6000.0), "a0");
        assert!(chain.contains("afade=t=out:st=7.000:d=1.000"));

        // a looped track always anchors to its own end
        track.looped = true;
        let chain = audio_track_chain("1:a", &track, 100, Some(6000.0), "a0");
        assert!(chain.contains("afade=t=out:st=9.000:d=1.000"));
    }

    #[test]
    fn test_amix_has_no_normalization() {
        let node = amix_node(&["a0".to_string(), "a1".to_string()], "aout");
        assert_eq!(node, "[a0][a1]amix=inputs=2:duration=longest:normalize=0[aout]");
    }
}
