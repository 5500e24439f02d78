//! Audio timeline mux: one finished video plus N positioned tracks.
//!
//! Each track becomes one FFmpeg input with source-side trimming, then a
//! per-track filter chain (delay, volume, loop, trim, fades) feeding a
//! single non-normalizing mix node. The video stream is stream-copied;
//! only audio is encoded.

use std::path::Path;

use pagecast_models::{AudioTrack, OutputFormat};

use crate::command::FfmpegCommand;
use crate::filters::{amix_node, audio_track_chain};

/// Build the audio mux command.
///
/// `tracks` pairs each track with its probed source duration, when one
/// could be measured; the duration bounds fade-out anchors for sources
/// shorter than their window. `duration_ms` is the video's measured
/// duration and hard-trims the output, so a track tail can never extend
/// the video.
pub fn build_audio_mux_command(
    video: &Path,
    tracks: &[(AudioTrack, Option<f64>)],
    master_volume: u8,
    format: OutputFormat,
    duration_ms: f64,
    output: &Path,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(output).input(video);

    for (track, _) in tracks {
        cmd = cmd.input(&track.source);
        if track.seek_start_ms > 0.0 {
            cmd = cmd.seek(track.seek_start_ms / 1000.0);
        }
        // A looped track repeats its seeked slice via the filter chain,
        // so -to only applies when the source plays through once.
        if !track.looped {
            if let Some(seek_end_ms) = track.seek_end_ms {
                cmd = cmd.input_args(["-to".to_string(), format!("{:.3}", seek_end_ms / 1000.0)]);
            }
        }
    }

    let mut graph: Vec<String> = Vec::new();
    let mut labels: Vec<String> = Vec::new();
    for (i, (track, source_duration_ms)) in tracks.iter().enumerate() {
        let input_label = format!("{}:a", i + 1);
        let out_label = format!("a{i}");
        graph.push(audio_track_chain(
            &input_label,
            track,
            master_volume,
            *source_duration_ms,
            &out_label,
        ));
        labels.push(out_label);
    }
    graph.push(amix_node(&labels, "aout"));

    cmd.filter_complex(graph.join(";"))
        .map("0:v")
        .map("[aout]")
        .video_codec_copy()
        .audio_codec(format.audio_codec())
        .duration_secs(duration_ms / 1000.0)
}
