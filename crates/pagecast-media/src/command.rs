//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Number of trailing stderr lines kept for error reporting.
const STDERR_TAIL_LINES: usize = 64;

/// One encoder input: a file on disk or the process's stdin pipe.
#[derive(Debug, Clone)]
pub enum InputSource {
    File(PathBuf),
    Pipe,
}

#[derive(Debug, Clone)]
struct FfmpegInput {
    source: InputSource,
    /// Arguments placed before this input's -i
    args: Vec<String>,
}

/// Builder for FFmpeg commands with any number of inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<FfmpegInput>,
    output: PathBuf,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a command producing `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add a file input.
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(FfmpegInput {
            source: InputSource::File(path.as_ref().to_path_buf()),
            args: Vec::new(),
        });
        self
    }

    /// Add a stdin-pipe input.
    pub fn piped_input(mut self) -> Self {
        self.inputs.push(FfmpegInput {
            source: InputSource::Pipe,
            args: Vec::new(),
        });
        self
    }

    /// Add an argument before the most recently added input's -i.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        if let Some(input) = self.inputs.last_mut() {
            input.args.push(arg.into());
        }
        self
    }

    /// Add multiple arguments before the most recently added input's -i.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(input) = self.inputs.last_mut() {
            input.args.extend(args.into_iter().map(Into::into));
        }
        self
    }

    /// Seek the most recent input (before -i).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Add output arguments (after all inputs).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream or filter label to the output.
    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Copy the video stream without re-encoding.
    pub fn video_codec_copy(self) -> Self {
        self.video_codec("copy")
    }

    /// Copy all streams without re-encoding.
    pub fn codec_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set video bitrate in kbps.
    pub fn video_bitrate_kbps(self, kbps: u32) -> Self {
        self.output_arg("-b:v").output_arg(format!("{kbps}k"))
    }

    /// Set pixel format.
    pub fn pix_fmt(self, pix_fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(pix_fmt)
    }

    /// Set encoder preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set encoder profile.
    pub fn video_profile(self, profile: impl Into<String>) -> Self {
        self.output_arg("-profile:v").output_arg(profile)
    }

    /// Limit output duration in seconds.
    pub fn duration_secs(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    /// Drop audio from the output.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Force the output container format.
    pub fn container_format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Extract a single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-vframes").output_arg("1")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// The configured video codec, if one was set.
    pub fn video_codec_value(&self) -> Option<&str> {
        self.output_args
            .iter()
            .position(|a| a == "-c:v")
            .and_then(|i| self.output_args.get(i + 1))
            .map(String::as_str)
    }

    /// Whether any input reads from stdin.
    pub fn has_piped_input(&self) -> bool {
        self.inputs
            .iter()
            .any(|i| matches!(i.source, InputSource::Pipe))
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.extend(input.args.clone());
            args.push("-i".to_string());
            match &input.source {
                InputSource::File(path) => args.push(path.to_string_lossy().to_string()),
                InputSource::Pipe => args.push("pipe:0".to_string()),
            }
        }

        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
///
/// No timeout is applied: encoder processes run to completion or are
/// explicitly cancelled.
pub struct FfmpegRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self { cancel_rx: None }
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Run an FFmpeg command to completion.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with a progress callback.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));
        metrics::counter!("pagecast_ffmpeg_runs_total").increment(1);

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("stderr not captured", None, None))?;
        let tail_handle = spawn_stderr_reader(stderr, progress_callback);

        let status = self.wait_for_completion(&mut child).await?;
        let tail = tail_handle.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            metrics::counter!("pagecast_ffmpeg_failures_total").increment(1);
            let codec = cmd.video_codec_value().unwrap_or("unknown");
            Err(MediaError::from_encoder_failure(
                codec,
                tail.join("\n"),
                status.code(),
            ))
        }
    }

    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<std::process::ExitStatus> {
        if let Some(mut cancel_rx) = self.cancel_rx.clone() {
            tokio::select! {
                status = child.wait() => Ok(status?),
                _ = async {
                    let _ = cancel_rx.wait_for(|cancelled| *cancelled).await;
                } => {
                    info!("FFmpeg cancelled, killing process");
                    let _ = child.kill().await;
                    Err(MediaError::Cancelled)
                }
            }
        } else {
            Ok(child.wait().await?)
        }
    }
}

/// A spawned FFmpeg process consuming frames over stdin.
///
/// The synthesizer writes batched frame runs into `write_batch`, closes
/// the stream with `end_input`, and reaps the process with `wait`.
/// `kill` is the only cancellation primitive: there is no partial-frame
/// rollback.
pub struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_handle: JoinHandle<Vec<String>>,
    codec: String,
}

impl EncoderProcess {
    /// Spawn an encoder for a command with a piped input.
    pub fn spawn<F>(cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<Self>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        check_ffmpeg()?;
        debug_assert!(cmd.has_piped_input());

        let args = cmd.build_args();
        debug!("Spawning encoder: ffmpeg {}", args.join(" "));
        metrics::counter!("pagecast_ffmpeg_runs_total").increment(1);

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("stdin not captured", None, None))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("stderr not captured", None, None))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr_handle: spawn_stderr_reader(stderr, progress_callback),
            codec: cmd.video_codec_value().unwrap_or("unknown").to_string(),
        })
    }

    /// Write one batched run of frame bytes to the encoder's input.
    pub async fn write_batch(&mut self, bytes: &[u8]) -> MediaResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::ffmpeg_failed("encoder input already closed", None, None))?;
        stdin.write_all(bytes).await?;
        Ok(())
    }

    /// Flush and close the encoder's input stream.
    pub async fn end_input(&mut self) -> MediaResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().await?;
            stdin.shutdown().await?;
        }
        Ok(())
    }

    /// Wait for the encoder to exit and classify any failure.
    pub async fn wait(mut self) -> MediaResult<()> {
        let status = self.child.wait().await?;
        let tail = self.stderr_handle.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            metrics::counter!("pagecast_ffmpeg_failures_total").increment(1);
            Err(MediaError::from_encoder_failure(
                &self.codec,
                tail.join("\n"),
                status.code(),
            ))
        }
    }

    /// Force-kill the encoder without waiting for a graceful exit.
    pub async fn kill(&mut self) {
        self.stdin.take();
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to kill encoder process");
        }
        self.stderr_handle.abort();
    }
}

/// Read stderr, forwarding progress lines and keeping a tail of
/// everything else for error reporting.
fn spawn_stderr_reader<F>(
    stderr: tokio::process::ChildStderr,
    progress_callback: F,
) -> JoinHandle<Vec<String>>
where
    F: Fn(FfmpegProgress) + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        let mut current = FfmpegProgress::default();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        while let Ok(Some(line)) = reader.next_line().await {
            if let Some(progress) = parse_progress_line(&line, &mut current) {
                progress_callback(progress);
            } else if !line.trim().is_empty() && !line.contains('=') {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
        tail.into_iter().collect()
    })
}

/// Parse a progress line from FFmpeg's `-progress` output. Returns a
/// snapshot whenever a `progress=` terminator line completes a block.
fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();
    let (key, value) = line.split_once('=')?;

    match key {
        "out_time_ms" | "out_time_us" => {
            // Both keys report microseconds in practice
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "fps" => {
            if let Ok(fps) = value.parse() {
                current.fps = fps;
            }
        }
        "speed" => {
            if value != "N/A" {
                if let Some(speed_str) = value.strip_suffix('x') {
                    if let Ok(speed) = speed_str.parse() {
                        current.speed = speed;
                    }
                }
            }
        }
        "progress" => {
            if value == "end" {
                current.is_complete = true;
            }
            return Some(current.clone());
        }
        _ => {}
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_input_command() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input("a.ts")
            .input("b.ts")
            .seek(2.0)
            .filter_complex("[0:v][1:v]xfade=transition=fade:duration=0.5:offset=3.5[v]")
            .map("[v]")
            .video_codec("libx264");

        let args = cmd.build_args();
        let joined = args.join(" ");
        // seek applies to the second input only
        assert!(joined.contains("-i a.ts -ss 2.000 -i b.ts"));
        assert!(joined.contains("-filter_complex"));
        assert!(joined.contains("-map [v]"));
        assert_eq!(cmd.video_codec_value(), Some("libx264"));
    }

    #[test]
    fn test_piped_input_command() {
        let cmd = FfmpegCommand::new("out.mp4")
            .piped_input()
            .input_args(["-f", "image2pipe", "-framerate", "30"])
            .video_codec("libx264")
            .no_audio();

        assert!(cmd.has_piped_input());
        let args = cmd.build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-f image2pipe -framerate 30 -i pipe:0"));
        assert!(joined.contains("-an"));
        // always overwrites and reports progress on stderr
        assert_eq!(args[0], "-y");
        assert!(joined.contains("-progress pipe:2"));
    }

    #[test]
    fn test_progress_parsing() {
        let mut progress = FfmpegProgress::default();

        assert!(parse_progress_line("out_time_ms=5000000", &mut progress).is_none());
        assert_eq!(progress.out_time_ms, 5000);

        parse_progress_line("frame=120", &mut progress);
        assert_eq!(progress.frame, 120);

        parse_progress_line("speed=1.5x", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        let snapshot = parse_progress_line("progress=continue", &mut progress);
        assert!(snapshot.is_some());
        assert!(!snapshot.unwrap().is_complete);

        let snapshot = parse_progress_line("progress=end", &mut progress);
        assert!(snapshot.unwrap().is_complete);
    }

    #[test]
    fn test_codec_copy_helpers() {
        let cmd = FfmpegCommand::new("out.mp4").input("in.ts").codec_copy();
        assert!(cmd.build_args().join(" ").contains("-c copy"));

        let cmd = FfmpegCommand::new("out.mp4")
            .input("in.mp4")
            .video_codec_copy()
            .audio_codec("aac")
            .duration_secs(12.345);
        let joined = cmd.build_args().join(" ");
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-t 12.345"));
    }
}
