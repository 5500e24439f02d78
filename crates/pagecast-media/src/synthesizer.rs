//! The single-segment encode pipeline.
//!
//! A synthesizer owns one spawned encoder process and a FIFO frame
//! buffer. Frames stream in one at a time, get batched into larger pipe
//! writes, and the encoder runs until the input stream closes. When
//! audio tracks are present a second pass remuxes the mixed timeline
//! onto the finished video; an optional cover frame is extracted last.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pagecast_models::{AudioTrack, Frame, OutputFormat, RenderEvent, RenderSpec};

use crate::audio_mix::build_audio_mux_command;
use crate::command::{EncoderProcess, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe;
use crate::progress::{frame_progress, FULL_CAP, VIDEO_PASS_CAP};
use crate::scratch::ScratchDir;

/// Lifecycle of a synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesizerState {
    Ready,
    Synthesizing,
    Completed,
}

impl SynthesizerState {
    fn name(&self) -> &'static str {
        match self {
            SynthesizerState::Ready => "ready",
            SynthesizerState::Synthesizing => "synthesizing",
            SynthesizerState::Completed => "completed",
        }
    }
}

/// Anything that consumes an ordered frame stream.
///
/// Implemented by [`Synthesizer`]; the capture side only ever holds the
/// trait, which keeps the pump testable without an encoder process.
#[async_trait]
pub trait FrameSink: Send {
    /// Consume the next frame in order.
    async fn input(&mut self, frame: Frame) -> MediaResult<()>;

    /// Flush any buffered remainder and close the stream.
    async fn end_input(&mut self) -> MediaResult<()>;
}

/// Single-producer FIFO batching frames into larger pipe writes.
///
/// Small per-frame writes stall the encoder pipe; batching
/// `batch_frames` frames into one write keeps syscall overhead down.
#[derive(Debug)]
pub struct FrameBuffer {
    bytes: Vec<u8>,
    buffered_frames: usize,
    batch_frames: usize,
}

impl FrameBuffer {
    pub fn new(batch_frames: usize) -> Self {
        Self {
            bytes: Vec::new(),
            buffered_frames: 0,
            batch_frames: batch_frames.max(1),
        }
    }

    /// Append a frame; returns a concatenated byte run once a full
    /// batch has accumulated.
    pub fn push(&mut self, frame: &Frame) -> Option<Vec<u8>> {
        self.bytes.extend_from_slice(frame.data());
        self.buffered_frames += 1;
        if self.buffered_frames >= self.batch_frames {
            self.buffered_frames = 0;
            Some(std::mem::take(&mut self.bytes))
        } else {
            None
        }
    }

    /// Take whatever remains, if anything.
    pub fn drain(&mut self) -> Option<Vec<u8>> {
        if self.bytes.is_empty() {
            None
        } else {
            self.buffered_frames = 0;
            Some(std::mem::take(&mut self.bytes))
        }
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffered_frames
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.buffered_frames = 0;
    }
}

/// Output duration derived from the frames actually captured.
///
/// Capture can legitimately end early (explicit stop), so the originally
/// requested duration is never used for trimming.
pub fn output_duration_ms(captured_frames: u64, fps: u32) -> f64 {
    captured_frames as f64 / fps as f64 * 1000.0
}

/// Build the first-pass encode command: an opaque encoded-image stream
/// on stdin, one output file, codec and bitrate from the spec.
pub fn build_encode_command(spec: &RenderSpec, output: &Path) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(output)
        .piped_input()
        .input_args(["-f", "image2pipe"])
        .input_args(["-framerate", &spec.fps.to_string()])
        .video_codec(spec.effective_video_codec())
        .video_bitrate_kbps(spec.effective_bitrate_kbps())
        .pix_fmt(&spec.pixel_format)
        .no_audio();

    if spec.format.is_h26x(spec.video_codec.as_deref()) {
        // Pinned for predictable hardware-decoder compatibility
        cmd = cmd
            .video_profile(pagecast_models::render::H26X_PROFILE)
            .preset(pagecast_models::render::H26X_PRESET);
    }

    match spec.format {
        // mov/mp4-muxer private option; other muxers reject it
        OutputFormat::Mp4 | OutputFormat::Mov => {
            cmd = cmd.output_args(["-movflags", "+faststart"]);
        }
        // Pinned rather than inferred from the output extension
        OutputFormat::MpegTs => {
            cmd = cmd.output_args(["-f", "mpegts"]);
        }
        OutputFormat::Webm => {}
    }

    cmd
}

/// Build the cover extraction command.
pub fn build_cover_command(video: &Path, at_ms: f64, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input(video)
        .seek(at_ms / 1000.0)
        .single_frame()
}

/// One render job's encode pipeline.
pub struct Synthesizer {
    spec: RenderSpec,
    output: PathBuf,
    work_dir: PathBuf,
    state: SynthesizerState,
    buffer: FrameBuffer,
    encoder: Option<EncoderProcess>,
    scratch: Option<ScratchDir>,
    captured_frames: u64,
    audio_tracks: Vec<AudioTrack>,
    master_volume: u8,
    cover_output: Option<PathBuf>,
    events: Option<mpsc::Sender<RenderEvent>>,
    last_reported_percent: i64,
}

impl Synthesizer {
    pub fn new(spec: RenderSpec, output: impl AsRef<Path>) -> Self {
        let buffer = FrameBuffer::new(spec.parallel_write_frames);
        Self {
            spec,
            output: output.as_ref().to_path_buf(),
            work_dir: std::env::temp_dir(),
            state: SynthesizerState::Ready,
            buffer,
            encoder: None,
            scratch: None,
            captured_frames: 0,
            audio_tracks: Vec::new(),
            master_volume: 100,
            cover_output: None,
            events: None,
            last_reported_percent: -1,
        }
    }

    /// Directory for scratch files (pre-mux swap, cover).
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Emit render events on this channel.
    pub fn with_events(mut self, events: mpsc::Sender<RenderEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Master volume applied to every audio track (0-100).
    pub fn with_master_volume(mut self, volume: u8) -> Self {
        self.master_volume = volume;
        self
    }

    /// Also extract a cover frame to this path after encoding.
    pub fn with_cover(mut self, path: impl Into<PathBuf>) -> Self {
        self.cover_output = Some(path.into());
        self
    }

    pub fn state(&self) -> SynthesizerState {
        self.state
    }

    pub fn spec(&self) -> &RenderSpec {
        &self.spec
    }

    pub fn captured_frames(&self) -> u64 {
        self.captured_frames
    }

    /// Duration of the output derived from actually captured frames.
    pub fn output_duration_ms(&self) -> f64 {
        output_duration_ms(self.captured_frames, self.spec.fps)
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_tracks.is_empty()
    }

    /// Add an audio track to the job's timeline.
    pub async fn add_audio(&mut self, track: AudioTrack) {
        self.audio_tracks.push(track);
        self.emit(RenderEvent::AudioAdded).await;
    }

    /// Replace an existing audio track.
    pub async fn update_audio(&mut self, index: usize, track: AudioTrack) -> MediaResult<()> {
        let slot = self.audio_tracks.get_mut(index).ok_or_else(|| {
            MediaError::ffmpeg_failed(format!("no audio track at index {index}"), None, None)
        })?;
        *slot = track;
        self.emit(RenderEvent::AudioUpdated).await;
        Ok(())
    }

    /// Audio tracks currently on the timeline.
    pub fn audio_tracks(&self) -> &[AudioTrack] {
        &self.audio_tracks
    }

    fn expect_state(&self, expected: SynthesizerState) -> MediaResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MediaError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    /// Spawn the encoder process. Ready → Synthesizing.
    pub async fn start(&mut self) -> MediaResult<()> {
        self.expect_state(SynthesizerState::Ready)?;
        self.spec.validate()?;

        // With an audio pass pending, the video pass writes to a swap
        // file; the mux pass produces the real output.
        let target = if self.has_audio() {
            let scratch = ScratchDir::create(&self.work_dir).await?;
            let premux = scratch.premux_video(self.spec.format.extension());
            self.scratch = Some(scratch);
            premux
        } else {
            self.output.clone()
        };

        let cmd = build_encode_command(&self.spec, &target);
        self.encoder = Some(EncoderProcess::spawn(&cmd, |_| {})?);
        self.state = SynthesizerState::Synthesizing;
        info!(
            output = %self.output.display(),
            codec = self.spec.effective_video_codec(),
            bitrate_kbps = self.spec.effective_bitrate_kbps(),
            "Synthesis started"
        );
        Ok(())
    }

    async fn report_progress(&mut self) {
        let cap = if self.has_audio() {
            VIDEO_PASS_CAP
        } else {
            FULL_CAP
        };
        let total = self.spec.frame_count();
        let percent = frame_progress(self.captured_frames, total, cap);
        if percent as i64 != self.last_reported_percent {
            self.last_reported_percent = percent as i64;
            self.emit(RenderEvent::progress(percent, self.captured_frames, total))
                .await;
        }
    }

    async fn emit(&self, event: RenderEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver is not this pipeline's problem
            let _ = events.send(event).await;
        }
    }

    /// Run the audio pass, then the cover pass, and finalize.
    /// Synthesizing → Completed.
    pub async fn finish(&mut self) -> MediaResult<PathBuf> {
        self.expect_state(SynthesizerState::Synthesizing)?;

        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("encoder not running", None, None))?;
        encoder.wait().await?;

        let duration_ms = self.output_duration_ms();

        if self.has_audio() {
            let scratch = self
                .scratch
                .as_ref()
                .ok_or_else(|| MediaError::ffmpeg_failed("missing scratch dir", None, None))?;
            let premux = scratch.premux_video(self.spec.format.extension());

            // Source durations bound fade-out anchors for short sources
            let mut tracks = Vec::with_capacity(self.audio_tracks.len());
            for track in &self.audio_tracks {
                let source_duration = probe::media_duration_ms(&track.source).await.ok();
                tracks.push((track.clone(), source_duration));
            }

            let cmd = build_audio_mux_command(
                &premux,
                &tracks,
                self.master_volume,
                self.spec.format,
                duration_ms,
                &self.output,
            );
            debug!("Running audio mux pass");
            FfmpegRunner::new().run(&cmd).await?;
            self.emit(RenderEvent::progress(
                100.0,
                self.captured_frames,
                self.spec.frame_count(),
            ))
            .await;
        }

        if let Some(cover) = self.cover_output.clone() {
            let at_ms = self
                .spec
                .cover_time_ms
                .unwrap_or(duration_ms * pagecast_models::render::DEFAULT_COVER_FRACTION);
            let cmd = build_cover_command(&self.output, at_ms, &cover);
            if let Err(e) = FfmpegRunner::new().run(&cmd).await {
                // Cover extraction failing does not invalidate the render
                warn!(error = %e, "Cover extraction failed");
            }
        }

        if let Some(scratch) = self.scratch.take() {
            scratch.cleanup().await;
        }

        self.state = SynthesizerState::Completed;
        self.emit(RenderEvent::completed(
            self.output.to_string_lossy(),
            duration_ms,
        ))
        .await;
        info!(
            output = %self.output.display(),
            duration_ms,
            frames = self.captured_frames,
            "Synthesis completed"
        );
        Ok(self.output.clone())
    }

    /// Force-close the encoder and return to Ready. Idempotent; used
    /// for cancellation, so nothing waits for a graceful encoder exit.
    pub async fn abort(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.kill().await;
        }
        if let Some(scratch) = self.scratch.take() {
            scratch.cleanup().await;
        }
        self.buffer.clear();
        self.captured_frames = 0;
        self.last_reported_percent = -1;
        self.state = SynthesizerState::Ready;
    }

    /// Alias for [`Synthesizer::abort`], matching the reset-after-use
    /// lifecycle of a pooled synthesizer.
    pub async fn reset(&mut self) {
        self.abort().await;
    }
}

#[async_trait]
impl FrameSink for Synthesizer {
    async fn input(&mut self, frame: Frame) -> MediaResult<()> {
        self.expect_state(SynthesizerState::Synthesizing)?;
        self.captured_frames += 1;

        if let Some(batch) = self.buffer.push(&frame) {
            let encoder = self
                .encoder
                .as_mut()
                .ok_or_else(|| MediaError::ffmpeg_failed("encoder not running", None, None))?;
            encoder.write_batch(&batch).await?;
        }

        self.report_progress().await;
        Ok(())
    }

    async fn end_input(&mut self) -> MediaResult<()> {
        self.expect_state(SynthesizerState::Synthesizing)?;
        let remainder = self.buffer.drain();
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| MediaError::ffmpeg_failed("encoder not running", None, None))?;
        if let Some(batch) = remainder {
            encoder.write_batch(&batch).await?;
        }
        encoder.end_input().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagecast_models::OutputFormat;

    #[test]
    fn test_frame_buffer_batches() {
        let mut buffer = FrameBuffer::new(3);
        assert!(buffer.push(&Frame::new(vec![1])).is_none());
        assert!(buffer.push(&Frame::new(vec![2, 2])).is_none());
        assert_eq!(buffer.buffered_frames(), 2);

        let batch = buffer.push(&Frame::new(vec![3])).expect("full batch");
        assert_eq!(batch, vec![1, 2, 2, 3]);
        assert_eq!(buffer.buffered_frames(), 0);

        assert!(buffer.push(&Frame::new(vec![4])).is_none());
        assert_eq!(buffer.drain().unwrap(), vec![4]);
        assert!(buffer.drain().is_none());
    }

    #[test]
    fn test_output_duration_from_captured_frames() {
        assert_eq!(output_duration_ms(60, 30), 2000.0);
        // an early stop yields a shorter output, not the requested one
        assert_eq!(output_duration_ms(45, 30), 1500.0);
        assert_eq!(output_duration_ms(0, 30), 0.0);
    }

    #[test]
    fn test_encode_command_mp4() {
        let spec = RenderSpec::new(1280, 720, 30, 2000.0).with_quality(100);
        let args = build_encode_command(&spec, Path::new("/tmp/out.mp4")).build_args();
        let joined = args.join(" ");

        assert!(joined.contains("-f image2pipe -framerate 30 -i pipe:0"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-b:v 2560k"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert!(joined.contains("-profile:v main"));
        assert!(joined.contains("-preset medium"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(joined.contains("-an"));
    }

    #[test]
    fn test_encode_command_webm_skips_h26x_pins() {
        let spec = RenderSpec::new(640, 360, 25, 1000.0).with_format(OutputFormat::Webm);
        let joined = build_encode_command(&spec, Path::new("/tmp/out.webm"))
            .build_args()
            .join(" ");

        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(!joined.contains("-profile:v"));
        assert!(!joined.contains("-preset"));
        assert!(!joined.contains("-movflags"));
    }

    #[test]
    fn test_encode_command_mpegts_pins_container() {
        let spec = RenderSpec::new(1280, 720, 30, 2000.0).with_format(OutputFormat::MpegTs);
        let joined = build_encode_command(&spec, Path::new("/work/chunk-0.ts"))
            .build_args()
            .join(" ");

        assert!(joined.contains("-f mpegts"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-profile:v main"));
        // the faststart flag belongs to the mov/mp4 muxer only
        assert!(!joined.contains("-movflags"));
    }

    #[test]
    fn test_cover_command() {
        let joined = build_cover_command(Path::new("/tmp/out.mp4"), 400.0, Path::new("/tmp/c.jpg"))
            .build_args()
            .join(" ");
        assert!(joined.contains("-ss 0.400 -i /tmp/out.mp4"));
        assert!(joined.contains("-vframes 1"));
    }

    #[tokio::test]
    async fn test_input_requires_start() {
        let spec = RenderSpec::new(640, 360, 30, 1000.0);
        let mut synth = Synthesizer::new(spec, "/tmp/out.mp4");

        let err = synth.input(Frame::new(vec![0])).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidState { .. }));
        assert_eq!(synth.state(), SynthesizerState::Ready);
    }

    #[tokio::test]
    async fn test_abort_from_ready_is_a_noop() {
        let spec = RenderSpec::new(640, 360, 30, 1000.0);
        let mut synth = Synthesizer::new(spec, "/tmp/out.mp4");

        synth.abort().await;
        synth.reset().await;
        assert_eq!(synth.state(), SynthesizerState::Ready);
        assert_eq!(synth.captured_frames(), 0);
    }

    #[tokio::test]
    async fn test_audio_events() {
        let spec = RenderSpec::new(640, 360, 30, 1000.0);
        let (tx, mut rx) = mpsc::channel(8);
        let mut synth = Synthesizer::new(spec, "/tmp/out.mp4").with_events(tx);

        synth.add_audio(AudioTrack::new("a.mp3", 0.0, 1000.0)).await;
        assert!(matches!(rx.recv().await, Some(RenderEvent::AudioAdded)));

        let mut updated = AudioTrack::new("a.mp3", 0.0, 1000.0);
        updated.volume = 40;
        synth.update_audio(0, updated).await.unwrap();
        assert!(matches!(rx.recv().await, Some(RenderEvent::AudioUpdated)));

        assert!(synth.update_audio(5, AudioTrack::new("b", 0.0, 1.0)).await.is_err());
        assert!(synth.has_audio());
    }
}
