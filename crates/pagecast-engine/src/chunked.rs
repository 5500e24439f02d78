//! Parallel chunked rendering.
//!
//! Long outputs split into chunks that render concurrently against
//! pooled pages, land as splice-safe intermediate streams, and compose
//! into one file once every chunk is in. Audio stays off the chunks
//! entirely: each chunk's tracks shift onto the composed timeline and
//! mix in a single pass at the end.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;
use uuid::Uuid;

use pagecast_capture::{DispatchableMedia, PagePool};
use pagecast_media::synthesizer::build_cover_command;
use pagecast_media::{
    build_audio_mux_command, probe, ChunkComposer, FfmpegRunner, ScratchDir, VideoChunk,
    FULL_CAP, VIDEO_PASS_CAP,
};
use pagecast_models::{AudioTrack, OutputFormat, RenderEvent, RenderSpec, Transition};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::EventChannel;
use crate::job::RenderJob;
use crate::logging::RenderLogger;

fn progress_cap(has_audio: bool) -> f64 {
    if has_audio {
        VIDEO_PASS_CAP
    } else {
        FULL_CAP
    }
}

/// One chunk of a chunked render.
pub struct ChunkPlan {
    /// Media elements active during this chunk
    pub media: Vec<Box<dyn DispatchableMedia>>,
    /// Target duration of the chunk (ms)
    pub duration_ms: f64,
    /// Cross-fade into the next chunk
    pub transition: Option<Transition>,
    /// Audio positioned against this chunk's local timeline
    pub audio: Vec<AudioTrack>,
}

/// What a finished chunked render produced.
#[derive(Debug)]
pub struct ComposedOutcome {
    pub output: PathBuf,
    pub duration_ms: f64,
    pub chunks: usize,
}

/// A render job split into independently captured chunks.
pub struct ChunkedRenderJob {
    id: Uuid,
    spec: RenderSpec,
    chunks: Vec<ChunkPlan>,
    output: PathBuf,
    cover: Option<PathBuf>,
    overlay: Option<PathBuf>,
}

impl ChunkedRenderJob {
    pub fn new(spec: RenderSpec, output: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            chunks: Vec::new(),
            output: output.into(),
            cover: None,
            overlay: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn add_chunk(&mut self, chunk: ChunkPlan) {
        self.chunks.push(chunk);
    }

    /// Also extract a cover frame to this path.
    pub fn with_cover(mut self, path: impl Into<PathBuf>) -> Self {
        self.cover = Some(path.into());
        self
    }

    /// Overlay a still image (e.g. a watermark) over the composed video.
    pub fn with_overlay(mut self, image: impl Into<PathBuf>) -> Self {
        self.overlay = Some(image.into());
        self
    }

    /// Render every chunk, compose, and mix audio.
    ///
    /// The barrier is strict: composition starts only after every chunk
    /// has finished, and any chunk failure fails the whole job once the
    /// others have wound down.
    pub async fn run<P>(
        self,
        pool: Arc<P>,
        config: &EngineConfig,
        events: &EventChannel,
    ) -> EngineResult<ComposedOutcome>
    where
        P: PagePool + 'static,
        P::Renderer: 'static,
    {
        config.validate()?;
        if self.chunks.is_empty() {
            return Err(pagecast_media::MediaError::EmptyComposition.into());
        }

        let logger = RenderLogger::new(self.id, "composition");
        logger.log_start(&format!("{} chunks", self.chunks.len()));

        let scratch = ScratchDir::create(&config.work_dir).await?;
        let result = self
            .render_and_compose(pool, config, events, &scratch, &logger)
            .await;
        scratch.cleanup().await;

        match result {
            Ok(outcome) => {
                logger.log_completion(&format!(
                    "{} chunks, {:.0}ms",
                    outcome.chunks, outcome.duration_ms
                ));
                Ok(outcome)
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                events.emit(RenderEvent::error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn render_and_compose<P>(
        self,
        pool: Arc<P>,
        config: &EngineConfig,
        events: &EventChannel,
        scratch: &ScratchDir,
        logger: &RenderLogger,
    ) -> EngineResult<ComposedOutcome>
    where
        P: PagePool + 'static,
        P::Renderer: 'static,
    {
        let total_chunks = self.chunks.len();
        let has_audio = self.chunks.iter().any(|c| !c.audio.is_empty());
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_chunks));
        let mut tasks: JoinSet<EngineResult<(u32, f64)>> = JoinSet::new();

        let mut transitions = vec![None; total_chunks];
        let mut chunk_audio = vec![Vec::new(); total_chunks];

        for (i, mut plan) in self.chunks.into_iter().enumerate() {
            let index = i as u32;
            transitions[i] = plan.transition.take();
            chunk_audio[i] = std::mem::take(&mut plan.audio);

            let pool = pool.clone();
            let config = config.clone();
            let semaphore = semaphore.clone();
            let target = scratch.chunk_stream(index);
            let chunk_spec = intermediate_spec(&self.spec, plan.duration_ms);

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| EngineError::chunk_failed(index, "scheduler shut down"))?;

                // Chunk events stay internal; the outer job reports
                // chunk-level progress instead.
                let (muted, _) = EventChannel::new(1);
                let mut job = RenderJob::new(chunk_spec, target);
                for media in plan.media.drain(..) {
                    job.add_media(media);
                }
                let outcome = job
                    .run(pool.as_ref(), &config, &muted)
                    .await
                    .map_err(|e| EngineError::chunk_failed(index, e.to_string()))?;
                Ok((index, outcome.duration_ms))
            });
        }

        let mut durations = vec![0.0f64; total_chunks];
        let mut first_error = None;
        let mut done = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((index, duration_ms))) => {
                    durations[index as usize] = duration_ms;
                    done += 1;
                    events.emit(RenderEvent::progress(
                        done as f64 / total_chunks as f64 * progress_cap(has_audio),
                        done as u64,
                        total_chunks as u64,
                    ));
                }
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(EngineError::ChunkPanicked(join_err.to_string()));
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let mut composer = ChunkComposer::new();
        if let Some(overlay) = &self.overlay {
            composer.set_overlay(overlay);
        }
        for i in 0..total_chunks {
            let mut chunk = VideoChunk::new(
                i as u32,
                scratch.chunk_stream(i as u32),
                durations[i],
                &self.spec,
            );
            if let Some(t) = transitions[i].take() {
                chunk = chunk.with_transition(t);
            }
            composer.insert(chunk)?;
        }

        // Per-chunk audio moves to where its chunk landed on the
        // composed timeline, overlaps included.
        let pairs: Vec<(f64, Option<f64>)> = durations
            .iter()
            .zip(composer.chunks())
            .map(|(d, c)| (*d, c.transition.as_ref().map(|t| t.duration_ms)))
            .collect();
        let offsets = composed_offsets(&pairs);
        let mut tracks = Vec::new();
        for (i, audio) in chunk_audio.into_iter().enumerate() {
            for mut track in audio {
                track.shift(offsets[i]);
                tracks.push(track);
            }
        }

        let runner = FfmpegRunner::new();
        let compose_target = if tracks.is_empty() {
            self.output.clone()
        } else {
            scratch.premux_video(self.spec.format.extension())
        };
        let duration_ms = composer
            .compose(&runner, scratch, &self.spec, &compose_target)
            .await?;

        if !tracks.is_empty() {
            logger.log_progress("mixing audio timeline");
            let mut with_durations = Vec::with_capacity(tracks.len());
            for track in tracks {
                let source_duration = probe::media_duration_ms(&track.source).await.ok();
                with_durations.push((track, source_duration));
            }
            let cmd = build_audio_mux_command(
                &compose_target,
                &with_durations,
                config.master_volume,
                self.spec.format,
                duration_ms,
                &self.output,
            );
            runner.run(&cmd).await?;
        }

        if let Some(cover) = &self.cover {
            let at_ms = self
                .spec
                .cover_time_ms
                .unwrap_or(duration_ms * pagecast_models::render::DEFAULT_COVER_FRACTION);
            let cmd = build_cover_command(&self.output, at_ms, cover);
            if let Err(e) = runner.run(&cmd).await {
                warn!(error = %e, "Cover extraction failed");
            }
        }

        events.emit(RenderEvent::completed(
            self.output.to_string_lossy(),
            duration_ms,
        ));
        Ok(ComposedOutcome {
            output: self.output,
            duration_ms,
            chunks: total_chunks,
        })
    }
}

/// Spec for one chunk's intermediate stream.
///
/// Chunks land as MPEG-TS no matter what the final container is; TS
/// streams splice through the concat demuxer, and composition
/// re-encodes when the delivery codec differs. A non-H.264 codec
/// override falls back to the container default, which keeps the
/// intermediates uniform across chunks.
pub(crate) fn intermediate_spec(spec: &RenderSpec, duration_ms: f64) -> RenderSpec {
    let mut chunk_spec = spec.clone();
    chunk_spec.duration_ms = duration_ms;
    chunk_spec.cover_time_ms = None;
    chunk_spec.format = OutputFormat::MpegTs;
    if !chunk_spec.format.is_h26x(chunk_spec.video_codec.as_deref()) {
        chunk_spec.video_codec = None;
    }
    chunk_spec
}

/// Composed-timeline start offset of each chunk.
///
/// Each pair is (duration_ms, cross-fade duration into the next chunk).
/// A fade overlaps the next chunk's start, so it pulls every later
/// offset forward.
pub(crate) fn composed_offsets(chunks: &[(f64, Option<f64>)]) -> Vec<f64> {
    let mut offsets = Vec::with_capacity(chunks.len());
    let mut at = 0.0;
    for (duration_ms, transition_ms) in chunks {
        offsets.push(at);
        at += duration_ms - transition_ms.unwrap_or(0.0);
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_without_transitions() {
        let offsets = composed_offsets(&[(2000.0, None), (3000.0, None), (1000.0, None)]);
        assert_eq!(offsets, vec![0.0, 2000.0, 5000.0]);
    }

    #[test]
    fn test_fade_pulls_later_chunks_forward() {
        let offsets = composed_offsets(&[
            (3000.0, Some(500.0)),
            (2000.0, None),
            (2000.0, Some(250.0)),
            (1000.0, None),
        ]);
        assert_eq!(offsets, vec![0.0, 2500.0, 4500.0, 6250.0]);
    }

    #[test]
    fn test_no_chunks_no_offsets() {
        let pairs: Vec<(f64, Option<f64>)> = Vec::new();
        assert!(composed_offsets(&pairs).is_empty());
    }

    #[test]
    fn test_chunk_streams_encode_as_mpegts() {
        use pagecast_media::synthesizer::build_encode_command;
        use std::path::Path;

        let spec = RenderSpec::new(1280, 720, 30, 60_000.0);
        let chunk_spec = intermediate_spec(&spec, 5000.0);
        assert_eq!(chunk_spec.format, OutputFormat::MpegTs);
        assert_eq!(chunk_spec.duration_ms, 5000.0);
        assert!(chunk_spec.cover_time_ms.is_none());

        let joined = build_encode_command(&chunk_spec, Path::new("/work/chunk-0.ts"))
            .build_args()
            .join(" ");
        assert!(joined.contains("-f mpegts"));
        assert!(!joined.contains("-movflags"));
    }

    #[test]
    fn test_intermediate_drops_non_h264_override() {
        let spec = RenderSpec::new(1280, 720, 30, 60_000.0).with_format(OutputFormat::Webm);
        let chunk_spec = intermediate_spec(&spec, 5000.0);
        assert_eq!(chunk_spec.effective_video_codec(), "libx264");

        // a hardware H.264 encoder stays in effect
        let spec = spec.with_video_codec("h264_nvenc");
        let chunk_spec = intermediate_spec(&spec, 5000.0);
        assert_eq!(chunk_spec.effective_video_codec(), "h264_nvenc");
    }
}
