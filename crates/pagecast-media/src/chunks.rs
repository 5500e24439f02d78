//! Chunk composition: ordered splice-safe segments into one video.
//!
//! Chunks arrive in any completion order and are kept sorted by index.
//! Composition takes one of two shapes: a stream-copy concat when no
//! chunk carries a transition and the delivery codec matches the H.264
//! intermediates, or a re-encoding xfade graph where runs of
//! untransitioned chunks are still merged through the concat demuxer
//! so only the transition boundaries pay for a filter input.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use pagecast_models::{ms_to_secs, RenderSpec, Transition};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::{concat_list, format_edge, overlay_edge, xfade_edge};
use crate::scratch::ScratchDir;

/// One rendered segment awaiting composition.
#[derive(Debug, Clone)]
pub struct VideoChunk {
    /// Position in the composed sequence
    pub index: u32,
    /// Splice-safe intermediate stream on disk
    pub path: PathBuf,
    /// Measured duration of this chunk (ms)
    pub duration_ms: f64,
    /// Cross-fade into the next chunk; ignored on the final chunk
    pub transition: Option<Transition>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl VideoChunk {
    pub fn new(index: u32, path: impl Into<PathBuf>, duration_ms: f64, spec: &RenderSpec) -> Self {
        Self {
            index,
            path: path.into(),
            duration_ms,
            transition: None,
            width: spec.width,
            height: spec.height,
            fps: spec.fps,
        }
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = Some(transition);
        self
    }
}

/// A compose command plus the concat list files it expects on disk.
#[derive(Debug)]
pub struct ComposeJob {
    pub command: FfmpegCommand,
    pub lists: Vec<(PathBuf, String)>,
}

impl ComposeJob {
    /// Write the concat list files the command references.
    pub async fn write_lists(&self) -> MediaResult<()> {
        for (path, content) in &self.lists {
            fs::write(path, content).await?;
        }
        Ok(())
    }
}

/// Accumulates chunks and composes them into the final video.
#[derive(Debug, Default)]
pub struct ChunkComposer {
    chunks: Vec<VideoChunk>,
    overlay: Option<PathBuf>,
}

impl ChunkComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay a still image over the whole composed video. Forces the
    /// re-encoding path even when no chunk carries a transition.
    pub fn set_overlay(&mut self, image: impl Into<PathBuf>) {
        self.overlay = Some(image.into());
    }

    /// Insert a chunk at its index position.
    ///
    /// Validation is eager so a bad chunk fails at submission, not at
    /// compose time: the index must be unused and the geometry must
    /// match what the composition already holds.
    pub fn insert(&mut self, chunk: VideoChunk) -> MediaResult<()> {
        if let Some(first) = self.chunks.first() {
            if chunk.width != first.width || chunk.height != first.height {
                return Err(MediaError::chunk_mismatch(
                    chunk.index,
                    format!(
                        "dimensions {}x{} differ from {}x{}",
                        chunk.width, chunk.height, first.width, first.height
                    ),
                ));
            }
            if chunk.fps != first.fps {
                return Err(MediaError::chunk_mismatch(
                    chunk.index,
                    format!("fps {} differs from {}", chunk.fps, first.fps),
                ));
            }
        }

        match self.chunks.binary_search_by_key(&chunk.index, |c| c.index) {
            Ok(_) => Err(MediaError::DuplicateChunkIndex(chunk.index)),
            Err(pos) => {
                self.chunks.insert(pos, chunk);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[VideoChunk] {
        &self.chunks
    }

    /// Total composed duration: chunk durations minus the overlap each
    /// cross-fade consumes.
    pub fn total_duration_ms(&self) -> f64 {
        let mut total: f64 = self.chunks.iter().map(|c| c.duration_ms).sum();
        for chunk in self.chunks.iter().rev().skip(1) {
            if let Some(t) = &chunk.transition {
                total -= t.duration_ms;
            }
        }
        total
    }

    /// Split the sorted chunks into runs; a run ends at a chunk that
    /// fades into its successor.
    fn runs(&self) -> Vec<&[VideoChunk]> {
        let mut runs = Vec::new();
        let mut start = 0;
        for (i, chunk) in self.chunks.iter().enumerate() {
            let last = i == self.chunks.len() - 1;
            if last || chunk.transition.is_some() {
                runs.push(&self.chunks[start..=i]);
                start = i + 1;
            }
        }
        runs
    }

    /// Build the compose command without touching the filesystem.
    ///
    /// `list_dir` is where concat list files will live; the caller (or
    /// [`ComposeJob::write_lists`]) materializes them before running.
    pub fn build_compose(
        &self,
        list_dir: &Path,
        spec: &RenderSpec,
        output: &Path,
    ) -> MediaResult<ComposeJob> {
        if self.chunks.is_empty() {
            return Err(MediaError::EmptyComposition);
        }

        let runs = self.runs();
        let mut lists = Vec::new();

        // No transitions, nothing to overlay, and the delivery codec
        // matches the H.264 intermediates: one stream-copy concat, no
        // re-encode. Anything else goes through the filter path so the
        // output actually carries the requested codec.
        if runs.len() == 1
            && self.overlay.is_none()
            && spec.format.is_h26x(spec.video_codec.as_deref())
        {
            let list_path = list_dir.join("concat.txt");
            let content = concat_list(&self.chunks.iter().map(|c| &c.path).collect::<Vec<_>>());
            lists.push((list_path.clone(), content));

            let command = FfmpegCommand::new(output)
                .input(&list_path)
                .input_args(["-f", "concat", "-safe", "0"])
                .codec_copy();
            return Ok(ComposeJob { command, lists });
        }

        let mut command = FfmpegCommand::new(output);
        for (i, run) in runs.iter().enumerate() {
            if run.len() == 1 {
                command = command.input(&run[0].path);
            } else {
                let list_path = list_dir.join(format!("run-{i}.txt"));
                let content = concat_list(&run.iter().map(|c| &c.path).collect::<Vec<_>>());
                command = command
                    .input(&list_path)
                    .input_args(["-f", "concat", "-safe", "0"]);
                lists.push((list_path, content));
            }
        }

        let mut graph = Vec::new();
        let mut prev_label = "0:v".to_string();
        let mut composed_ms: f64 = runs[0].iter().map(|c| c.duration_ms).sum();

        for (i, run) in runs.iter().enumerate().skip(1) {
            // The fade belongs to the chunk closing the previous run
            let transition = runs[i - 1]
                .last()
                .and_then(|c| c.transition.as_ref())
                .ok_or_else(|| {
                    MediaError::chunk_mismatch(run[0].index, "missing transition before run")
                })?;
            let offset_ms = composed_ms - transition.duration_ms;
            let out_label = format!("v{i}");
            graph.push(xfade_edge(
                &prev_label,
                &format!("{i}:v"),
                &out_label,
                transition,
                ms_to_secs(offset_ms),
            ));
            prev_label = out_label;
            let run_ms: f64 = run.iter().map(|c| c.duration_ms).sum();
            composed_ms = offset_ms + run_ms;
        }

        if let Some(overlay) = &self.overlay {
            let overlay_input = runs.len();
            command = command.input(overlay);
            graph.push(overlay_edge(
                &prev_label,
                &format!("{overlay_input}:v"),
                "vov",
            ));
            prev_label = "vov".to_string();
        }
        graph.push(format_edge(&prev_label, &spec.pixel_format, "vout"));

        command = command
            .filter_complex(graph.join(";"))
            .map("[vout]")
            .video_codec(spec.effective_video_codec())
            .video_bitrate_kbps(spec.effective_bitrate_kbps())
            .no_audio();
        if spec.format.is_h26x(spec.video_codec.as_deref()) {
            command = command
                .video_profile(pagecast_models::render::H26X_PROFILE)
                .preset(pagecast_models::render::H26X_PRESET);
        }

        Ok(ComposeJob { command, lists })
    }

    /// Compose the chunks into `output`.
    pub async fn compose(
        &self,
        runner: &FfmpegRunner,
        scratch: &ScratchDir,
        spec: &RenderSpec,
        output: &Path,
    ) -> MediaResult<f64> {
        let job = self.build_compose(scratch.path(), spec, output)?;
        job.write_lists().await?;
        debug!(chunks = self.chunks.len(), "Composing chunks");
        runner.run(&job.command).await?;

        let duration_ms = self.total_duration_ms();
        info!(
            output = %output.display(),
            chunks = self.chunks.len(),
            duration_ms,
            "Composition completed"
        );
        Ok(duration_ms)
    }
}
