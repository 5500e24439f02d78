//! One render job: acquire a page, capture, encode, release.

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

use pagecast_capture::{
    CaptureSession, CaptureStats, DispatchableMedia, FrameCaptureBridge, PagePool, PageRenderer,
    PageState, SessionController, SessionSpec,
};
use pagecast_media::{FrameSink, MediaResult, Synthesizer};
use pagecast_models::{AudioTrack, Frame, RenderEvent, RenderSpec};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::events::EventChannel;
use crate::logging::RenderLogger;

/// What a finished job produced.
#[derive(Debug)]
pub struct RenderOutcome {
    pub output: PathBuf,
    /// Measured from frames actually captured, not the requested span
    pub duration_ms: f64,
    pub stats: CaptureStats,
}

/// A single page-to-video render.
pub struct RenderJob {
    id: Uuid,
    spec: RenderSpec,
    output: PathBuf,
    media: Vec<Box<dyn DispatchableMedia>>,
    audio: Vec<AudioTrack>,
    cover: Option<PathBuf>,
    controller_tx: Option<oneshot::Sender<SessionController>>,
}

impl RenderJob {
    pub fn new(spec: RenderSpec, output: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            output: output.into(),
            media: Vec::new(),
            audio: Vec::new(),
            cover: None,
            controller_tx: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register a media element found on the page.
    pub fn add_media(&mut self, media: Box<dyn DispatchableMedia>) {
        self.media.push(media);
    }

    /// Add an audio track to the output timeline.
    pub fn add_audio(&mut self, track: AudioTrack) {
        self.audio.push(track);
    }

    /// Also extract a cover frame to this path.
    pub fn with_cover(mut self, path: impl Into<PathBuf>) -> Self {
        self.cover = Some(path.into());
        self
    }

    /// Obtain the session controller once the job starts running.
    ///
    /// Pause, resume, and stop act between frames; the handle arrives
    /// before the first frame is captured.
    pub fn controller(&mut self) -> oneshot::Receiver<SessionController> {
        let (tx, rx) = oneshot::channel();
        self.controller_tx = Some(tx);
        rx
    }

    /// Run the job to completion.
    pub async fn run<P: PagePool>(
        mut self,
        pool: &P,
        config: &EngineConfig,
        events: &EventChannel,
    ) -> EngineResult<RenderOutcome> {
        config.validate()?;
        metrics::counter!("pagecast_render_jobs_total").increment(1);
        let logger = RenderLogger::new(self.id, "render");
        logger.log_start(&format!(
            "{}x{} {}fps -> {}",
            self.spec.width,
            self.spec.height,
            self.spec.fps,
            self.output.display()
        ));

        let renderer = pool.acquire().await?;
        let mut bridge =
            FrameCaptureBridge::new(renderer).with_frame_timeout(config.frame_timeout);

        let result = self.drive(&mut bridge, config, events).await;

        // Unhealthy pages are closed before going back; under pool
        // saturation the page is closed too so the heavy resource frees
        // up instead of idling in the pool.
        let reusable = matches!(bridge.state(), PageState::Ready) && !pool.is_saturated();
        let mut renderer = bridge.into_renderer();
        if !reusable {
            renderer.close().await;
        }
        pool.release(renderer).await;

        match result {
            Ok(outcome) => {
                logger.log_completion(&format!(
                    "{} frames, {:.0}ms",
                    outcome.stats.frames_emitted, outcome.duration_ms
                ));
                Ok(outcome)
            }
            Err(e) => {
                metrics::counter!("pagecast_render_failures_total").increment(1);
                logger.log_error(&e.to_string());
                events.emit(RenderEvent::error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn drive<R: PageRenderer>(
        &mut self,
        bridge: &mut FrameCaptureBridge<R>,
        config: &EngineConfig,
        events: &EventChannel,
    ) -> EngineResult<RenderOutcome> {
        bridge
            .configure(self.spec.width, self.spec.height, self.spec.fps)
            .await?;

        let session_spec = SessionSpec::from_duration(self.spec.fps, self.spec.duration_ms);
        let (mut session, controller) = CaptureSession::new(session_spec);
        if let Some(tx) = self.controller_tx.take() {
            let _ = tx.send(controller);
        }
        for media in self.media.drain(..) {
            session.add_media(media);
        }

        let mut synth = Synthesizer::new(self.spec.clone(), &self.output)
            .with_work_dir(&config.work_dir)
            .with_events(events.sender())
            .with_master_volume(config.master_volume);
        if let Some(cover) = &self.cover {
            synth = synth.with_cover(cover);
        }
        for track in self.audio.drain(..) {
            synth.add_audio(track).await;
        }
        synth.start().await?;

        let (frame_tx, mut frame_rx) = mpsc::channel(config.frame_channel_capacity);
        let (capture_result, pump_result) = tokio::join!(
            session.run(bridge, frame_tx),
            pump_frames(&mut frame_rx, &mut synth),
        );

        match (capture_result, pump_result) {
            (Ok(stats), Ok(_)) => {
                synth.end_input().await?;
                let output = synth.finish().await?;
                Ok(RenderOutcome {
                    output,
                    duration_ms: synth.output_duration_ms(),
                    stats,
                })
            }
            // An encoder failure closes the frame channel, which the
            // capture loop then reports too; the pump error is the root
            // cause either way.
            (_, Err(pump_err)) => {
                synth.abort().await;
                Err(pump_err.into())
            }
            (Err(capture_err), Ok(_)) => {
                synth.abort().await;
                Err(capture_err.into())
            }
        }
    }
}

/// Feed captured frames into a sink, in capture order.
///
/// On a sink failure the channel is closed and drained so the capture
/// loop never blocks against a dead encoder.
pub(crate) async fn pump_frames<S: FrameSink>(
    rx: &mut mpsc::Receiver<Frame>,
    sink: &mut S,
) -> MediaResult<u64> {
    let mut frames = 0u64;
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.input(frame).await {
            warn!(error = %e, "Frame sink failed, draining capture channel");
            rx.close();
            while rx.recv().await.is_some() {}
            return Err(e);
        }
        frames += 1;
    }
    Ok(frames)
}
