//! The virtual-clock capture scheduler.
//!
//! A single task drives the whole session: one frame's media fan-out
//! and capture fully resolve before the next frame begins, pause
//! suspends only between frames, and the clock advances in fixed steps
//! regardless of how long any frame took in wall time. The loop is an
//! explicit state machine, not a self-rescheduling callback chain.

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use pagecast_models::time::frame_count;
use pagecast_models::Frame;

use crate::bridge::{CapturedFrame, FrameCaptureBridge, PageRenderer};
use crate::clock::{VirtualClock, VirtualTimers};
use crate::error::{CaptureError, CaptureResult};
use crate::media::DispatchableMedia;

/// Target of one capture session.
///
/// The frame count is authoritative. A duration is converted exactly
/// once, at construction; after that the session never consults it for
/// termination.
#[derive(Debug, Clone, Copy)]
pub struct SessionSpec {
    pub fps: u32,
    pub frame_count: u64,
    /// Advisory only; kept for media-window clamping and logs
    pub duration_ms: f64,
}

impl SessionSpec {
    /// Build a spec from a target duration.
    pub fn from_duration(fps: u32, duration_ms: f64) -> Self {
        Self {
            fps,
            frame_count: frame_count(fps, duration_ms),
            duration_ms,
        }
    }

    /// Build a spec from an explicit frame count.
    pub fn from_frame_count(fps: u32, frames: u64) -> Self {
        Self {
            fps,
            frame_count: frames,
            duration_ms: frames as f64 * 1000.0 / fps as f64,
        }
    }
}

/// Handle for pausing, resuming, and stopping a running session.
#[derive(Debug, Clone)]
pub struct SessionController {
    pause_tx: std::sync::Arc<watch::Sender<bool>>,
    stop_tx: std::sync::Arc<watch::Sender<bool>>,
}

impl SessionController {
    /// Suspend the loop at its next between-frames suspension point.
    /// No frames are dropped or skipped.
    pub fn pause(&self) {
        let _ = self.pause_tx.send(true);
    }

    /// Resume a paused session.
    pub fn resume(&self) {
        let _ = self.pause_tx.send(false);
    }

    /// Request an early, orderly stop. The session ends after the
    /// current frame; output duration then derives from the frames
    /// actually captured.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Counters for a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Capture attempts issued (frames + no-change results)
    pub attempts: u64,
    /// Frames actually emitted downstream
    pub frames_emitted: u64,
    /// Attempts that legitimately produced no image
    pub no_change: u64,
    /// Whether the session ended on an explicit stop
    pub stopped: bool,
}

/// One frame-accurate capture run over a page.
///
/// Owns the virtual clock and the ordered media list; both are mutated
/// only by [`CaptureSession::run`], which is non-reentrant by
/// construction (it borrows the session mutably for its whole life).
pub struct CaptureSession {
    spec: SessionSpec,
    clock: VirtualClock,
    timers: VirtualTimers,
    media: Vec<Box<dyn DispatchableMedia>>,
    pause_rx: watch::Receiver<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl CaptureSession {
    pub fn new(spec: SessionSpec) -> (Self, SessionController) {
        let (pause_tx, pause_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = watch::channel(false);
        (
            Self {
                spec,
                clock: VirtualClock::new(spec.fps),
                timers: VirtualTimers::new(),
                media: Vec::new(),
                pause_rx,
                stop_rx,
            },
            SessionController {
                pause_tx: std::sync::Arc::new(pause_tx),
                stop_tx: std::sync::Arc::new(stop_tx),
            },
        )
    }

    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    /// Register a media element discovered on the page.
    pub fn add_media(&mut self, media: Box<dyn DispatchableMedia>) {
        self.media.push(media);
    }

    /// Timers scheduled against this session's virtual clock.
    pub fn timers_mut(&mut self) -> &mut VirtualTimers {
        &mut self.timers
    }

    /// Drive the session to completion.
    ///
    /// The bridge must be in the Ready state; the session attaches it,
    /// produces exactly `frame_count` capture attempts (unless stopped
    /// early), and detaches it again so the page can be reused.
    ///
    /// Emitted frames flow through `frame_tx`; a full channel blocks
    /// the loop until the consumer catches up.
    pub async fn run<R: PageRenderer>(
        &mut self,
        bridge: &mut FrameCaptureBridge<R>,
        frame_tx: mpsc::Sender<Frame>,
    ) -> CaptureResult<CaptureStats> {
        bridge.begin_capture().await?;

        let mut stats = CaptureStats::default();
        info!(
            fps = self.spec.fps,
            frames = self.spec.frame_count,
            media = self.media.len(),
            "Capture session started"
        );

        let result = self.run_loop(bridge, &frame_tx, &mut stats).await;

        // Detach regardless of how the loop ended; a page that went
        // unavailable rejects the stop, which is fine.
        if let Err(e) = bridge.stop().await {
            debug!(error = %e, "Bridge stop after session end failed");
        }

        // Destroy anything still alive so adapters release decoders.
        for media in self.media.iter_mut() {
            media.destroy().await;
        }
        self.media.clear();

        match result {
            Ok(()) => {
                info!(
                    attempts = stats.attempts,
                    emitted = stats.frames_emitted,
                    no_change = stats.no_change,
                    stopped = stats.stopped,
                    wall_ms = self.clock.wall_elapsed().as_millis() as u64,
                    "Capture session finished"
                );
                Ok(stats)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_loop<R: PageRenderer>(
        &mut self,
        bridge: &mut FrameCaptureBridge<R>,
        frame_tx: &mpsc::Sender<Frame>,
        stats: &mut CaptureStats,
    ) -> CaptureResult<()> {
        if self.spec.frame_count == 0 {
            return Ok(());
        }

        loop {
            if *self.stop_rx.borrow() {
                stats.stopped = true;
                return Ok(());
            }

            // 1. Bring every eligible element to the current virtual
            //    time before anything is captured.
            self.dispatch_media().await;

            // 2. Advance the clock and fire due virtual timers.
            let now = self.clock.advance();
            self.timers.fire_due(now);

            // 3. Capture. A failure here is fatal to the session.
            stats.attempts += 1;
            match bridge.capture_frame().await? {
                CapturedFrame::Image(frame) => {
                    stats.frames_emitted += 1;
                    frame_tx
                        .send(frame)
                        .await
                        .map_err(|_| CaptureError::ChannelClosed)?;
                }
                CapturedFrame::NoChange => {
                    stats.no_change += 1;
                }
            }

            // 4. Suspension point: pause holds the loop between frames.
            self.wait_while_paused(bridge).await?;

            // 5. Terminal once the configured frame count is reached.
            if self.clock.frame_index() >= self.spec.frame_count {
                return Ok(());
            }
        }
    }

    /// Destroy expired elements, load or seek the rest. Seeks fan out
    /// concurrently and all resolve before this returns, so no
    /// partially-updated frame can be captured.
    async fn dispatch_media(&mut self) {
        let t = self.clock.current_ms();

        // Expired elements leave the list for good; they are never
        // re-created.
        let mut survivors = Vec::with_capacity(self.media.len());
        for mut media in self.media.drain(..) {
            if media.can_destroy(t) {
                media.destroy().await;
            } else {
                survivors.push(media);
            }
        }
        self.media = survivors;

        let dispatches = self
            .media
            .iter_mut()
            .enumerate()
            .filter(|(_, m)| m.can_play(t))
            .map(|(idx, media)| async move {
                if !media.is_ready() {
                    // Loaded this frame; first seek happens next frame.
                    // A failed load skips this frame for this element
                    // only; the adapter already retried internally.
                    let _ = media.load().await;
                    None
                } else {
                    let local = media.window().local_time(t);
                    match media.seek(local).await {
                        Ok(()) => None,
                        Err(e) => Some((idx, e)),
                    }
                }
            });

        let failures: Vec<(usize, CaptureError)> =
            join_all(dispatches).await.into_iter().flatten().collect();

        // A failing adapter is dropped, not the frame: remove highest
        // index first so earlier indices stay valid.
        for (idx, error) in failures.into_iter().rev() {
            let mut media = self.media.remove(idx);
            warn!(media_id = %media.id(), error = %error, "Media seek failed, dropping element");
            media.destroy().await;
        }
    }

    async fn wait_while_paused<R: PageRenderer>(
        &mut self,
        bridge: &mut FrameCaptureBridge<R>,
    ) -> CaptureResult<()> {
        if !*self.pause_rx.borrow() {
            return Ok(());
        }

        bridge.pause()?;
        debug!("Capture session paused");
        loop {
            if self.pause_rx.changed().await.is_err() {
                // Controller dropped while paused: treat as resume.
                break;
            }
            if !*self.pause_rx.borrow() {
                break;
            }
        }
        bridge.resume()?;
        debug!("Capture session resumed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::media::{MediaDriver, MediaWindow, SvgAnimation};

    /// Renderer that always produces a one-byte frame, counting calls.
    struct CountingRenderer {
        renders: Arc<AtomicU64>,
        no_change_every: Option<u64>,
        fail_at: Option<u64>,
    }

    impl CountingRenderer {
        fn new() -> (Self, Arc<AtomicU64>) {
            let renders = Arc::new(AtomicU64::new(0));
            (
                Self {
                    renders: renders.clone(),
                    no_change_every: None,
                    fail_at: None,
                },
                renders,
            )
        }
    }

    #[async_trait]
    impl PageRenderer for CountingRenderer {
        async fn attach(&mut self) -> CaptureResult<()> {
            Ok(())
        }
        async fn detach(&mut self) -> CaptureResult<()> {
            Ok(())
        }
        async fn set_viewport(&mut self, _w: u32, _h: u32) -> CaptureResult<()> {
            Ok(())
        }
        async fn configure_clock(&mut self, _fps: u32) -> CaptureResult<()> {
            Ok(())
        }
        async fn evaluate(&mut self, _script: &str) -> CaptureResult<()> {
            Ok(())
        }
        async fn render_frame(&mut self) -> CaptureResult<Option<Frame>> {
            let n = self.renders.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(n) == self.fail_at {
                return Err(CaptureError::protocol("page crashed"));
            }
            if let Some(every) = self.no_change_every {
                if n % every == 0 {
                    return Ok(None);
                }
            }
            Ok(Some(Frame::new(vec![0u8])))
        }
        async fn close(&mut self) {}
    }

    /// Driver that records every seek time it was given.
    struct SeekLog {
        times: Arc<Mutex<Vec<f64>>>,
    }

    #[async_trait]
    impl MediaDriver for SeekLog {
        async fn prepare(&mut self) -> CaptureResult<()> {
            Ok(())
        }
        async fn seek_to(&mut self, local_ms: f64) -> CaptureResult<()> {
            self.times.lock().unwrap().push(local_ms);
            Ok(())
        }
        async fn teardown(&mut self) {}
    }

    async fn ready_bridge(
        renderer: CountingRenderer,
        fps: u32,
    ) -> FrameCaptureBridge<CountingRenderer> {
        let mut bridge = FrameCaptureBridge::new(renderer);
        bridge.configure(640, 360, fps).await.unwrap();
        bridge
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> u64 {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[tokio::test]
    async fn test_completed_session_attempts_exactly_frame_count() {
        // fps=30, duration=2000ms -> 60 frames
        let (renderer, renders) = CountingRenderer::new();
        let mut bridge = ready_bridge(renderer, 30).await;
        let (mut session, _ctl) = CaptureSession::new(SessionSpec::from_duration(30, 2000.0));
        let (tx, mut rx) = mpsc::channel(128);

        let stats = session.run(&mut bridge, tx).await.unwrap();
        assert_eq!(stats.attempts, 60);
        assert_eq!(stats.frames_emitted, 60);
        assert_eq!(renders.load(Ordering::SeqCst), 60);
        assert_eq!(drain(&mut rx), 60);
        assert!(!stats.stopped);
    }

    #[tokio::test]
    async fn test_no_change_counts_as_attempt_without_frame() {
        let (mut renderer, _) = CountingRenderer::new();
        renderer.no_change_every = Some(3);
        let mut bridge = ready_bridge(renderer, 30).await;
        let (mut session, _ctl) = CaptureSession::new(SessionSpec::from_frame_count(30, 30));
        let (tx, mut rx) = mpsc::channel(64);

        let stats = session.run(&mut bridge, tx).await.unwrap();
        assert_eq!(stats.attempts, 30);
        assert_eq!(stats.no_change, 10);
        assert_eq!(stats.frames_emitted, 20);
        assert_eq!(drain(&mut rx), 20);
    }

    #[tokio::test]
    async fn test_media_sees_step_exact_virtual_times() {
        let times = Arc::new(Mutex::new(Vec::new()));
        let (renderer, _) = CountingRenderer::new();
        let mut bridge = ready_bridge(renderer, 25).await;

        let spec = SessionSpec::from_frame_count(25, 5);
        let (mut session, _ctl) = CaptureSession::new(spec);
        session.add_media(Box::new(SvgAnimation::new(
            "svg",
            MediaWindow::clamped(0.0, 10_000.0, 10_000.0),
            Box::new(SeekLog {
                times: times.clone(),
            }),
        )));
        let (tx, _rx) = mpsc::channel(64);
        session.run(&mut bridge, tx).await.unwrap();

        // Frame 0 loads; seeks start at frame 1 with t = 40ms steps
        let seen = times.lock().unwrap().clone();
        assert_eq!(seen, vec![40.0, 80.0, 120.0, 160.0]);
    }

    #[tokio::test]
    async fn test_expired_media_is_destroyed_and_dropped() {
        let times = Arc::new(Mutex::new(Vec::new()));
        let (renderer, _) = CountingRenderer::new();
        let mut bridge = ready_bridge(renderer, 25).await;

        // Window closes at 80ms; 10 frames span 0..400ms
        let (mut session, _ctl) = CaptureSession::new(SessionSpec::from_frame_count(25, 10));
        session.add_media(Box::new(SvgAnimation::new(
            "short",
            MediaWindow::clamped(0.0, 80.0, 400.0),
            Box::new(SeekLog {
                times: times.clone(),
            }),
        )));
        let (tx, _rx) = mpsc::channel(64);
        let stats = session.run(&mut bridge, tx).await.unwrap();

        assert_eq!(stats.attempts, 10);
        // Loaded at t=0, seeked at t=40 only; destroyed once t>=80
        assert_eq!(times.lock().unwrap().clone(), vec![40.0]);
    }

    #[tokio::test]
    async fn test_capture_failure_terminates_session() {
        let (mut renderer, _) = CountingRenderer::new();
        renderer.fail_at = Some(4);
        let mut bridge = ready_bridge(renderer, 30).await;
        let (mut session, _ctl) = CaptureSession::new(SessionSpec::from_frame_count(30, 60));
        let (tx, mut rx) = mpsc::channel(64);

        let err = session.run(&mut bridge, tx).await.unwrap_err();
        assert!(matches!(err, CaptureError::Protocol(_)));
        assert_eq!(drain(&mut rx), 3);
    }

    #[tokio::test]
    async fn test_failing_adapter_is_dropped_not_the_frame() {
        struct FailingSeek;
        #[async_trait]
        impl MediaDriver for FailingSeek {
            async fn prepare(&mut self) -> CaptureResult<()> {
                Ok(())
            }
            async fn seek_to(&mut self, _: f64) -> CaptureResult<()> {
                Err(CaptureError::protocol("decode error"))
            }
            async fn teardown(&mut self) {}
        }

        let (renderer, _) = CountingRenderer::new();
        let mut bridge = ready_bridge(renderer, 30).await;
        let (mut session, _ctl) = CaptureSession::new(SessionSpec::from_frame_count(30, 10));
        session.add_media(Box::new(SvgAnimation::new(
            "bad",
            MediaWindow::clamped(0.0, 1000.0, 1000.0),
            Box::new(FailingSeek),
        )));
        let (tx, mut rx) = mpsc::channel(64);

        let stats = session.run(&mut bridge, tx).await.unwrap();
        // All frames still captured despite the bad element
        assert_eq!(stats.attempts, 10);
        assert_eq!(drain(&mut rx), 10);
    }

    #[tokio::test]
    async fn test_stop_ends_session_early() {
        let (renderer, _) = CountingRenderer::new();
        let mut bridge = ready_bridge(renderer, 30).await;
        let (mut session, ctl) = CaptureSession::new(SessionSpec::from_frame_count(30, 100_000));
        let (tx, mut rx) = mpsc::channel(8);

        ctl.stop();
        let handle = tokio::spawn(async move {
            let stats = session.run(&mut bridge, tx).await.unwrap();
            stats
        });
        let stats = handle.await.unwrap();
        assert!(stats.stopped);
        assert_eq!(stats.attempts, 0);
        assert_eq!(drain(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_pause_suspends_between_frames() {
        let (renderer, renders) = CountingRenderer::new();
        let mut bridge = ready_bridge(renderer, 30).await;
        let (mut session, ctl) = CaptureSession::new(SessionSpec::from_frame_count(30, 5));
        let (tx, mut rx) = mpsc::channel(64);

        ctl.pause();
        let handle = tokio::spawn(async move { session.run(&mut bridge, tx).await.unwrap() });

        // Paused after the first frame; no further captures happen
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        ctl.resume();
        let stats = handle.await.unwrap();
        assert_eq!(stats.attempts, 5);
        assert_eq!(drain(&mut rx), 5);
    }

    #[tokio::test]
    async fn test_timers_fire_on_virtual_time() {
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();

        let (renderer, _) = CountingRenderer::new();
        let mut bridge = ready_bridge(renderer, 25).await;
        let (mut session, _ctl) = CaptureSession::new(SessionSpec::from_frame_count(25, 10));
        // 40ms interval at 25fps: fires once per frame
        session.timers_mut().schedule_interval(0.0, 40.0, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let (tx, _rx) = mpsc::channel(64);
        session.run(&mut bridge, tx).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_zero_frames_is_a_noop() {
        let (renderer, renders) = CountingRenderer::new();
        let mut bridge = ready_bridge(renderer, 30).await;
        let (mut session, _ctl) = CaptureSession::new(SessionSpec::from_duration(30, 0.0));
        let (tx, _rx) = mpsc::channel(8);

        let stats = session.run(&mut bridge, tx).await.unwrap();
        assert_eq!(stats.attempts, 0);
        assert_eq!(renders.load(Ordering::SeqCst), 0);
    }
}
