//! Host-side frame-capture bridge, one per rendered page.
//!
//! The bridge owns the page's capture state machine and relays
//! single-frame render requests over the remote-debugging boundary.
//! Frame ordering is structural: `capture_frame` borrows the bridge
//! mutably, so frame `i + 1` can never be requested before frame `i`'s
//! result has resolved.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use pagecast_models::Frame;

use crate::error::{CaptureError, CaptureResult};

/// Default per-frame capture timeout.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(5000);

/// Script injected on capture start. Keeps a low-amplitude,
/// continuously-mutating element in the DOM so the renderer never
/// observes "nothing changed" long enough to enter an idle state that
/// would stall frame production.
pub const KEEPALIVE_SCRIPT: &str = concat!(
    "(() => {",
    "const el = document.createElement('div');",
    "el.style.cssText = 'position:fixed;left:-10px;top:-10px;width:1px;height:1px;opacity:0.01';",
    "document.body.appendChild(el);",
    "let tick = 0;",
    "const mutate = () => { el.style.transform = `translateX(${tick++ % 2}px)`; requestAnimationFrame(mutate); };",
    "requestAnimationFrame(mutate);",
    "})();"
);

/// Capture lifecycle of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// No viewport or clock configuration pushed yet
    Uninitialized,
    /// Configured and reusable; no protocol session attached
    Ready,
    /// A protocol session is attached and frames are being produced
    Capturing,
    /// Suspended between frames; the session stays attached
    Paused,
    /// A capture timed out or the page crashed. Terminal: the page must
    /// not be reused
    Unavailable,
    /// The page was closed. Terminal
    Closed,
}

impl PageState {
    fn name(&self) -> &'static str {
        match self {
            PageState::Uninitialized => "uninitialized",
            PageState::Ready => "ready",
            PageState::Capturing => "capturing",
            PageState::Paused => "paused",
            PageState::Unavailable => "unavailable",
            PageState::Closed => "closed",
        }
    }
}

/// The browser's remote-debugging surface for one page.
///
/// Every call is idempotent from the bridge's point of view and
/// cancellable by timeout. Implementations live outside the core.
#[async_trait]
pub trait PageRenderer: Send {
    /// Attach a protocol session for a capture run.
    async fn attach(&mut self) -> CaptureResult<()>;

    /// Detach the protocol session so the page can be reused.
    async fn detach(&mut self) -> CaptureResult<()>;

    /// Configure the page viewport.
    async fn set_viewport(&mut self, width: u32, height: u32) -> CaptureResult<()>;

    /// Push the virtual-clock configuration into the page.
    async fn configure_clock(&mut self, fps: u32) -> CaptureResult<()>;

    /// Evaluate a script in the page (used for the liveness guard).
    async fn evaluate(&mut self, script: &str) -> CaptureResult<()>;

    /// Issue the single-compositor-frame render primitive with an
    /// attached image-encode request. `None` is a legitimate "nothing
    /// changed" result.
    async fn render_frame(&mut self) -> CaptureResult<Option<Frame>>;

    /// Close the page.
    async fn close(&mut self);
}

/// Saturation-aware page acquisition, provided by an external pool.
///
/// The core only requires this contract; bounding parallelism across
/// sessions is entirely the pool's concern.
#[async_trait]
pub trait PagePool: Send + Sync {
    type Renderer: PageRenderer;

    /// Acquire a page for a capture run.
    async fn acquire(&self) -> CaptureResult<Self::Renderer>;

    /// Return a page to the pool.
    async fn release(&self, renderer: Self::Renderer);

    /// Whether the pool is currently saturated. Callers may defer
    /// releasing an underlying resource until load subsides.
    fn is_saturated(&self) -> bool;
}

/// Result of one capture attempt.
#[derive(Debug)]
pub enum CapturedFrame {
    /// A frame was rendered and encoded.
    Image(Frame),
    /// The compositor legitimately had nothing new to present.
    NoChange,
}

/// Host-side bridge between the in-page scheduler and the encoder
/// pipeline.
pub struct FrameCaptureBridge<R: PageRenderer> {
    renderer: R,
    state: PageState,
    frame_timeout: Duration,
    viewport: Option<(u32, u32)>,
}

impl<R: PageRenderer> FrameCaptureBridge<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            state: PageState::Uninitialized,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            viewport: None,
        }
    }

    /// Override the per-frame capture timeout.
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    fn expect_state(&self, expected: PageState) -> CaptureResult<()> {
        match self.state {
            PageState::Unavailable => Err(CaptureError::PageUnavailable),
            PageState::Closed => Err(CaptureError::PageClosed),
            actual if actual == expected => Ok(()),
            actual => Err(CaptureError::InvalidState {
                expected: expected.name(),
                actual: actual.name(),
            }),
        }
    }

    /// Push viewport and clock configuration into the page.
    /// Uninitialized → Ready; reconfiguring a Ready page is allowed.
    pub async fn configure(&mut self, width: u32, height: u32, fps: u32) -> CaptureResult<()> {
        if !matches!(self.state, PageState::Uninitialized | PageState::Ready) {
            return self.expect_state(PageState::Ready);
        }
        self.renderer.set_viewport(width, height).await?;
        self.renderer.configure_clock(fps).await?;
        self.viewport = Some((width, height));
        self.state = PageState::Ready;
        debug!(width, height, fps, "Page configured");
        Ok(())
    }

    /// Attach the protocol session and start producing frames.
    /// Ready → Capturing; requires a configured viewport.
    pub async fn begin_capture(&mut self) -> CaptureResult<()> {
        self.expect_state(PageState::Ready)?;
        if self.viewport.is_none() {
            return Err(CaptureError::InvalidState {
                expected: "configured viewport",
                actual: "no viewport",
            });
        }
        self.renderer.attach().await?;
        self.renderer.evaluate(KEEPALIVE_SCRIPT).await?;
        self.state = PageState::Capturing;
        Ok(())
    }

    /// Capture one frame, racing the render primitive against the
    /// configured timeout.
    ///
    /// On timeout the page is marked [`PageState::Unavailable`] and the
    /// error is fatal to the owning session; retrying belongs to a
    /// caller that restarts the whole session on a fresh page.
    pub async fn capture_frame(&mut self) -> CaptureResult<CapturedFrame> {
        self.expect_state(PageState::Capturing)?;

        match tokio::time::timeout(self.frame_timeout, self.renderer.render_frame()).await {
            Ok(Ok(Some(frame))) => Ok(CapturedFrame::Image(frame)),
            Ok(Ok(None)) => Ok(CapturedFrame::NoChange),
            Ok(Err(e)) => {
                warn!(error = %e, "Frame render failed, marking page unavailable");
                self.state = PageState::Unavailable;
                Err(e)
            }
            Err(_) => {
                let ms = self.frame_timeout.as_millis() as u64;
                warn!(timeout_ms = ms, "Frame capture timed out, marking page unavailable");
                self.state = PageState::Unavailable;
                Err(CaptureError::FrameTimeout(ms))
            }
        }
    }

    /// Suspend frame production between frames. Capturing → Paused.
    pub fn pause(&mut self) -> CaptureResult<()> {
        self.expect_state(PageState::Capturing)?;
        self.state = PageState::Paused;
        Ok(())
    }

    /// Resume frame production. Paused → Capturing.
    pub fn resume(&mut self) -> CaptureResult<()> {
        self.expect_state(PageState::Paused)?;
        self.state = PageState::Capturing;
        Ok(())
    }

    /// Detach the protocol session and return the page to Ready so it
    /// can be reused for a new render.
    pub async fn stop(&mut self) -> CaptureResult<()> {
        if !matches!(self.state, PageState::Capturing | PageState::Paused) {
            return self.expect_state(PageState::Capturing);
        }
        self.renderer.detach().await?;
        self.state = PageState::Ready;
        Ok(())
    }

    /// Close the page. Terminal; idempotent.
    pub async fn close(&mut self) {
        if self.state == PageState::Closed {
            return;
        }
        self.renderer.close().await;
        self.state = PageState::Closed;
    }

    /// Give the renderer back, consuming the bridge. Only sensible for
    /// pages still in a reusable state.
    pub fn into_renderer(self) -> R {
        self.renderer
    }
}
