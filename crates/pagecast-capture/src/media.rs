//! The dispatchable-media contract and its four adapters.
//!
//! The scheduler drives every timed element on the page through one
//! trait, [`DispatchableMedia`]; it never inspects kind-specific state.
//! Decode correctness belongs to the page's native decoders, reached
//! through an injected [`MediaDriver`]; the adapters own only the
//! scheduling lifecycle: created on discovery, loaded once when first
//! playable, seeked each eligible frame, destroyed once their window
//! closes, never re-created.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{CaptureError, CaptureResult};

/// Maximum `load()` attempts before an adapter reports failure.
const LOAD_MAX_ATTEMPTS: u32 = 3;
/// Base backoff between load attempts (doubles each retry).
const LOAD_BASE_BACKOFF: Duration = Duration::from_millis(50);

/// A media element's window on the virtual timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaWindow {
    /// Virtual time at which the element becomes visible (ms)
    pub start_ms: f64,
    /// Virtual time at which the element is done and destroyable (ms)
    pub end_ms: f64,
    /// Offset into the element's own media timeline (ms)
    pub offset_ms: f64,
}

impl MediaWindow {
    /// Build a window clamped to the session duration.
    pub fn clamped(start_ms: f64, end_ms: f64, session_duration_ms: f64) -> Self {
        let start = start_ms.clamp(0.0, session_duration_ms);
        Self {
            start_ms: start,
            end_ms: end_ms.clamp(start, session_duration_ms),
            offset_ms: 0.0,
        }
    }

    /// Returns the window with an offset into the source media.
    pub fn with_offset(mut self, offset_ms: f64) -> Self {
        self.offset_ms = offset_ms;
        self
    }

    /// Translate a virtual time into the element's local media time.
    pub fn local_time(&self, virtual_ms: f64) -> f64 {
        virtual_ms - self.start_ms - self.offset_ms
    }
}

/// Kind-specific decode backend, implemented by the page integration.
///
/// `prepare` may be called more than once (retried with backoff by the
/// adapter); `seek_to` must tolerate equal or earlier times.
#[async_trait]
pub trait MediaDriver: Send {
    /// Make the underlying decoder ready to present frames.
    async fn prepare(&mut self) -> CaptureResult<()>;

    /// Present the frame at `local_ms` of the element's own timeline.
    async fn seek_to(&mut self, local_ms: f64) -> CaptureResult<()>;

    /// Release decoder resources. Must be idempotent.
    async fn teardown(&mut self);
}

/// Uniform scheduling contract over all four media kinds.
///
/// The scheduler holds only `Box<dyn DispatchableMedia>`; the concrete
/// adapter types never escape this module's constructors.
#[async_trait]
pub trait DispatchableMedia: Send {
    /// Stable identifier for logs and error isolation.
    fn id(&self) -> &str;

    /// The element's window on the virtual timeline.
    fn window(&self) -> MediaWindow;

    /// Whether the element should be presented at virtual time `t`.
    fn can_play(&self, t_ms: f64) -> bool;

    /// Whether the element's window has closed at virtual time `t`.
    fn can_destroy(&self, t_ms: f64) -> bool;

    /// Whether `load()` has succeeded.
    fn is_ready(&self) -> bool;

    /// Load the underlying decoder. Idempotent; retries internally with
    /// backoff. Returns `false` when all attempts failed.
    async fn load(&mut self) -> bool;

    /// Seek to the element's local time. Tolerates equal or earlier
    /// times without corrupting state.
    async fn seek(&mut self, local_ms: f64) -> CaptureResult<()>;

    /// Release the element. Idempotent; the element is never re-created.
    async fn destroy(&mut self);
}

/// Shared lifecycle state for all adapter kinds.
struct AdapterCore {
    id: String,
    window: MediaWindow,
    driver: Box<dyn MediaDriver>,
    ready: bool,
    destroyed: bool,
    last_seek_ms: Option<f64>,
}

impl AdapterCore {
    fn new(id: String, window: MediaWindow, driver: Box<dyn MediaDriver>) -> Self {
        Self {
            id,
            window,
            driver,
            ready: false,
            destroyed: false,
            last_seek_ms: None,
        }
    }

    fn can_play(&self, t_ms: f64) -> bool {
        !self.destroyed && t_ms >= self.window.start_ms && t_ms < self.window.end_ms
    }

    fn can_destroy(&self, t_ms: f64) -> bool {
        !self.destroyed && t_ms >= self.window.end_ms
    }

    async fn load(&mut self) -> bool {
        if self.ready {
            return true;
        }
        if self.destroyed {
            return false;
        }

        let mut backoff = LOAD_BASE_BACKOFF;
        for attempt in 1..=LOAD_MAX_ATTEMPTS {
            match self.driver.prepare().await {
                Ok(()) => {
                    debug!(media_id = %self.id, attempt, "Media loaded");
                    self.ready = true;
                    return true;
                }
                Err(e) if attempt < LOAD_MAX_ATTEMPTS => {
                    debug!(media_id = %self.id, attempt, error = %e, "Media load failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    warn!(media_id = %self.id, error = %e, "Media load failed after {} attempts", LOAD_MAX_ATTEMPTS);
                }
            }
        }
        false
    }

    async fn seek(&mut self, local_ms: f64) -> CaptureResult<()> {
        if self.destroyed {
            return Err(CaptureError::media(&self.id, "seek after destroy"));
        }
        // Repeating the same position is a no-op; earlier positions are
        // legitimate rewinds and go through to the driver.
        if self.last_seek_ms == Some(local_ms) {
            return Ok(());
        }
        self.driver
            .seek_to(local_ms)
            .await
            .map_err(|e| CaptureError::media(&self.id, e.to_string()))?;
        self.last_seek_ms = Some(local_ms);
        Ok(())
    }

    async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.driver.teardown().await;
        self.ready = false;
        self.destroyed = true;
        debug!(media_id = %self.id, "Media destroyed");
    }
}

/// A vector (SVG) animation element.
pub struct SvgAnimation {
    core: AdapterCore,
}

impl SvgAnimation {
    pub fn new(id: impl Into<String>, window: MediaWindow, driver: Box<dyn MediaDriver>) -> Self {
        Self {
            core: AdapterCore::new(id.into(), window, driver),
        }
    }
}

#[async_trait]
impl DispatchableMedia for SvgAnimation {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn window(&self) -> MediaWindow {
        self.core.window
    }

    fn can_play(&self, t_ms: f64) -> bool {
        self.core.can_play(t_ms)
    }

    fn can_destroy(&self, t_ms: f64) -> bool {
        self.core.can_destroy(t_ms)
    }

    fn is_ready(&self) -> bool {
        self.core.ready
    }

    async fn load(&mut self) -> bool {
        self.core.load().await
    }

    async fn seek(&mut self, local_ms: f64) -> CaptureResult<()> {
        self.core.seek(local_ms).await
    }

    async fn destroy(&mut self) {
        self.core.destroy().await
    }
}

/// A video element with an optional alpha-mask companion video.
///
/// The mask tracks the main video's timeline exactly; both are seeked
/// for every frame so they can never drift apart.
pub struct MaskedVideo {
    core: AdapterCore,
    mask: Option<Box<dyn MediaDriver>>,
}

impl MaskedVideo {
    pub fn new(id: impl Into<String>, window: MediaWindow, driver: Box<dyn MediaDriver>) -> Self {
        Self {
            core: AdapterCore::new(id.into(), window, driver),
            mask: None,
        }
    }

    /// Attach a mask video sharing this element's timeline.
    pub fn with_mask(mut self, mask: Box<dyn MediaDriver>) -> Self {
        self.mask = Some(mask);
        self
    }
}

#[async_trait]
impl DispatchableMedia for MaskedVideo {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn window(&self) -> MediaWindow {
        self.core.window
    }

    fn can_play(&self, t_ms: f64) -> bool {
        self.core.can_play(t_ms)
    }

    fn can_destroy(&self, t_ms: f64) -> bool {
        self.core.can_destroy(t_ms)
    }

    fn is_ready(&self) -> bool {
        self.core.ready
    }

    async fn load(&mut self) -> bool {
        if !self.core.load().await {
            return false;
        }
        // The mask rides on the main video's retry budget: if the main
        // stream loaded, a mask failure degrades to unmasked playback.
        if let Some(mask) = self.mask.as_mut() {
            if let Err(e) = mask.prepare().await {
                warn!(media_id = %self.core.id, error = %e, "Mask load failed, continuing unmasked");
                self.mask = None;
            }
        }
        true
    }

    async fn seek(&mut self, local_ms: f64) -> CaptureResult<()> {
        self.core.seek(local_ms).await?;
        if let Some(mask) = self.mask.as_mut() {
            mask.seek_to(local_ms)
                .await
                .map_err(|e| CaptureError::media(&self.core.id, format!("mask: {e}")))?;
        }
        Ok(())
    }

    async fn destroy(&mut self) {
        if let Some(mask) = self.mask.as_mut() {
            mask.teardown().await;
        }
        self.mask = None;
        self.core.destroy().await;
    }
}

/// An animated raster image (GIF/APNG-like) element.
pub struct AnimatedImage {
    core: AdapterCore,
}

impl AnimatedImage {
    pub fn new(id: impl Into<String>, window: MediaWindow, driver: Box<dyn MediaDriver>) -> Self {
        Self {
            core: AdapterCore::new(id.into(), window, driver),
        }
    }
}

#[async_trait]
impl DispatchableMedia for AnimatedImage {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn window(&self) -> MediaWindow {
        self.core.window
    }

    fn can_play(&self, t_ms: f64) -> bool {
        self.core.can_play(t_ms)
    }

    fn can_destroy(&self, t_ms: f64) -> bool {
        self.core.can_destroy(t_ms)
    }

    fn is_ready(&self) -> bool {
        self.core.ready
    }

    async fn load(&mut self) -> bool {
        self.core.load().await
    }

    async fn seek(&mut self, local_ms: f64) -> CaptureResult<()> {
        self.core.seek(local_ms).await
    }

    async fn destroy(&mut self) {
        self.core.destroy().await
    }
}

/// A vector-keyframe animation element (scripted keyframe playback).
pub struct KeyframeAnimation {
    core: AdapterCore,
}

impl KeyframeAnimation {
    pub fn new(id: impl Into<String>, window: MediaWindow, driver: Box<dyn MediaDriver>) -> Self {
        Self {
            core: AdapterCore::new(id.into(), window, driver),
        }
    }
}

#[async_trait]
impl DispatchableMedia for KeyframeAnimation {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn window(&self) -> MediaWindow {
        self.core.window
    }

    fn can_play(&self, t_ms: f64) -> bool {
        self.core.can_play(t_ms)
    }

    fn can_destroy(&self, t_ms: f64) -> bool {
        self.core.can_destroy(t_ms)
    }

    fn is_ready(&self) -> bool {
        self.core.ready
    }

    async fn load(&mut self) -> bool {
        self.core.load().await
    }

    async fn seek(&mut self, local_ms: f64) -> CaptureResult<()> {
        self.core.seek(local_ms).await
    }

    async fn destroy(&mut self) {
        self.core.destroy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Driver that records calls and can fail the first N prepares.
    struct RecordingDriver {
        prepares: Arc<AtomicU32>,
        seeks: Arc<AtomicUsize>,
        teardowns: Arc<AtomicU32>,
        fail_first_prepares: u32,
    }

    impl RecordingDriver {
        fn new() -> (Self, Arc<AtomicU32>, Arc<AtomicUsize>, Arc<AtomicU32>) {
            let prepares = Arc::new(AtomicU32::new(0));
            let seeks = Arc::new(AtomicUsize::new(0));
            let teardowns = Arc::new(AtomicU32::new(0));
            (
                Self {
                    prepares: prepares.clone(),
                    seeks: seeks.clone(),
                    teardowns: teardowns.clone(),
                    fail_first_prepares: 0,
                },
                prepares,
                seeks,
                teardowns,
            )
        }
    }

    #[async_trait]
    impl MediaDriver for RecordingDriver {
        async fn prepare(&mut self) -> CaptureResult<()> {
            let n = self.prepares.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first_prepares {
                return Err(CaptureError::protocol("decoder not ready"));
            }
            Ok(())
        }

        async fn seek_to(&mut self, _local_ms: f64) -> CaptureResult<()> {
            self.seeks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn teardown(&mut self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn window() -> MediaWindow {
        MediaWindow::clamped(1000.0, 3000.0, 10_000.0)
    }

    #[test]
    fn test_window_clamps_to_session() {
        let w = MediaWindow::clamped(-500.0, 99_000.0, 5000.0);
        assert_eq!(w.start_ms, 0.0);
        assert_eq!(w.end_ms, 5000.0);

        // end never precedes start
        let w = MediaWindow::clamped(4000.0, 1000.0, 5000.0);
        assert_eq!(w.start_ms, 4000.0);
        assert_eq!(w.end_ms, 4000.0);
    }

    #[test]
    fn test_local_time() {
        let w = window().with_offset(250.0);
        assert_eq!(w.local_time(1500.0), 250.0);
    }

    #[tokio::test]
    async fn test_play_window() {
        let (driver, ..) = RecordingDriver::new();
        let media = SvgAnimation::new("svg-1", window(), Box::new(driver));

        assert!(!media.can_play(999.0));
        assert!(media.can_play(1000.0));
        assert!(media.can_play(2999.0));
        assert!(!media.can_play(3000.0));
        assert!(!media.can_destroy(2999.0));
        assert!(media.can_destroy(3000.0));
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let (driver, prepares, ..) = RecordingDriver::new();
        let mut media = AnimatedImage::new("img-1", window(), Box::new(driver));

        assert!(media.load().await);
        assert!(media.load().await);
        assert_eq!(prepares.load(Ordering::SeqCst), 1);
        assert!(media.is_ready());
    }

    #[tokio::test]
    async fn test_load_retries_with_backoff() {
        let (mut driver, prepares, ..) = RecordingDriver::new();
        driver.fail_first_prepares = 2;
        let mut media = KeyframeAnimation::new("kf-1", window(), Box::new(driver));

        assert!(media.load().await);
        assert_eq!(prepares.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_load_gives_up() {
        let (mut driver, prepares, ..) = RecordingDriver::new();
        driver.fail_first_prepares = 99;
        let mut media = SvgAnimation::new("svg-2", window(), Box::new(driver));

        assert!(!media.load().await);
        assert_eq!(prepares.load(Ordering::SeqCst), 3);
        assert!(!media.is_ready());
    }

    #[tokio::test]
    async fn test_repeated_seek_is_noop_earlier_seek_goes_through() {
        let (driver, _, seeks, _) = RecordingDriver::new();
        let mut media = SvgAnimation::new("svg-3", window(), Box::new(driver));
        media.load().await;

        media.seek(100.0).await.unwrap();
        media.seek(100.0).await.unwrap();
        assert_eq!(seeks.load(Ordering::SeqCst), 1);

        // rewind is forwarded, not dropped
        media.seek(50.0).await.unwrap();
        assert_eq!(seeks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (driver, _, _, teardowns) = RecordingDriver::new();
        let mut media = AnimatedImage::new("img-2", window(), Box::new(driver));
        media.load().await;

        media.destroy().await;
        media.destroy().await;
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert!(!media.is_ready());
        assert!(!media.can_play(1500.0));
        assert!(media.seek(100.0).await.is_err());
    }

    #[tokio::test]
    async fn test_masked_video_seeks_both_streams() {
        let (driver, _, main_seeks, _) = RecordingDriver::new();
        let (mask_driver, _, mask_seeks, mask_teardowns) = RecordingDriver::new();
        let mut media =
            MaskedVideo::new("vid-1", window(), Box::new(driver)).with_mask(Box::new(mask_driver));

        media.load().await;
        media.seek(40.0).await.unwrap();
        media.seek(80.0).await.unwrap();
        assert_eq!(main_seeks.load(Ordering::SeqCst), 2);
        assert_eq!(mask_seeks.load(Ordering::SeqCst), 2);

        media.destroy().await;
        assert_eq!(mask_teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mask_failure_degrades_to_unmasked() {
        let (driver, ..) = RecordingDriver::new();
        let (mut mask_driver, _, mask_seeks, _) = RecordingDriver::new();
        mask_driver.fail_first_prepares = 99;
        let mut media =
            MaskedVideo::new("vid-2", window(), Box::new(driver)).with_mask(Box::new(mask_driver));

        assert!(media.load().await);
        media.seek(40.0).await.unwrap();
        assert_eq!(mask_seeks.load(Ordering::SeqCst), 0);
    }
}
