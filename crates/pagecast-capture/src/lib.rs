//! Frame-accurate page capture.
//!
//! This crate provides:
//! - A virtual clock advanced in fixed steps, decoupled from wall time
//! - The dispatchable-media contract and its four adapter kinds
//! - The single-task capture scheduler (seek fan-out, timers, pause)
//! - The host-side frame-capture bridge with its page state machine
//! - The page-pool and page-renderer collaborator seams

pub mod bridge;
pub mod clock;
pub mod error;
pub mod media;
pub mod scheduler;

pub use bridge::{
    CapturedFrame, FrameCaptureBridge, PagePool, PageRenderer, PageState, DEFAULT_FRAME_TIMEOUT,
    KEEPALIVE_SCRIPT,
};
pub use clock::{VirtualClock, VirtualTimers};
pub use error::{CaptureError, CaptureResult};
pub use media::{
    AnimatedImage, DispatchableMedia, KeyframeAnimation, MaskedVideo, MediaDriver, MediaWindow,
    SvgAnimation,
};
pub use scheduler::{CaptureSession, CaptureStats, SessionController, SessionSpec};
