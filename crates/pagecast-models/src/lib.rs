//! Shared data models for the pagecast rendering engine.
//!
//! This crate holds the value types exchanged between the capture,
//! media, and engine crates: render specifications, audio tracks,
//! transitions, progress events, and frame/time math.

pub mod audio;
pub mod event;
pub mod frame;
pub mod render;
pub mod time;
pub mod transition;

pub use audio::AudioTrack;
pub use event::RenderEvent;
pub use frame::Frame;
pub use render::{OutputFormat, RenderSpec, DEFAULT_PIXEL_FORMAT};
pub use time::{format_duration_ms, frame_count, frame_interval_ms, ms_to_secs, secs_to_ms};
pub use transition::{Transition, TransitionFilter};
