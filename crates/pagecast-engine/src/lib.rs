//! Render job orchestration.
//!
//! Ties the capture and media crates together: a [`RenderJob`] acquires
//! a page, drives a frame-accurate capture session, and streams the
//! frames into an encoder; a [`ChunkedRenderJob`] renders chunks in
//! parallel and composes them with cross-fades and a mixed audio
//! timeline. Events flow out through a non-blocking [`EventChannel`].

pub mod chunked;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod logging;

pub use chunked::{ChunkPlan, ChunkedRenderJob, ComposedOutcome};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use events::EventChannel;
pub use job::{RenderJob, RenderOutcome};
pub use logging::{init_logging, RenderLogger};
