//! Cross-fade transitions between composed segments.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Named cross-fade effects, mapped to FFmpeg `xfade` transition names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransitionFilter {
    Fade,
    WipeLeft,
    WipeRight,
    SlideUp,
    SlideDown,
    SlideLeft,
    SlideRight,
    CircleOpen,
    CircleClose,
    Dissolve,
    Pixelize,
    Radial,
}

impl TransitionFilter {
    /// The `xfade` transition identifier.
    pub fn xfade_name(&self) -> &'static str {
        match self {
            TransitionFilter::Fade => "fade",
            TransitionFilter::WipeLeft => "wipeleft",
            TransitionFilter::WipeRight => "wiperight",
            TransitionFilter::SlideUp => "slideup",
            TransitionFilter::SlideDown => "slidedown",
            TransitionFilter::SlideLeft => "slideleft",
            TransitionFilter::SlideRight => "slideright",
            TransitionFilter::CircleOpen => "circleopen",
            TransitionFilter::CircleClose => "circleclose",
            TransitionFilter::Dissolve => "dissolve",
            TransitionFilter::Pixelize => "pixelize",
            TransitionFilter::Radial => "radial",
        }
    }
}

/// A cross-fade into the *next* segment.
///
/// Attached to the earlier of an adjoining pair. Absence means a hard
/// cut, which composes by stream-level concatenation instead of a
/// filter graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transition {
    /// Which blend effect to use
    pub filter: TransitionFilter,
    /// Overlap length in milliseconds
    pub duration_ms: f64,
}

impl Transition {
    pub fn new(filter: TransitionFilter, duration_ms: f64) -> Self {
        Self {
            filter,
            duration_ms,
        }
    }
}
