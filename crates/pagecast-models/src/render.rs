//! Render specification and the fixed encoder matrix.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::time::{frame_count, frame_interval_ms, MAX_RENDER_DURATION_MS};

/// Default pixel format for encoder output (maximum player compatibility).
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";
/// Default quality when neither quality nor bitrate is set explicitly.
pub const DEFAULT_QUALITY: u8 = 80;
/// Default number of frames batched into one encoder pipe write.
pub const DEFAULT_PARALLEL_WRITE_FRAMES: usize = 10;
/// Encoding preset pinned for H.264/H.265 output.
pub const H26X_PRESET: &str = "medium";
/// Encoder profile pinned for H.264/H.265 output.
pub const H26X_PROFILE: &str = "main";
/// Fraction of the output duration used for the default cover timestamp.
pub const DEFAULT_COVER_FRACTION: f64 = 0.2;

/// Reference bitrate model: ~2.5 Mbit/s for a 1280x720 (921,600 px)
/// frame at quality 100, scaling linearly with pixel count.
const BITRATE_KBPS_PER_PIXEL: f64 = 2560.0 / 921_600.0;

/// Output container formats with their fixed encoder matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Webm,
    Mov,
    /// Splice-safe intermediate container for chunked renders; H.264
    /// regardless of the final delivery format.
    MpegTs,
}

impl OutputFormat {
    /// Video encoder for this container.
    pub fn video_codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mov | OutputFormat::MpegTs => "libx264",
            OutputFormat::Webm => "libvpx-vp9",
        }
    }

    /// Audio encoder for this container.
    pub fn audio_codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mov | OutputFormat::MpegTs => "aac",
            OutputFormat::Webm => "libvorbis",
        }
    }

    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mov => "mov",
            OutputFormat::MpegTs => "ts",
        }
    }

    /// Whether the codec for this container is in the H.264/H.265 family,
    /// which gets a pinned profile and preset for predictable hardware
    /// decoder compatibility.
    pub fn is_h26x(&self, codec_override: Option<&str>) -> bool {
        let codec = codec_override.unwrap_or_else(|| self.video_codec());
        codec.contains("264") || codec.contains("265") || codec.contains("hevc")
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Mp4
    }
}

/// Errors raised by [`RenderSpec::validate`].
#[derive(Debug, Error)]
pub enum RenderSpecError {
    #[error("render dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    #[error("render dimensions must be even for {pixel_format} output, got {width}x{height}")]
    OddDimension {
        width: u32,
        height: u32,
        pixel_format: String,
    },

    #[error("fps must be non-zero")]
    ZeroFps,

    #[error("duration {0}ms is out of range")]
    DurationOutOfRange(f64),

    #[error("quality must be 0-100, got {0}")]
    QualityOutOfRange(u8),
}

/// Specification of one render job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RenderSpec {
    /// Output width in pixels
    pub width: u32,

    /// Output height in pixels
    pub height: u32,

    /// Frames per second of the virtual clock and the encoder
    pub fps: u32,

    /// Target duration in milliseconds. Advisory: converted to a frame
    /// count once at session start, after which the frame count rules.
    pub duration_ms: f64,

    /// Output container
    #[serde(default)]
    pub format: OutputFormat,

    /// Quality 0-100, used by the linear bitrate model when no explicit
    /// bitrate is set
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Explicit bitrate override in kbps
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,

    /// Encoder pixel format
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,

    /// Video codec override (e.g. "h264_nvenc"); defaults to the
    /// container's matrix entry
    #[serde(default)]
    pub video_codec: Option<String>,

    /// Frames batched into a single encoder pipe write
    #[serde(default = "default_parallel_write_frames")]
    pub parallel_write_frames: usize,

    /// Cover frame timestamp in milliseconds; defaults to 20% of the
    /// actual output duration
    #[serde(default)]
    pub cover_time_ms: Option<f64>,
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}
fn default_pixel_format() -> String {
    DEFAULT_PIXEL_FORMAT.to_string()
}
fn default_parallel_write_frames() -> usize {
    DEFAULT_PARALLEL_WRITE_FRAMES
}

impl RenderSpec {
    /// Create a spec with defaults for everything but geometry and timing.
    pub fn new(width: u32, height: u32, fps: u32, duration_ms: f64) -> Self {
        Self {
            width,
            height,
            fps,
            duration_ms,
            format: OutputFormat::default(),
            quality: DEFAULT_QUALITY,
            bitrate_kbps: None,
            pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
            video_codec: None,
            parallel_write_frames: DEFAULT_PARALLEL_WRITE_FRAMES,
            cover_time_ms: None,
        }
    }

    /// Returns a new spec with the given container format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Returns a new spec with the given quality (0-100).
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Returns a new spec with an explicit bitrate, bypassing the
    /// quality model.
    pub fn with_bitrate_kbps(mut self, kbps: u32) -> Self {
        self.bitrate_kbps = Some(kbps);
        self
    }

    /// Returns a new spec with a codec override.
    pub fn with_video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = Some(codec.into());
        self
    }

    /// Authoritative frame count for this spec.
    pub fn frame_count(&self) -> u64 {
        frame_count(self.fps, self.duration_ms)
    }

    /// Milliseconds between frames.
    pub fn frame_interval_ms(&self) -> f64 {
        frame_interval_ms(self.fps)
    }

    /// Effective video codec: override, else the container matrix entry.
    pub fn effective_video_codec(&self) -> &str {
        self.video_codec
            .as_deref()
            .unwrap_or_else(|| self.format.video_codec())
    }

    /// Effective bitrate in kbps: explicit override, else the linear
    /// pixel-count model scaled by quality.
    pub fn effective_bitrate_kbps(&self) -> u32 {
        match self.bitrate_kbps {
            Some(kbps) => kbps,
            None => {
                let pixels = (self.width as f64) * (self.height as f64);
                (BITRATE_KBPS_PER_PIXEL * pixels * (self.quality as f64 / 100.0)).round() as u32
            }
        }
    }

    /// Validate geometry, timing, and quality ranges.
    pub fn validate(&self) -> Result<(), RenderSpecError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderSpecError::ZeroDimension {
                width: self.width,
                height: self.height,
            });
        }
        if self.fps == 0 {
            return Err(RenderSpecError::ZeroFps);
        }
        if !(0.0..=MAX_RENDER_DURATION_MS).contains(&self.duration_ms) {
            return Err(RenderSpecError::DurationOutOfRange(self.duration_ms));
        }
        if self.quality > 100 {
            return Err(RenderSpecError::QualityOutOfRange(self.quality));
        }
        // yuv420p subsamples chroma 2x2; odd dimensions fail at encode time
        if self.pixel_format == "yuv420p" && (self.width % 2 != 0 || self.height % 2 != 0) {
            return Err(RenderSpecError::OddDimension {
                width: self.width,
                height: self.height,
                pixel_format: self.pixel_format.clone(),
            });
        }
        Ok(())
    }
}
