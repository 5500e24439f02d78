//! FFmpeg-backed synthesis, composition, and audio mixing.
//!
//! This crate turns captured frame streams into finished videos: a
//! [`Synthesizer`] pipes frames into a spawned encoder, a
//! [`ChunkComposer`] splices independently rendered segments (with
//! optional cross-fades), and the audio mux pass lays positioned tracks
//! over the finished video. Everything FFmpeg-shaped goes through the
//! [`FfmpegCommand`] builder so commands stay inspectable in tests.

pub mod audio_mix;
pub mod chunks;
pub mod command;
pub mod error;
pub mod filters;
pub mod probe;
pub mod progress;
pub mod scratch;
pub mod synthesizer;

pub use audio_mix::build_audio_mux_command;
pub use chunks::{ChunkComposer, ComposeJob, VideoChunk};
pub use command::{check_ffmpeg, check_ffprobe, EncoderProcess, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::media_duration_ms;
pub use progress::{FfmpegProgress, FULL_CAP, VIDEO_PASS_CAP};
pub use scratch::{move_file, ScratchDir};
pub use synthesizer::{FrameBuffer, FrameSink, Synthesizer, SynthesizerState};
