//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Render engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-frame capture timeout before a page is declared unavailable
    pub frame_timeout: Duration,
    /// Work directory for scratch files (chunk streams, pre-mux swaps)
    pub work_dir: PathBuf,
    /// Maximum chunks rendered in parallel within one job
    pub max_parallel_chunks: usize,
    /// Capacity of the frame channel between capture and encode
    pub frame_channel_capacity: usize,
    /// Capacity of the render event channel
    pub event_channel_capacity: usize,
    /// Master volume applied over all audio tracks (0-100)
    pub master_volume: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_millis(5000),
            work_dir: std::env::temp_dir().join("pagecast"),
            max_parallel_chunks: 4,
            frame_channel_capacity: 32,
            event_channel_capacity: 64,
            master_volume: 100,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            frame_timeout: Duration::from_millis(
                std::env::var("PAGECAST_FRAME_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5000),
            ),
            work_dir: std::env::var("PAGECAST_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_parallel_chunks: std::env::var("PAGECAST_MAX_PARALLEL_CHUNKS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_parallel_chunks),
            frame_channel_capacity: std::env::var("PAGECAST_FRAME_CHANNEL_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.frame_channel_capacity),
            event_channel_capacity: std::env::var("PAGECAST_EVENT_CHANNEL_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.event_channel_capacity),
            master_volume: std::env::var("PAGECAST_MASTER_VOLUME")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.master_volume),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.max_parallel_chunks == 0 {
            return Err(EngineError::Config(
                "max_parallel_chunks must be at least 1".to_string(),
            ));
        }
        if self.frame_channel_capacity == 0 {
            return Err(EngineError::Config(
                "frame_channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.master_volume > 100 {
            return Err(EngineError::Config(
                "master_volume must be 0-100".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_validation_rejects_zero_parallelism() {
        let config = EngineConfig {
            max_parallel_chunks: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let config = EngineConfig {
            master_volume: 130,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
