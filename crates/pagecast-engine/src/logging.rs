//! Structured render logging utilities.

use tracing::{error, info, warn, Span};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` controls filtering; `default_filter` applies when it is
/// unset. Safe to call once per process.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Render logger with consistent contextual fields.
#[derive(Debug, Clone)]
pub struct RenderLogger {
    render_id: String,
    stage: String,
}

impl RenderLogger {
    /// Create a logger for one render and stage (e.g. "capture",
    /// "synthesis", "composition").
    pub fn new(render_id: Uuid, stage: &str) -> Self {
        Self {
            render_id: render_id.to_string(),
            stage: stage.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            render_id = %self.render_id,
            stage = %self.stage,
            "Render started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            render_id = %self.render_id,
            stage = %self.stage,
            "Render progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            render_id = %self.render_id,
            stage = %self.stage,
            "Render warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            render_id = %self.render_id,
            stage = %self.stage,
            "Render error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            render_id = %self.render_id,
            stage = %self.stage,
            "Render completed: {}", message
        );
    }

    pub fn render_id(&self) -> &str {
        &self.render_id
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Tracing span carrying this render's context.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "render",
            render_id = %self.render_id,
            stage = %self.stage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_logger_fields() {
        let id = Uuid::new_v4();
        let logger = RenderLogger::new(id, "capture");
        assert_eq!(logger.render_id(), id.to_string());
        assert_eq!(logger.stage(), "capture");
    }
}
