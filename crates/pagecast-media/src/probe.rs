//! FFprobe wrapper for source metadata.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Probe a media file's duration in milliseconds.
///
/// Works for both audio and video sources; used to anchor audio fade-outs
/// when a source is shorter than its timeline window.
pub async fn media_duration_ms(path: impl AsRef<Path>) -> MediaResult<f64> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("probe of {} failed", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    let duration = parse_duration_ms(&String::from_utf8_lossy(&output.stdout))?;
    debug!(path = %path.display(), duration_ms = duration, "Probed media duration");
    Ok(duration)
}

/// Parse ffprobe's `format=duration` JSON output into milliseconds.
fn parse_duration_ms(json: &str) -> MediaResult<f64> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    value
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .map(|secs| secs * 1000.0)
        .ok_or_else(|| MediaError::FfprobeFailed {
            message: "no duration in probe output".to_string(),
            stderr: None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        let json = r#"{"format": {"duration": "183.472000"}}"#;
        let ms = parse_duration_ms(json).unwrap();
        assert!((ms - 183_472.0).abs() < 0.5);
    }

    #[test]
    fn test_parse_duration_missing() {
        assert!(parse_duration_ms(r#"{"format": {}}"#).is_err());
        assert!(parse_duration_ms("not json").is_err());
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = media_duration_ms("/definitely/not/here.mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
