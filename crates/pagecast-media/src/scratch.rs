//! Per-job scratch directories for intermediate files.
//!
//! Every render job gets a uuid-keyed directory holding its disposable
//! swap files: the pre-mux video, per-chunk intermediate streams, the
//! concat list, and the optional cover image. Nothing in here is a
//! durable contract.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MediaError, MediaResult};

/// A job-scoped scratch directory.
#[derive(Debug)]
pub struct ScratchDir {
    job_id: Uuid,
    root: PathBuf,
}

impl ScratchDir {
    /// Create a fresh scratch directory under `work_dir`.
    pub async fn create(work_dir: impl AsRef<Path>) -> MediaResult<Self> {
        let job_id = Uuid::new_v4();
        let root = work_dir.as_ref().join(format!("pagecast-{job_id}"));
        fs::create_dir_all(&root).await?;
        debug!(job_id = %job_id, path = %root.display(), "Scratch directory created");
        Ok(Self { job_id, root })
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Swap file for the video stream before the audio mux pass.
    pub fn premux_video(&self, extension: &str) -> PathBuf {
        self.root.join(format!("premux.{extension}"))
    }

    /// Intermediate splice-safe stream for one chunk.
    pub fn chunk_stream(&self, index: u32) -> PathBuf {
        self.root.join(format!("chunk-{index}.ts"))
    }

    /// Concat-demuxer list file.
    pub fn concat_list(&self) -> PathBuf {
        self.root.join("concat.txt")
    }

    /// Cover frame image.
    pub fn cover_image(&self) -> PathBuf {
        self.root.join("cover.jpg")
    }

    /// Remove the directory and everything in it. Best effort: a failed
    /// cleanup is logged, never fatal.
    pub async fn cleanup(self) {
        if let Err(e) = fs::remove_dir_all(&self.root).await {
            warn!(job_id = %self.job_id, error = %e, "Scratch cleanup failed");
        }
    }
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Attempts a fast rename first; on EXDEV falls back to copy-and-delete
/// through a temporary name so the destination appears atomically.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    // Copy into the destination directory first so the final rename is
    // atomic on the destination filesystem
    let tmp = dst.with_extension("pagecast-tmp");
    fs::copy(src, &tmp).await?;
    if let Err(e) = fs::rename(&tmp, dst).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(MediaError::from(e));
    }
    if let Err(e) = fs::remove_file(src).await {
        warn!(
            "Failed to remove source after cross-device move: {}: {}",
            src.display(),
            e
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scratch_paths_are_job_scoped() {
        let work = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(work.path()).await.unwrap();

        assert!(scratch.path().exists());
        assert!(scratch
            .premux_video("mp4")
            .starts_with(scratch.path()));
        assert_eq!(
            scratch.chunk_stream(3).file_name().unwrap(),
            "chunk-3.ts"
        );

        let other = ScratchDir::create(work.path()).await.unwrap();
        assert_ne!(scratch.path(), other.path());

        let path = scratch.path().to_path_buf();
        scratch.cleanup().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_move_file_same_device() {
        let work = tempfile::tempdir().unwrap();
        let src = work.path().join("a.bin");
        let dst = work.path().join("nested/b.bin");
        fs::write(&src, b"payload").await.unwrap();

        move_file(&src, &dst).await.unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"payload");
    }
}
