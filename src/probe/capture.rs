//! Frame Capture: produces the base64 JPEG preview for a stream.
//!
//! Video streams grab one frame with a short-lived ffmpeg run. Audio-only
//! streams use a static icon. A failed grab means the source is
//! unreachable and is fatal to the worker.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tracing::{error, info};

use super::command::frame_grab_invocation;

/// Upper bound on a single frame grab.
const GRAB_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from snapshot capture.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The grab process could not be started.
    #[error("failed to launch frame grab: {0}")]
    Launch(#[source] std::io::Error),

    /// The grab process exited unsuccessfully.
    #[error("frame grab exited with {status}")]
    Failed {
        /// Exit status as reported by the OS.
        status: String,
    },

    /// The grab process did not finish in time.
    #[error("frame grab timed out after {0:?}")]
    TimedOut(Duration),

    /// The image file could not be read.
    #[error("failed to read image {path}: {source}")]
    Read {
        /// Image path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Capability producing preview images.
#[async_trait]
pub trait FrameCapture: Send + Sync {
    /// Capture a fresh image and return it base64-encoded.
    async fn refresh(&self) -> Result<String, CaptureError>;

    /// Return the most recently captured image without capturing again.
    async fn current(&self) -> Result<String, CaptureError>;
}

/// ffmpeg-backed capture writing `<snapshot_dir>/<title>.jpg`.
pub struct FfmpegCapture {
    ffmpeg: PathBuf,
    uri: String,
    output: PathBuf,
}

impl FfmpegCapture {
    /// Create a capture for `uri`, writing into `snapshot_dir`.
    pub fn new(ffmpeg: &Path, uri: &str, snapshot_dir: &Path, title: &str) -> Self {
        Self {
            ffmpeg: ffmpeg.to_path_buf(),
            uri: uri.to_owned(),
            output: snapshot_dir.join(snapshot_file_name(title)),
        }
    }

    /// Path of the JPEG written by each grab.
    pub fn output(&self) -> &Path {
        &self.output
    }
}

#[async_trait]
impl FrameCapture for FfmpegCapture {
    async fn refresh(&self) -> Result<String, CaptureError> {
        if let Some(parent) = self.output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CaptureError::Read {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let invocation = frame_grab_invocation(&self.ffmpeg, &self.uri, &self.output);
        info!(command = %invocation, "running frame grab");

        let mut cmd = invocation.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let status = tokio::time::timeout(GRAB_TIMEOUT, cmd.status())
            .await
            .map_err(|_| CaptureError::TimedOut(GRAB_TIMEOUT))?
            .map_err(CaptureError::Launch)?;

        if !status.success() {
            error!(%status, "frame grab failed");
            return Err(CaptureError::Failed {
                status: status.to_string(),
            });
        }

        encode_file(&self.output).await
    }

    async fn current(&self) -> Result<String, CaptureError> {
        encode_file(&self.output).await
    }
}

/// Static image capture used for audio-only streams.
pub struct StaticImage {
    path: PathBuf,
}

impl StaticImage {
    /// Serve the image at `path`.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait]
impl FrameCapture for StaticImage {
    async fn refresh(&self) -> Result<String, CaptureError> {
        info!(path = %self.path.display(), "using audio icon as stream image");
        encode_file(&self.path).await
    }

    async fn current(&self) -> Result<String, CaptureError> {
        encode_file(&self.path).await
    }
}

/// File name of a stream's frame grab.
pub fn snapshot_file_name(title: &str) -> String {
    let stem = crate::config::log_file_name(title);
    let stem = stem.strip_suffix(".log").unwrap_or(&stem);
    format!("{stem}.jpg")
}

async fn encode_file(path: &Path) -> Result<String, CaptureError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| CaptureError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}
