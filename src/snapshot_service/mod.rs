//! SnapshotService - single frame capture
//!
//! ## Responsibilities
//!
//! - RTSP snapshot capture using ffmpeg (`-frames:v 1`, process killed on timeout)
//! - HTTP snapshot URLs fetched directly
//! - Local still images read from disk, local video files decoded by ffmpeg
//!
//! No connection is kept between captures: every call opens the source,
//! takes one frame and releases it.

use crate::error::{Error, Result};
use crate::interfaces::FrameSource;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "webp", "gif"];

/// How a stream address is captured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    /// ffmpeg over RTSP (TCP transport)
    Rtsp,
    /// ffmpeg on any other input (HTTP video, local video file)
    Ffmpeg,
    /// Plain HTTP GET of a still image
    Http,
    /// Still image on the local filesystem
    File(PathBuf),
}

impl SnapshotSource {
    /// Classify a stream address
    pub fn classify(stream_url: &str) -> Self {
        let url = stream_url.trim();
        let lower = url.to_ascii_lowercase();

        if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
            return SnapshotSource::Rtsp;
        }

        if lower.starts_with("http://") || lower.starts_with("https://") {
            let path = lower.split(['?', '#']).next().unwrap_or_default();
            if has_image_extension(path) || path.contains("snapshot") {
                return SnapshotSource::Http;
            }
            return SnapshotSource::Ffmpeg;
        }

        let path = url.strip_prefix("file://").unwrap_or(url);
        if has_image_extension(&path.to_ascii_lowercase()) {
            SnapshotSource::File(PathBuf::from(path))
        } else {
            SnapshotSource::Ffmpeg
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSource::Rtsp => "rtsp",
            SnapshotSource::Ffmpeg => "ffmpeg",
            SnapshotSource::Http => "http",
            SnapshotSource::File(_) => "file",
        }
    }
}

fn has_image_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// SnapshotService instance
pub struct SnapshotService {
    /// HTTP client for snapshot URLs
    client: reqwest::Client,
    /// ffmpeg process timeout
    ffmpeg_timeout: Duration,
}

impl SnapshotService {
    /// Create new SnapshotService
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            ffmpeg_timeout: timeout,
        })
    }

    /// Capture one frame from a stream address
    pub async fn capture(&self, stream_url: &str) -> Result<Vec<u8>> {
        let source = SnapshotSource::classify(stream_url);
        let started = std::time::Instant::now();

        let data = match &source {
            SnapshotSource::Rtsp => self.capture_ffmpeg(stream_url, true).await?,
            SnapshotSource::Ffmpeg => {
                let input = stream_url.strip_prefix("file://").unwrap_or(stream_url);
                self.capture_ffmpeg(input, false).await?
            }
            SnapshotSource::Http => self.capture_http(stream_url).await?,
            SnapshotSource::File(path) => self.capture_file(path).await?,
        };

        if data.is_empty() {
            return Err(Error::Capture(format!(
                "empty frame from {} source",
                source.as_str()
            )));
        }

        tracing::debug!(
            source = source.as_str(),
            size = data.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Frame captured"
        );

        Ok(data)
    }

    /// Capture one frame with ffmpeg
    ///
    /// kill_on_drop(true): when the timeout fires the Child is dropped and
    /// the ffmpeg process is killed with it.
    async fn capture_ffmpeg(&self, input: &str, rtsp: bool) -> Result<Vec<u8>> {
        use std::process::Stdio;

        let mut args: Vec<&str> = Vec::with_capacity(14);
        if rtsp {
            args.extend(["-rtsp_transport", "tcp"]);
        }
        args.extend([
            "-i", input,
            "-frames:v", "1",
            "-f", "image2pipe",
            "-vcodec", "mjpeg",
            "-loglevel", "error",
            "-y",
            "-",
        ]);

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Capture(format!("ffmpeg spawn failed: {}", e)))?;

        match tokio::time::timeout(self.ffmpeg_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(Error::Capture(format!("ffmpeg failed: {}", stderr.trim())));
                }
                Ok(output.stdout)
            }
            Ok(Err(e)) => Err(Error::Capture(format!("ffmpeg execution failed: {}", e))),
            Err(_) => {
                tracing::warn!(
                    timeout_sec = self.ffmpeg_timeout.as_secs(),
                    "ffmpeg timeout, process killed"
                );
                Err(Error::Capture(format!(
                    "ffmpeg timeout ({}s)",
                    self.ffmpeg_timeout.as_secs()
                )))
            }
        }
    }

    async fn capture_http(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Capture(format!("snapshot request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Capture(format!(
                "snapshot HTTP error: {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Capture(format!("snapshot body read failed: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn capture_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
            .await
            .map_err(|e| Error::Capture(format!("cannot read {}: {}", path.display(), e)))
    }

    /// Check if ffmpeg is available
    pub async fn check_ffmpeg() -> Result<String> {
        let output = Command::new("ffmpeg")
            .arg("-version")
            .output()
            .await
            .map_err(|e| Error::Internal(format!("ffmpeg not found: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Internal("ffmpeg version check failed".to_string()));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        let first_line = version.lines().next().unwrap_or("unknown");
        Ok(first_line.to_string())
    }
}

impl FrameSource for SnapshotService {
    fn capture_frame<'a>(&'a self, stream_url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        self.capture(stream_url).boxed()
    }
}
