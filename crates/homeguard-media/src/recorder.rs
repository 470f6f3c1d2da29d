//! Short intrusion recordings built from client-posted frames.
//!
//! Frames arrive as JPEGs on `/record_frame`; the recorder samples the
//! latest one at a fixed rate and pipes it into an `ffmpeg` child that
//! writes an XVID-tagged MPEG-4 AVI.

use crate::frame::LatestFrame;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

pub const DEFAULT_DURATION: Duration = Duration::from_secs(11);
pub const DEFAULT_FPS: u32 = 10;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("a recording is already in progress")]
    Busy,
    #[error("failed to create {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ffmpeg pipe closed: {0}")]
    Pipe(#[source] std::io::Error),
    #[error("ffmpeg exited with {code:?}: {stderr}")]
    Encoder { code: Option<i32>, stderr: String },
}

/// Clears the active flag when the recording ends, however it ends.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Intrusion video recorder. Clones share the "recording in progress" flag.
#[derive(Clone)]
pub struct Recorder {
    output_dir: PathBuf,
    duration: Duration,
    fps: u32,
    ffmpeg: String,
    active: Arc<AtomicBool>,
}

impl Recorder {
    pub fn new(output_dir: impl Into<PathBuf>, duration: Duration, fps: u32) -> Self {
        Self {
            output_dir: output_dir.into(),
            duration,
            fps: fps.max(1),
            ffmpeg: "ffmpeg".to_string(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the encoder binary (default: `ffmpeg` on `PATH`).
    pub fn with_ffmpeg(mut self, program: impl Into<String>) -> Self {
        self.ffmpeg = program.into();
        self
    }

    pub fn is_recording(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Record `latest` for the configured duration.
    ///
    /// Returns the video path, or `None` when no frame arrived at all.
    /// Fails with [`RecorderError::Busy`] while another recording runs.
    pub async fn record(&self, latest: &LatestFrame) -> Result<Option<PathBuf>, RecorderError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RecorderError::Busy);
        }
        let _guard = ActiveGuard(self.active.clone());

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| RecorderError::OutputDir { path: self.output_dir.clone(), source })?;

        let unix = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let output = self.output_dir.join(format!("intruder_{unix}.avi"));

        let mut ticker = tokio::time::interval(Duration::from_secs(1) / self.fps);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let deadline = tokio::time::Instant::now() + self.duration;

        let mut encoder: Option<(Child, ChildStdin)> = None;
        let mut written = 0u32;

        while tokio::time::Instant::now() < deadline {
            ticker.tick().await;
            let Some(frame) = latest.get() else {
                continue;
            };

            if encoder.is_none() {
                encoder = Some(self.spawn_encoder(&output)?);
                tracing::info!(path = %output.display(), fps = self.fps, "intrusion recording started");
            }
            if let Some((_, stdin)) = encoder.as_mut() {
                stdin.write_all(&frame).await.map_err(RecorderError::Pipe)?;
                written += 1;
            }
        }

        let Some((child, mut stdin)) = encoder else {
            tracing::warn!("no frames received during recording window; nothing saved");
            return Ok(None);
        };

        stdin.shutdown().await.map_err(RecorderError::Pipe)?;
        drop(stdin);
        let out = child.wait_with_output().await.map_err(RecorderError::Pipe)?;
        if !out.status.success() {
            return Err(RecorderError::Encoder {
                code: out.status.code(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }

        tracing::info!(path = %output.display(), frames = written, "video saved");
        Ok(Some(output))
    }

    fn spawn_encoder(&self, output: &Path) -> Result<(Child, ChildStdin), RecorderError> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args([
            "-y",
            "-loglevel", "error",
            "-f", "image2pipe",
            "-framerate", &self.fps.to_string(),
            "-i", "-",
            "-c:v", "mpeg4",
            "-vtag", "xvid",
            "-q:v", "5",
            "-pix_fmt", "yuv420p",
        ])
        .arg(output)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| RecorderError::Spawn {
            program: self.ffmpeg.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or_else(|| RecorderError::Spawn {
            program: self.ffmpeg.clone(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "no stdin"),
        })?;
        Ok((child, stdin))
    }
}
