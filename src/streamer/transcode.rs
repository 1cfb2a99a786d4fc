//! Transcoder child-process invocation and the counting semaphore that caps
//! concurrent encodes.
//!
//! The transcoder binary is a required external collaborator (spec'd
//! argument contract only); its absence is a distinct [`AppErrorKind`],
//! surfaced to callers as 501/502 rather than a generic I/O failure.

use crate::error::{AppError, AppErrorKind};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::process::Command;
use tokio::sync::Semaphore;

const DEFAULT_PRESET: &str = "veryfast";

pub struct TranscoderPool {
    binary: String,
    semaphore: Arc<Semaphore>,
    preset: std::sync::Mutex<String>,
}

impl TranscoderPool {
    pub fn new(binary: String, max_concurrent: usize) -> Self {
        TranscoderPool {
            binary,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            preset: std::sync::Mutex::new(DEFAULT_PRESET.to_string()),
        }
    }

    pub fn set_preset(&self, preset: impl Into<String>) {
        *self.preset.lock().unwrap() = preset.into();
    }

    fn preset(&self) -> String {
        self.preset.lock().unwrap().clone()
    }

    /// Stream-copies a single segment; on failure, re-attempts with a full
    /// transcode using the configured preset. At most two of these run
    /// concurrently, FIFO-queued via the semaphore.
    pub async fn generate_segment(&self, source: &Path, index: u32, seg_sec: u64, out_path: &Path) -> Result<(), AppError> {
        let _permit = self.semaphore.acquire().await.map_err(|_| AppError::new(AppErrorKind::UpstreamIoError))?;

        if self.run_copy(source, index, seg_sec, out_path).await.is_ok() {
            return Ok(());
        }
        self.run_transcode(source, index, seg_sec, out_path).await
    }

    async fn run_copy(&self, source: &Path, index: u32, seg_sec: u64, out_path: &Path) -> Result<(), AppError> {
        let start = index as u64 * seg_sec;
        let output = spawn(&self.binary)?
            .arg("-y")
            .arg("-ss")
            .arg(start.to_string())
            .arg("-i")
            .arg(source)
            .arg("-t")
            .arg(format!("{}", seg_sec as f64 + 0.5))
            .arg("-c:v")
            .arg("copy")
            .arg("-c:a")
            .arg("copy")
            .arg("-f")
            .arg("mpegts")
            .arg(out_path)
            .output()
            .await
            .map_err(|_| AppError::new(AppErrorKind::TranscoderMissing))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(AppError::new(AppErrorKind::UpstreamIoError))
        }
    }

    async fn run_transcode(&self, source: &Path, index: u32, seg_sec: u64, out_path: &Path) -> Result<(), AppError> {
        let start = index as u64 * seg_sec;
        let preset = self.preset();
        let output = spawn(&self.binary)?
            .arg("-y")
            .arg("-ss")
            .arg(start.to_string())
            .arg("-i")
            .arg(source)
            .arg("-t")
            .arg(format!("{}", seg_sec as f64 + 0.5))
            .arg("-preset")
            .arg(preset)
            .arg("-crf")
            .arg("26")
            .arg("-profile:v")
            .arg("main")
            .arg("-level")
            .arg("4.0")
            .arg("-g")
            .arg("60")
            .arg("-keyint_min")
            .arg("60")
            .arg("-c:v")
            .arg("libx264")
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg("96k")
            .arg("-ac")
            .arg("2")
            .arg("-movflags")
            .arg("+faststart")
            .arg("-f")
            .arg("mpegts")
            .arg(out_path)
            .output()
            .await
            .map_err(|_| AppError::new(AppErrorKind::TranscoderMissing))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(AppError::new(AppErrorKind::UpstreamIoError))
        }
    }
}

fn spawn(binary: &str) -> Result<Command, AppError> {
    Ok(Command::new(binary))
}

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Duration:\s*(\d+):(\d+):(\d+(?:\.\d+)?)").unwrap())
}

/// Probes a source's duration by invoking the transcoder with `-i` and no
/// output, then parsing `Duration: HH:MM:SS.f` from its stderr.
pub async fn probe_duration(pool: &TranscoderPool, source: &Path) -> Result<f64, AppError> {
    let output = Command::new(&pool.binary)
        .arg("-i")
        .arg(source)
        .output()
        .await
        .map_err(|_| AppError::new(AppErrorKind::TranscoderMissing))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    parse_duration_from_stderr(&stderr).ok_or_else(|| AppError::new(AppErrorKind::UpstreamIoError))
}

fn parse_duration_from_stderr(stderr: &str) -> Option<f64> {
    let caps = duration_pattern().captures(stderr)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffmpeg_duration_line() {
        let stderr = "Input #0, mov,mp4,m4a...\n  Duration: 00:02:03.45, start: 0.000000, bitrate: 1234 kb/s\n";
        assert_eq!(parse_duration_from_stderr(stderr), Some(123.45));
    }

    #[test]
    fn missing_duration_line_is_none() {
        assert_eq!(parse_duration_from_stderr("no duration here"), None);
    }
}
