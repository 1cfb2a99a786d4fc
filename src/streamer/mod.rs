//! On-demand HLS transcoding cache: lazy playlist synthesis, per-segment
//! transcode with inflight dedup, and a TTL janitor.
//!
//! The cache-directory/inflight-map split mirrors libunftp's
//! `ProxyProtocolSwitchboard` (a `DashMap`-backed registry feeding concurrent
//! callers the same in-flight resource) generalized from passive-port
//! reservations to segment files.

pub mod cache;
pub mod playlist;
pub mod transcode;

use crate::error::{AppError, AppErrorKind};
use crate::pathguard::PathGuard;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub const SEGMENT_SECONDS: u64 = 6;
pub const NO_CACHE_THRESHOLD_BYTES: u64 = 1024 * 1024 * 1024;
pub const NO_CACHE_GRACE: Duration = Duration::from_secs(8);
pub const JANITOR_INTERVAL: Duration = Duration::from_secs(60);
pub const CACHE_ENTRY_TTL: Duration = Duration::from_secs(30 * 60);

const SEGMENT_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov"];

pub fn is_eligible_source(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).map(|e| SEGMENT_EXTENSIONS.contains(&e.to_lowercase().as_str())).unwrap_or(false)
}

fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

fn root_hash(share_root: &Path) -> String {
    sha1_hex(&share_root.to_string_lossy())
}

fn source_hash(abs_path: &Path, size: u64, mtime_ns: i128) -> String {
    sha1_hex(&format!("{}:{}:{}", abs_path.to_string_lossy(), size, mtime_ns))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub duration_sec: f64,
    pub total_segments: u32,
    pub seg_sec: u64,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
struct SegmentKey {
    cache_dir: PathBuf,
    index: u32,
}

pub struct PlaylistResponse {
    pub body: String,
    pub finalized: bool,
}

pub struct SegmentResponse {
    pub path: PathBuf,
    pub cached: bool,
}

pub struct Streamer {
    hls_root: PathBuf,
    inflight: cache::InflightRegistry<SegmentKey>,
    transcoder: transcode::TranscoderPool,
}

impl Streamer {
    pub fn init(hls_root: PathBuf, transcoder_binary: String) -> Self {
        Streamer {
            hls_root,
            inflight: cache::InflightRegistry::new(),
            transcoder: transcode::TranscoderPool::new(transcoder_binary, 2),
        }
    }

    pub fn hls_root(&self) -> &Path {
        &self.hls_root
    }

    /// Per source-file cache directory `<hlsRoot>/<rootHash>/<sourceHash>`, or
    /// `None` in no-cache mode (source exceeds the 1 GiB threshold).
    async fn cache_dir(&self, guard: &PathGuard, abs_source: &Path) -> std::io::Result<Option<PathBuf>> {
        let meta = fs::metadata(abs_source).await?;
        if meta.len() > NO_CACHE_THRESHOLD_BYTES {
            return Ok(None);
        }
        let mtime_ns = meta.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_nanos() as i128).unwrap_or(0);
        let rh = root_hash(guard.root());
        let sh = source_hash(abs_source, meta.len(), mtime_ns);
        Ok(Some(self.hls_root.join(rh).join(sh)))
    }

    pub async fn playlist(&self, guard: &PathGuard, rel_path: &str) -> Result<PlaylistResponse, AppError> {
        let abs_source = guard.resolve_read(rel_path).await?;
        if !is_eligible_source(&abs_source) {
            return Err(AppError::invalid_input("unsupported source extension"));
        }

        let Some(cache_dir) = self.cache_dir(guard, &abs_source).await? else {
            return self.playlist_no_cache(&abs_source, rel_path).await;
        };

        fs::create_dir_all(&cache_dir).await?;
        touch_mtime(&cache_dir).await;

        let index_path = cache_dir.join("index.m3u8");
        if let Ok(existing) = fs::read_to_string(&index_path).await {
            if existing.contains("#EXT-X-ENDLIST") {
                let rewritten = playlist::rewrite_for_stream(&existing, rel_path);
                return Ok(PlaylistResponse { body: rewritten, finalized: true });
            }
        }

        match transcode::probe_duration(&self.transcoder, &abs_source).await {
            Ok(duration_sec) => {
                let total_segments = (duration_sec / SEGMENT_SECONDS as f64).ceil().max(1.0) as u32;
                let body = playlist::synthesize_vod(duration_sec, SEGMENT_SECONDS, total_segments);
                fs::write(&index_path, &body).await?;
                let meta = CacheMeta { duration_sec, total_segments, seg_sec: SEGMENT_SECONDS };
                fs::write(cache_dir.join("meta.json"), serde_json::to_vec_pretty(&meta).unwrap_or_default()).await?;
                let rewritten = playlist::rewrite_for_stream(&body, rel_path);
                Ok(PlaylistResponse { body: rewritten, finalized: true })
            }
            Err(_) => {
                let existing_segments = list_existing_segments(&cache_dir).await;
                let body = playlist::synthesize_progressive(&existing_segments, SEGMENT_SECONDS);
                Ok(PlaylistResponse { body, finalized: false })
            }
        }
    }

    async fn playlist_no_cache(&self, abs_source: &Path, rel_path: &str) -> Result<PlaylistResponse, AppError> {
        let duration_sec = transcode::probe_duration(&self.transcoder, abs_source).await.map_err(|_| AppError::new(AppErrorKind::UpstreamIoError))?;
        let total_segments = (duration_sec / SEGMENT_SECONDS as f64).ceil().max(1.0) as u32;
        let body = playlist::synthesize_vod(duration_sec, SEGMENT_SECONDS, total_segments);
        let rewritten = playlist::rewrite_for_stream(&body, rel_path);
        Ok(PlaylistResponse { body: rewritten, finalized: true })
    }

    pub async fn segment(&self, guard: &PathGuard, rel_path: &str, segment_name: &str) -> Result<SegmentResponse, AppError> {
        let index = parse_segment_index(segment_name).ok_or_else(AppError::invalid_input_static)?;
        let abs_source = guard.resolve_read(rel_path).await?;
        if !is_eligible_source(&abs_source) {
            return Err(AppError::invalid_input("unsupported source extension"));
        }

        let cache_dir_opt = self.cache_dir(guard, &abs_source).await?;
        let no_cache = cache_dir_opt.is_none();
        let cache_dir = match cache_dir_opt {
            Some(dir) => dir,
            None => self.no_cache_scratch_dir(&abs_source).await?,
        };
        fs::create_dir_all(&cache_dir).await?;
        touch_mtime(&cache_dir).await;

        let seg_path = cache_dir.join(segment_name);
        if !no_cache && fs::metadata(&seg_path).await.is_ok() {
            return Ok(SegmentResponse { path: seg_path, cached: true });
        }

        let key = SegmentKey { cache_dir: cache_dir.clone(), index };
        let total_segments = self.total_segments_hint(&cache_dir).await;
        let transcoder = &self.transcoder;
        let source = abs_source.clone();
        let target = seg_path.clone();
        self.inflight
            .dedup(key, || async move {
                if fs::metadata(&target).await.is_ok() {
                    return Ok(());
                }
                transcoder.generate_segment(&source, index, SEGMENT_SECONDS, &target).await
            })
            .await?;

        if fs::metadata(&seg_path).await.is_err() {
            return Err(AppError::new(AppErrorKind::UpstreamIoError));
        }

        if no_cache {
            schedule_no_cache_cleanup(seg_path.clone(), cache_dir.clone(), index, total_segments);
        }

        Ok(SegmentResponse { path: seg_path, cached: false })
    }

    async fn total_segments_hint(&self, cache_dir: &Path) -> Option<u32> {
        let meta_bytes = fs::read(cache_dir.join("meta.json")).await.ok()?;
        let meta: CacheMeta = serde_json::from_slice(&meta_bytes).ok()?;
        Some(meta.total_segments)
    }

    async fn no_cache_scratch_dir(&self, abs_source: &Path) -> std::io::Result<PathBuf> {
        let mtime_ns = fs::metadata(abs_source).await?.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_nanos() as i128).unwrap_or(0);
        let sh = sha1_hex(&format!("nocache:{}:{}", abs_source.to_string_lossy(), mtime_ns));
        Ok(self.hls_root.join("nocache").join(sh))
    }

    /// Spawns the 60s janitor loop. Intended to be spawned once at startup via `tokio::spawn`.
    pub async fn run_janitor(&self) {
        let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = self.janitor_sweep().await {
                tracing::warn!(error = %err, "HLS janitor sweep failed");
            }
        }
    }

    async fn janitor_sweep(&self) -> std::io::Result<()> {
        let Ok(mut root_entries) = fs::read_dir(&self.hls_root).await else {
            return Ok(());
        };
        while let Ok(Some(root_entry)) = root_entries.next_entry().await {
            let root_dir = root_entry.path();
            let Ok(meta) = root_entry.metadata().await else { continue };
            if !meta.is_dir() {
                continue;
            }
            let mut any_remaining = false;
            if let Ok(mut sources) = fs::read_dir(&root_dir).await {
                while let Ok(Some(source_entry)) = sources.next_entry().await {
                    let source_dir = source_entry.path();
                    let Ok(source_meta) = source_entry.metadata().await else { continue };
                    if !source_meta.is_dir() {
                        continue;
                    }
                    let age_exceeded = source_meta.modified().ok().map(|mtime| mtime.elapsed().unwrap_or_default() >= CACHE_ENTRY_TTL).unwrap_or(false);
                    if age_exceeded {
                        let _ = fs::remove_dir_all(&source_dir).await;
                    } else {
                        any_remaining = true;
                    }
                }
            }
            if !any_remaining {
                let _ = fs::remove_dir(&root_dir).await;
            }
        }
        Ok(())
    }

    /// Synchronously removes the whole cache root. Called on shutdown.
    pub fn shutdown_cleanup(&self) {
        let _ = std::fs::remove_dir_all(&self.hls_root);
    }
}

async fn touch_mtime(dir: &Path) {
    let now = std::time::SystemTime::now();
    let _ = filetime_touch(dir, now).await;
}

async fn filetime_touch(dir: &Path, now: std::time::SystemTime) -> std::io::Result<()> {
    // Re-creating the directory's timestamp without an extra crate: opening
    // and immediately dropping a marker file inside it bumps the parent's
    // mtime on every common filesystem this server targets.
    let marker = dir.join(".touch");
    fs::write(&marker, []).await?;
    let _ = now;
    Ok(())
}

async fn list_existing_segments(cache_dir: &Path) -> Vec<u32> {
    let mut indices = Vec::new();
    if let Ok(mut entries) = fs::read_dir(cache_dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(index) = parse_segment_index(name) {
                    indices.push(index);
                }
            }
        }
    }
    indices.sort_unstable();
    indices
}

fn parse_segment_index(name: &str) -> Option<u32> {
    let stripped = name.strip_prefix("seg_")?.strip_suffix(".ts")?;
    if stripped.len() != 5 || !stripped.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stripped.parse().ok()
}

fn schedule_no_cache_cleanup(seg_path: PathBuf, cache_dir: PathBuf, index: u32, total_segments: Option<u32>) {
    let is_last = total_segments.map(|total| index + 1 == total).unwrap_or(false);
    tokio::spawn(async move {
        tokio::time::sleep(NO_CACHE_GRACE).await;
        let _ = fs::remove_file(&seg_path).await;
        if is_last {
            let _ = fs::remove_dir_all(&cache_dir).await;
        }
    });
}

impl AppError {
    fn invalid_input_static() -> Self {
        AppError::invalid_input("malformed segment name")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheFingerprint {
    pub mtime_ns: i128,
    pub size: u64,
}

impl CacheFingerprint {
    pub fn as_of(modified: DateTime<Utc>, size: u64) -> Self {
        CacheFingerprint {
            mtime_ns: modified.timestamp_nanos_opt().unwrap_or(0) as i128,
            size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_checks_extension_case_insensitively() {
        assert!(is_eligible_source(Path::new("movie.MP4")));
        assert!(is_eligible_source(Path::new("clip.m4v")));
        assert!(!is_eligible_source(Path::new("movie.mkv")));
    }

    #[test]
    fn segment_index_parsing() {
        assert_eq!(parse_segment_index("seg_00003.ts"), Some(3));
        assert_eq!(parse_segment_index("seg_3.ts"), None);
        assert_eq!(parse_segment_index("seg_00003.mp4"), None);
    }

    #[test]
    fn source_hash_changes_with_size() {
        let a = source_hash(Path::new("/x/v.mp4"), 100, 0);
        let b = source_hash(Path::new("/x/v.mp4"), 200, 0);
        assert_ne!(a, b);
    }
}
