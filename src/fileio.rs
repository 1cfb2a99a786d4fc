//! Directory listing, MIME mapping, HTTP range parsing, and HLS playlist URI
//! rewriting — the "read" half of the file surface.
//!
//! The recursive size walk for directory listings follows libunftp's
//! `Filesystem::list` (`storage/filesystem.rs`) for the read-dir-then-stat
//! shape, generalized to recurse and to swallow per-entry I/O errors rather
//! than aborting the whole listing (spec §4.2's "inaccessible entries
//! contribute 0" rule).

use crate::blocklist::BlockList;
use crate::pathguard::PathGuard;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use std::path::Path;

const FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`').add(b'#').add(b'?').add(b'{').add(b'}').add(b'%').add(b'/');

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_count: Option<u64>,
}

pub async fn list_directory(guard: &PathGuard, blocklist: &BlockList, rel_path: &str, download_counts: impl Fn(&str) -> Option<u64>) -> Result<Vec<FileEntry>, crate::error::AppError> {
    let dir_abs = guard.resolve_read(rel_path).await?;
    let mut read_dir = tokio::fs::read_dir(&dir_abs).await.map_err(|_| crate::error::AppError::not_found())?;

    let mut entries = Vec::new();
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let child_abs = entry.path();
        let child_rel = guard.relativize(&child_abs);
        if blocklist.is_blocked(&child_rel).await {
            continue;
        }
        let Ok(meta) = entry.metadata().await else { continue };
        let is_dir = meta.is_dir();
        let size = if is_dir { recursive_dir_size(&child_abs).await } else { meta.len() };
        let mtime = meta.modified().ok().map(DateTime::<Utc>::from).unwrap_or_else(Utc::now);
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push(FileEntry {
            download_count: if is_dir { None } else { download_counts(&child_rel) },
            name,
            path: child_rel,
            is_dir,
            size,
            mtime,
        });
    }

    entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });

    Ok(entries)
}

/// Inaccessible subtrees contribute 0 and don't fail the parent listing.
fn recursive_dir_size(dir: &Path) -> std::pin::Pin<Box<dyn std::future::Future<Output = u64> + Send + '_>> {
    Box::pin(async move {
        let Ok(mut read_dir) = tokio::fs::read_dir(dir).await else {
            return 0;
        };
        let mut total = 0u64;
        let mut joins = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let path = entry.path();
            joins.push(tokio::spawn(async move {
                let Ok(meta) = tokio::fs::symlink_metadata(&path).await else {
                    return 0;
                };
                if meta.is_dir() {
                    recursive_dir_size(&path).await
                } else {
                    meta.len()
                }
            }));
        }
        for j in joins {
            total += j.await.unwrap_or(0);
        }
        total
    })
}

/// Canonical extension -> Content-Type table from spec §6.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    match ext.as_str() {
        "html" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "application/javascript; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "xml" => "application/xml; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "m3u8" => "application/vnd.apple.mpegurl",
        "m3u" => "application/x-mpegurl",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "7z" => "application/x-7z-compressed",
        "rar" => "application/vnd.rar",
        "ts" => "video/mp2t",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No Range header: serve the whole file.
    Full,
    /// A satisfiable single range `[start, end]` inclusive.
    Partial { start: u64, end: u64 },
    /// Unsatisfiable or malformed (multi-range): respond 416.
    Unsatisfiable,
}

/// Parses a single `bytes=START-END` / `bytes=START-` / `bytes=-SUFFIX` spec.
/// Multi-range specs (comma-separated) are rejected per spec §4.2.
pub fn parse_range(header: Option<&str>, size: u64) -> RangeOutcome {
    let Some(header) = header else { return RangeOutcome::Full };
    let Some(spec) = header.strip_prefix("bytes=") else {
        return RangeOutcome::Unsatisfiable;
    };
    if spec.contains(',') {
        return RangeOutcome::Unsatisfiable;
    }
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return RangeOutcome::Unsatisfiable;
    };

    if start_str.is_empty() {
        // bytes=-SUFFIX : last SUFFIX bytes.
        let Ok(suffix) = end_str.parse::<u64>() else {
            return RangeOutcome::Unsatisfiable;
        };
        if suffix == 0 || size == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        let start = size.saturating_sub(suffix);
        return RangeOutcome::Partial { start, end: size - 1 };
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return RangeOutcome::Unsatisfiable;
    };
    if start >= size {
        return RangeOutcome::Unsatisfiable;
    }

    let end = if end_str.is_empty() {
        size - 1
    } else {
        match end_str.parse::<u64>() {
            Ok(e) => e.min(size - 1),
            Err(_) => return RangeOutcome::Unsatisfiable,
        }
    };

    if end < start {
        return RangeOutcome::Unsatisfiable;
    }

    RangeOutcome::Partial { start, end }
}

/// `Content-Disposition: attachment; filename*=UTF-8''<pct-encoded>`
pub fn content_disposition_attachment(filename: &str) -> String {
    format!("attachment; filename*=UTF-8''{}", utf8_percent_encode(filename, FRAGMENT))
}

const SOCIAL_PREVIEW_BOTS: &[&str] = &[
    "discordbot",
    "slackbot",
    "twitterbot",
    "facebookexternalhit",
    "linkedinbot",
    "whatsapp",
    "telegrambot",
    "line",
    "skypeuripreview",
];

pub fn is_social_preview_bot(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    SOCIAL_PREVIEW_BOTS.iter().any(|needle| ua.contains(needle))
}

/// Rewrites a playlist's non-comment URIs and `URI="..."` attributes so the
/// client always fetches segments through `/api/file`. External/absolute/
/// data/blob URIs pass through untouched; Safari resolves relative segment
/// URIs against the *fetched* playlist URL, which would otherwise escape the
/// API when serving a playlist via `/api/file?path=...`.
pub fn rewrite_playlist_uris(content: &str, playlist_rel_path: &str) -> String {
    let playlist_dir = Path::new(playlist_rel_path).parent().unwrap_or_else(|| Path::new(""));
    let uri_attr = regex::Regex::new(r#"URI="([^"]+)""#).unwrap();

    content
        .lines()
        .map(|line| {
            if let Some(caps) = uri_attr.captures(line) {
                let original = &caps[1];
                if is_external_uri(original) {
                    line.to_string()
                } else {
                    let resolved = resolve_relative(playlist_dir, original);
                    let replacement = format!(r#"URI="{}""#, to_api_file_url(&resolved));
                    uri_attr.replace(line, replacement.as_str()).into_owned()
                }
            } else if line.starts_with('#') || line.trim().is_empty() {
                line.to_string()
            } else if is_external_uri(line.trim()) {
                line.to_string()
            } else {
                let resolved = resolve_relative(playlist_dir, line.trim());
                to_api_file_url(&resolved)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_external_uri(uri: &str) -> bool {
    let lower = uri.to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("data:") || lower.starts_with("blob://") || lower.starts_with("//")
}

fn resolve_relative(base_dir: &Path, uri: &str) -> String {
    if uri.starts_with('/') {
        return uri.trim_start_matches('/').to_string();
    }
    let joined = base_dir.join(uri);
    let mut normalized = Vec::new();
    for component in joined.components() {
        match component {
            std::path::Component::ParentDir => {
                normalized.pop();
            }
            std::path::Component::Normal(part) => normalized.push(part.to_string_lossy().into_owned()),
            _ => {}
        }
    }
    normalized.join("/")
}

fn to_api_file_url(rel_path: &str) -> String {
    format!("/api/file?path={}", utf8_percent_encode(rel_path, FRAGMENT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_table_matches_spec() {
        assert_eq!(mime_for_path(Path::new("a.M3U8")), "application/vnd.apple.mpegurl");
        assert_eq!(mime_for_path(Path::new("a.ts")), "video/mp2t");
        assert_eq!(mime_for_path(Path::new("a.unknown")), "application/octet-stream");
    }

    #[test]
    fn range_parsing_s1() {
        // S1: size 10, Range: bytes=2-5 -> Content-Range bytes 2-5/10, len 4
        match parse_range(Some("bytes=2-5"), 10) {
            RangeOutcome::Partial { start, end } => {
                assert_eq!(start, 2);
                assert_eq!(end, 5);
            }
            _ => panic!("expected partial"),
        }
    }

    #[test]
    fn range_open_ended_and_suffix() {
        assert_eq!(parse_range(Some("bytes=5-"), 10), RangeOutcome::Partial { start: 5, end: 9 });
        assert_eq!(parse_range(Some("bytes=-3"), 10), RangeOutcome::Partial { start: 7, end: 9 });
    }

    #[test]
    fn range_rejects_multi_range_and_oob() {
        assert_eq!(parse_range(Some("bytes=0-1,3-4"), 10), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range(Some("bytes=20-30"), 10), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn social_bot_detection() {
        assert!(is_social_preview_bot("Mozilla/5.0 (compatible; Discordbot/2.0;)"));
        assert!(!is_social_preview_bot("Mozilla/5.0 (Windows NT 10.0)"));
    }

    #[test]
    fn playlist_uri_rewrite_passes_through_absolute() {
        let playlist = "#EXTM3U\nhttps://cdn.example.com/seg0.ts\nseg1.ts\n";
        let rewritten = rewrite_playlist_uris(playlist, "videos/show/index.m3u8");
        assert!(rewritten.contains("https://cdn.example.com/seg0.ts"));
        assert!(rewritten.contains("/api/file?path=videos%2Fshow%2Fseg1.ts"));
    }

    #[test]
    fn playlist_uri_attribute_rewrite() {
        let playlist = r#"#EXT-X-KEY:METHOD=AES-128,URI="key.bin""#;
        let rewritten = rewrite_playlist_uris(playlist, "videos/index.m3u8");
        assert!(rewritten.contains(r#"URI="/api/file?path=videos%2Fkey.bin""#));
    }
}
