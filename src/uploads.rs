//! Filename sanitization, unique-name allocation, and quota/disk
//! enforcement for multipart uploads. The HTTP handler owns pulling bytes
//! out of the `axum::extract::Multipart` stream; this module is the part
//! that's meaningfully testable without one.

use crate::disk::{DiskProbe, Scope};
use crate::error::{AppError, AppErrorKind};
use crate::pathguard::PathGuard;
use std::path::{Path, PathBuf};

const CONTROL_CHARS: std::ops::RangeInclusive<char> = '\u{0000}'..='\u{001F}';
const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Strips directory components, control characters, and filesystem-hostile
/// characters from a client-supplied filename.
pub fn sanitize_filename(raw: &str) -> Result<String, AppError> {
    let basename = Path::new(raw).file_name().and_then(|n| n.to_str()).unwrap_or(raw);

    let mut cleaned = String::with_capacity(basename.len());
    for ch in basename.chars() {
        if CONTROL_CHARS.contains(&ch) {
            continue;
        }
        if RESERVED_CHARS.contains(&ch) {
            cleaned.push('_');
        } else {
            cleaned.push(ch);
        }
    }
    let trimmed = cleaned.trim().to_string();

    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return Err(AppError::invalid_input("invalid filename"));
    }
    Ok(trimmed)
}

/// Finds the first available sibling of `dir/filename`, probing
/// `name (1).ext`, `name (2).ext`, … when the candidate already exists.
pub async fn allocate_unique_path(dir_abs: &Path, filename: &str) -> PathBuf {
    let candidate = dir_abs.join(filename);
    if tokio::fs::metadata(&candidate).await.is_err() {
        return candidate;
    }

    let path = Path::new(filename);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
    let ext = path.extension().and_then(|e| e.to_str());

    let mut n = 1u32;
    loop {
        let name = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let probe = dir_abs.join(&name);
        if tokio::fs::metadata(&probe).await.is_err() {
            return probe;
        }
        n += 1;
    }
}

pub struct UploadOutcome {
    pub rel_path: String,
    pub size: u64,
}

/// Runs the full ingest pipeline: resolves the target directory, sanitizes
/// and uniquifies the filename, checks quota/disk headroom against the
/// declared size, writes the bytes, and invalidates the disk cache.
pub async fn ingest(guard: &PathGuard, disk: &DiskProbe, target_dir_rel: &str, raw_filename: &str, max_file_size_bytes: u64, quota_bytes: u64, bytes: &[u8]) -> Result<UploadOutcome, AppError> {
    if bytes.len() as u64 > max_file_size_bytes {
        return Err(AppError::new(AppErrorKind::QuotaExceededQuota));
    }

    let dir_abs = guard.resolve_read(target_dir_rel).await?;
    if !dir_abs.is_dir() {
        return Err(AppError::invalid_input("target is not a directory"));
    }

    let filename = sanitize_filename(raw_filename)?;
    let info = disk.snapshot(guard, quota_bytes, max_file_size_bytes).await;

    match info.scope {
        Scope::Quota if info.free == 0 => return Err(AppError::new(AppErrorKind::QuotaExceededQuota)),
        Scope::Quota if bytes.len() as u64 > info.free => return Err(AppError::new(AppErrorKind::QuotaExceededQuota)),
        Scope::Disk if (bytes.len() as u64) > info.free => return Err(AppError::new(AppErrorKind::QuotaExceededDisk)),
        _ => {}
    }

    let target_abs = allocate_unique_path(&dir_abs, &filename).await;
    tokio::fs::write(&target_abs, bytes).await?;
    disk.invalidate();

    Ok(UploadOutcome {
        rel_path: guard.relativize(&target_abs),
        size: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_reserved_characters_and_paths() {
        assert_eq!(sanitize_filename("a/b.txt").unwrap(), "b.txt");
        assert_eq!(sanitize_filename("weird:name*?.txt").unwrap(), "weird_name__.txt");
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("").is_err());
    }

    #[test]
    fn strips_control_characters() {
        let raw = "bad\u{0007}name.txt";
        assert_eq!(sanitize_filename(raw).unwrap(), "badname.txt");
    }

    #[tokio::test]
    async fn allocates_incrementing_suffix_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("b.txt"), b"x").await.unwrap();
        let allocated = allocate_unique_path(dir.path(), "b.txt").await;
        assert_eq!(allocated.file_name().unwrap().to_str().unwrap(), "b (1).txt");
    }
}
