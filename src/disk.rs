//! Disk/quota accounting: either the filesystem's free-space syscall, or
//! (when a directory quota is configured) a cached recursive walk of the
//! share.

use crate::pathguard::PathGuard;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DISK_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Disk,
    Quota,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInfo {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub used_percent: f64,
    pub max_upload: u64,
    pub max_file_size: u64,
    pub scope: Scope,
    pub quota_bytes: u64,
}

pub struct DiskProbe {
    cached: Mutex<Option<(Instant, DiskInfo)>>,
}

impl DiskProbe {
    pub fn new() -> Self {
        DiskProbe { cached: Mutex::new(None) }
    }

    pub fn invalidate(&self) {
        *self.cached.lock().unwrap() = None;
    }

    /// Returns the last-cached value on probe failure rather than an error,
    /// per spec §7's "disk probing falls back to the last cached DiskInfo".
    pub async fn snapshot(&self, guard: &PathGuard, quota_bytes: u64, max_file_size_bytes: u64) -> DiskInfo {
        if let Some((at, cached)) = *self.cached.lock().unwrap() {
            if at.elapsed() < DISK_CACHE_TTL {
                return cached;
            }
        }

        let fresh = self.compute(guard, quota_bytes, max_file_size_bytes).await;
        match fresh {
            Some(info) => {
                *self.cached.lock().unwrap() = Some((Instant::now(), info));
                info
            }
            None => self.cached.lock().unwrap().map(|(_, info)| info).unwrap_or(DiskInfo {
                total: 0,
                free: 0,
                used: 0,
                used_percent: 0.0,
                max_upload: 0,
                max_file_size: max_file_size_bytes,
                scope: Scope::Disk,
                quota_bytes,
            }),
        }
    }

    async fn compute(&self, guard: &PathGuard, quota_bytes: u64, max_file_size_bytes: u64) -> Option<DiskInfo> {
        let physical = physical_free_total(guard.root())?;

        if quota_bytes > 0 {
            let used = recursive_size(guard.root()).await;
            let free = quota_bytes.saturating_sub(used);
            let max_upload = free.min(physical.1).min(max_file_size_bytes);
            let used_percent = if quota_bytes == 0 { 0.0 } else { (used as f64 / quota_bytes as f64) * 100.0 };
            Some(DiskInfo {
                total: quota_bytes,
                free,
                used,
                used_percent,
                max_upload,
                max_file_size: max_file_size_bytes,
                scope: Scope::Quota,
                quota_bytes,
            })
        } else {
            let (total, free) = physical;
            let used = total.saturating_sub(free);
            let used_percent = if total == 0 { 0.0 } else { (used as f64 / total as f64) * 100.0 };
            Some(DiskInfo {
                total,
                free,
                used,
                used_percent,
                max_upload: free.min(max_file_size_bytes),
                max_file_size: max_file_size_bytes,
                scope: Scope::Disk,
                quota_bytes,
            })
        }
    }
}

impl Default for DiskProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn physical_free_total(path: &std::path::Path) -> Option<(u64, u64)> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    let block_size = stat.fragment_size().max(1);
    let total = stat.blocks() * block_size;
    let free = stat.blocks_available() * block_size;
    Some((total, free))
}

#[cfg(not(unix))]
fn physical_free_total(_path: &std::path::Path) -> Option<(u64, u64)> {
    None
}

fn recursive_size(dir: &std::path::Path) -> std::pin::Pin<Box<dyn std::future::Future<Output = u64> + Send + '_>> {
    Box::pin(async move {
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            return 0;
        };
        let mut total = 0u64;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else { continue };
            if meta.is_dir() {
                total += recursive_size(&entry.path()).await;
            } else {
                total += meta.len();
            }
        }
        total
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_used_percent_computation() {
        let used_percent = (250_000_000u64 as f64 / 1_000_000_000f64) * 100.0;
        assert_eq!(used_percent, 25.0);
    }
}
