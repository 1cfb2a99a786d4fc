//! Counters, sliding-window bandwidth, and per-file download tallies.
//!
//! Counters are monotonic atomics; bandwidth uses a `Mutex`-guarded ring of
//! samples pruned on every read, matching libunftp's metrics module (which
//! exposes Prometheus gauges/counters behind an atomic-friendly API) but
//! adding the windowed-average computation the spec calls for.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const BANDWIDTH_WINDOW: Duration = Duration::from_secs(60);
const ACTIVE_CLIENT_TTL: Duration = Duration::from_secs(60);

struct BandwidthSample {
    at: Instant,
    dl_bytes: u64,
    ul_bytes: u64,
}

pub struct Stats {
    total_downloads: AtomicU64,
    total_download_bytes: AtomicU64,
    total_uploads: AtomicU64,
    total_upload_bytes: AtomicU64,
    active_requests: AtomicI64,
    active_clients: DashMap<String, Instant>,
    samples: Mutex<VecDeque<BandwidthSample>>,
    file_downloads: DashMap<String, u64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSnapshot {
    pub total_downloads: u64,
    pub total_download_bytes: u64,
    pub total_uploads: u64,
    pub total_upload_bytes: u64,
    pub active_requests: i64,
    pub active_clients: usize,
    pub download_bytes_per_sec: f64,
    pub upload_bytes_per_sec: f64,
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            total_downloads: AtomicU64::new(0),
            total_download_bytes: AtomicU64::new(0),
            total_uploads: AtomicU64::new(0),
            total_upload_bytes: AtomicU64::new(0),
            active_requests: AtomicI64::new(0),
            active_clients: DashMap::new(),
            samples: Mutex::new(VecDeque::new()),
            file_downloads: DashMap::new(),
        }
    }

    pub fn begin_request(&self, ip: &str) -> RequestGuard<'_> {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        self.touch_client(ip);
        RequestGuard { stats: self }
    }

    fn touch_client(&self, ip: &str) {
        self.active_clients.insert(ip.to_string(), Instant::now());
    }

    pub fn record_download(&self, rel_path: &str, bytes: u64) {
        self.total_downloads.fetch_add(1, Ordering::Relaxed);
        self.total_download_bytes.fetch_add(bytes, Ordering::Relaxed);
        *self.file_downloads.entry(rel_path.to_string()).or_insert(0) += 1;
        self.push_sample(bytes, 0);
    }

    pub fn record_upload(&self, bytes: u64) {
        self.total_uploads.fetch_add(1, Ordering::Relaxed);
        self.total_upload_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.push_sample(0, bytes);
    }

    pub fn file_download_count(&self, rel_path: &str) -> Option<u64> {
        self.file_downloads.get(rel_path).map(|v| *v)
    }

    fn push_sample(&self, dl_bytes: u64, ul_bytes: u64) {
        let mut samples = self.samples.lock().unwrap();
        samples.push_back(BandwidthSample {
            at: Instant::now(),
            dl_bytes,
            ul_bytes,
        });
        Self::evict_old(&mut samples);
    }

    fn evict_old(samples: &mut VecDeque<BandwidthSample>) {
        let cutoff = Instant::now() - BANDWIDTH_WINDOW;
        while let Some(front) = samples.front() {
            if front.at < cutoff {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let now = Instant::now();
        self.active_clients.retain(|_, seen| now.duration_since(*seen) < ACTIVE_CLIENT_TTL);

        let (dl_per_sec, ul_per_sec) = {
            let mut samples = self.samples.lock().unwrap();
            Self::evict_old(&mut samples);
            if let (Some(first), Some(last)) = (samples.front(), samples.back()) {
                let span = last.at.duration_since(first.at).as_secs_f64().max(1.0);
                let dl: u64 = samples.iter().map(|s| s.dl_bytes).sum();
                let ul: u64 = samples.iter().map(|s| s.ul_bytes).sum();
                (dl as f64 / span, ul as f64 / span)
            } else {
                (0.0, 0.0)
            }
        };

        StatsSnapshot {
            total_downloads: self.total_downloads.load(Ordering::Relaxed),
            total_download_bytes: self.total_download_bytes.load(Ordering::Relaxed),
            total_uploads: self.total_uploads.load(Ordering::Relaxed),
            total_upload_bytes: self.total_upload_bytes.load(Ordering::Relaxed),
            active_requests: self.active_requests.load(Ordering::Relaxed),
            active_clients: self.active_clients.len(),
            download_bytes_per_sec: dl_per_sec,
            upload_bytes_per_sec: ul_per_sec,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements `active_requests` when dropped, on every exit path including errors.
pub struct RequestGuard<'a> {
    stats: &'a Stats,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.stats.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_requests_decrements_on_drop() {
        let stats = Stats::new();
        {
            let _g1 = stats.begin_request("1.1.1.1");
            let _g2 = stats.begin_request("1.1.1.1");
            assert_eq!(stats.snapshot().active_requests, 2);
        }
        assert_eq!(stats.snapshot().active_requests, 0);
    }

    #[test]
    fn counters_are_monotonic() {
        let stats = Stats::new();
        stats.record_download("a.txt", 100);
        stats.record_download("a.txt", 50);
        let snap = stats.snapshot();
        assert_eq!(snap.total_downloads, 2);
        assert_eq!(snap.total_download_bytes, 150);
        assert_eq!(stats.file_download_count("a.txt"), Some(2));
    }
}
