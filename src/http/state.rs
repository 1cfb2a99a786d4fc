//! Shared, cheaply-cloneable application state handed to every axum handler.

use crate::auth::Auth;
use crate::blocklist::BlockList;
use crate::disk::DiskProbe;
use crate::pathguard::PathGuard;
use crate::ratelimit::RateLimiter;
use crate::settings::Settings;
use crate::stats::Stats;
use crate::streamer::Streamer;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<PathGuard>,
    pub blocklist: Arc<BlockList>,
    pub auth: Arc<Auth>,
    pub stats: Arc<Stats>,
    pub rate_limiter: Arc<RateLimiter>,
    pub settings: Arc<Settings>,
    pub streamer: Arc<Streamer>,
    pub disk: Arc<DiskProbe>,
}

impl AppState {
    pub async fn uploads_config(&self) -> (u64, u64) {
        let module = self.settings.get("uploads").await;
        let max_file_size = module.get("maxFileSizeBytes").and_then(|v| v.as_u64()).unwrap_or(10 * 1024 * 1024 * 1024);
        let quota = module.get("directoryQuotaBytes").and_then(|v| v.as_u64()).unwrap_or(0);
        (max_file_size, quota)
    }

    pub async fn proxy_v2_enabled(&self) -> bool {
        let module = self.settings.get("haproxy").await;
        module.get("proxyProtocolV2").and_then(|v| v.as_bool()).unwrap_or(false)
    }
}
