//! Per-(target, IP) fixed-window rate limiter.
//!
//! Grounded on libunftp's `ProxyProtocolSwitchboard` (`server/proxy_protocol.rs`)
//! for the `DashMap`-keyed-by-composite-key idiom, applied here to rate-limit
//! buckets instead of passive-port reservations.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Upload,
    Download,
    Disk,
    List,
    Status,
    Auth,
    FileOps,
}

#[derive(Debug, Clone, Copy)]
pub struct RuleConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub enabled: bool,
}

impl RuleConfig {
    pub const fn new(max_requests: u32, window_ms: u64) -> Self {
        RuleConfig {
            max_requests,
            window: Duration::from_millis(window_ms),
            enabled: true,
        }
    }
}

struct Bucket {
    count: u32,
    window_start: Instant,
}

pub struct RateLimiter {
    buckets: DashMap<(Target, String), Bucket>,
    rules: DashMap<Target, RuleConfig>,
}

pub enum Decision {
    Allow,
    Deny { retry_after_sec: u64 },
}

impl RateLimiter {
    pub fn new() -> Self {
        let rules = DashMap::new();
        rules.insert(Target::Upload, RuleConfig::new(10, 60_000));
        rules.insert(Target::Download, RuleConfig::new(120, 60_000));
        rules.insert(Target::Disk, RuleConfig::new(30, 60_000));
        rules.insert(Target::List, RuleConfig::new(120, 60_000));
        rules.insert(Target::Status, RuleConfig::new(60, 60_000));
        rules.insert(Target::Auth, RuleConfig::new(10, 60_000));
        rules.insert(Target::FileOps, RuleConfig::new(60, 60_000));
        RateLimiter {
            buckets: DashMap::new(),
            rules,
        }
    }

    pub fn set_rule(&self, target: Target, rule: RuleConfig) {
        self.rules.insert(target, rule);
    }

    pub fn check(&self, target: Target, ip: &str) -> Decision {
        let Some(rule) = self.rules.get(&target).map(|r| *r) else {
            return Decision::Allow;
        };
        if !rule.enabled {
            return Decision::Allow;
        }

        let now = Instant::now();
        let key = (target, ip.to_string());
        let mut entry = self.buckets.entry(key).or_insert_with(|| Bucket { count: 0, window_start: now });

        if now.duration_since(entry.window_start) >= rule.window {
            entry.count = 1;
            entry.window_start = now;
            return Decision::Allow;
        }

        if entry.count >= rule.max_requests {
            let remaining = rule.window.saturating_sub(now.duration_since(entry.window_start));
            let retry_after_sec = remaining.as_millis().div_ceil(1000) as u64;
            return Decision::Deny { retry_after_sec };
        }

        entry.count += 1;
        Decision::Allow
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_denies() {
        let limiter = RateLimiter::new();
        limiter.set_rule(Target::Status, RuleConfig::new(3, 60_000));
        for _ in 0..3 {
            assert!(matches!(limiter.check(Target::Status, "1.2.3.4"), Decision::Allow));
        }
        match limiter.check(Target::Status, "1.2.3.4") {
            Decision::Deny { retry_after_sec } => assert!(retry_after_sec <= 60),
            Decision::Allow => panic!("expected deny on 4th request"),
        }
    }

    #[test]
    fn separate_ips_get_separate_buckets() {
        let limiter = RateLimiter::new();
        limiter.set_rule(Target::Status, RuleConfig::new(1, 60_000));
        assert!(matches!(limiter.check(Target::Status, "1.1.1.1"), Decision::Allow));
        assert!(matches!(limiter.check(Target::Status, "2.2.2.2"), Decision::Allow));
    }

    #[test]
    fn disabled_rule_always_allows() {
        let limiter = RateLimiter::new();
        limiter.set_rule(Target::Status, RuleConfig { max_requests: 1, window: Duration::from_millis(60_000), enabled: false });
        for _ in 0..10 {
            assert!(matches!(limiter.check(Target::Status, "1.1.1.1"), Decision::Allow));
        }
    }
}
