//! Generic per-key inflight-job deduplication.
//!
//! Grounded on libunftp's `ProxyProtocolSwitchboard::source_port_mappings`
//! (`server/proxy_protocol.rs`): a `DashMap` keyed by a composite identity,
//! with callers past the first blocking on a shared notifier rather than
//! duplicating work. Removal from the map always happens in the leader's
//! completion path, including on failure, so a crashed job never wedges
//! later callers.

use crate::error::AppError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Notify;

pub struct InflightRegistry<K: Eq + Hash + Clone> {
    inflight: DashMap<K, Arc<Notify>>,
}

impl<K: Eq + Hash + Clone> InflightRegistry<K> {
    pub fn new() -> Self {
        InflightRegistry { inflight: DashMap::new() }
    }

    /// Runs `job` for `key` if no job is already running for it. Concurrent
    /// callers for the same key await the leader's completion and then
    /// return `Ok(())`, leaving it to the caller to re-check the result
    /// (e.g. whether the segment file now exists on disk).
    pub async fn dedup<F, Fut>(&self, key: K, job: F) -> Result<(), AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), AppError>>,
    {
        loop {
            if let Some(notify) = self.inflight.get(&key).map(|entry| entry.clone()) {
                notify.notified().await;
                return Ok(());
            }

            match self.inflight.entry(key.clone()) {
                Entry::Vacant(vacant) => {
                    let notify = Arc::new(Notify::new());
                    vacant.insert(notify.clone());
                    let result = job().await;
                    self.inflight.remove(&key);
                    notify.notify_waiters();
                    return result;
                }
                Entry::Occupied(_) => continue,
            }
        }
    }
}

impl<K: Eq + Hash + Clone> Default for InflightRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let registry: Arc<InflightRegistry<&'static str>> = Arc::new(InflightRegistry::new());
        let runs = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .dedup("seg-3", || async move {
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }

        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_releases_the_key_for_retry() {
        let registry: InflightRegistry<&'static str> = InflightRegistry::new();
        let first = registry.dedup("k", || async { Err(AppError::invalid_input("boom")) }).await;
        assert!(first.is_err());
        let second = registry.dedup("k", || async { Ok(()) }).await;
        assert!(second.is_ok());
    }
}
