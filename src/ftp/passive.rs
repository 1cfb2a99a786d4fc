//! Passive-mode port allocation: first free port in `[min..=max]`.
//!
//! Grounded on libunftp's `ProxyProtocolSwitchboard::reserve_next_free_port`
//! (`server/proxy_protocol.rs`), which walks a configured port range and
//! claims the first one that binds. This version additionally tracks
//! in-process reservations so two sessions racing the same tick don't both
//! attempt the same port before either has bound it.

use dashmap::DashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct PassiveSwitchboard {
    min: u16,
    max: u16,
    reserved: Arc<DashSet<u16>>,
}

pub struct ReservedPassivePort {
    pub listener: TcpListener,
    pub port: u16,
    reserved: Arc<DashSet<u16>>,
}

impl Drop for ReservedPassivePort {
    fn drop(&mut self) {
        self.reserved.remove(&self.port);
    }
}

impl PassiveSwitchboard {
    pub fn new(min: u16, max: u16) -> Self {
        PassiveSwitchboard {
            min,
            max,
            reserved: Arc::new(DashSet::new()),
        }
    }

    /// Binds the first free port in range, or `None` if the whole range is
    /// already taken (by this process or another).
    pub async fn reserve_next_free_port(&self) -> Option<ReservedPassivePort> {
        for port in self.min..=self.max {
            if self.reserved.contains(&port) {
                continue;
            }
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
            if let Ok(listener) = TcpListener::bind(addr).await {
                self.reserved.insert(port);
                return Some(ReservedPassivePort {
                    listener,
                    port,
                    reserved: self.reserved.clone(),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserves_and_releases_a_port() {
        let board = PassiveSwitchboard::new(50900, 50910);
        let reserved = board.reserve_next_free_port().await.expect("port available");
        let port = reserved.port;
        assert!(board.reserved.contains(&port));
        drop(reserved);
        assert!(!board.reserved.contains(&port));
    }

    #[tokio::test]
    async fn two_concurrent_reservations_get_distinct_ports() {
        let board = PassiveSwitchboard::new(50920, 50930);
        let a = board.reserve_next_free_port().await.unwrap();
        let b = board.reserve_next_free_port().await.unwrap();
        assert_ne!(a.port, b.port);
    }
}
