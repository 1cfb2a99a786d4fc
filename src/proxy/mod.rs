//! Proxy-Protocol-v2 parsing and the TCP bridge that fronts the HTTP server
//! with it.

pub mod bridge;
pub mod v2;

pub use bridge::ProxyBridge;
