pub mod auth;
pub mod blocklist;
pub mod config;
pub mod disk;
pub mod error;
pub mod fileio;
pub mod ftp;
pub mod http;
pub mod pathguard;
pub mod proxy;
pub mod ratelimit;
pub mod settings;
pub mod stats;
pub mod streamer;
pub mod uploads;
