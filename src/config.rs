//! Command-line configuration.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fileshare-server", about = "LAN/WAN file-sharing server (HTTP + HLS + FTP)")]
pub struct Config {
    /// Share root directory.
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// HTTP port.
    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    /// FTP control port.
    #[arg(long, default_value_t = 2121)]
    pub ftp_port: u16,

    /// Lowest port in the FTP passive range.
    #[arg(long, default_value_t = 50000)]
    pub pasv_port_min: u16,

    /// Highest port in the FTP passive range.
    #[arg(long, default_value_t = 50100)]
    pub pasv_port_max: u16,

    /// Allow anonymous, read-only FTP logins.
    #[arg(long, default_value_t = true)]
    pub anonymous_read: bool,

    /// LAN IP advertised in PASV/EPSV replies to non-loopback clients.
    #[arg(long, default_value = "127.0.0.1")]
    pub lan_ip: String,

    /// ffmpeg (or compatible) binary used to probe duration and transcode segments.
    #[arg(long, default_value = "ffmpeg")]
    pub transcoder_binary: String,

    /// Enables the Proxy-Protocol-v2 TCP bridge on this port, in front of `--port`.
    #[arg(long)]
    pub proxy_bridge_port: Option<u16>,
}
