//! RFC 959 FTP listener: one control connection per client, each driving its
//! own [`session::FtpSession`] state machine.

pub mod codec;
pub mod commands;
pub mod passive;
pub mod session;

use crate::auth::Auth;
use crate::blocklist::BlockList;
use crate::pathguard::PathGuard;
use crate::stats::Stats;
use passive::PassiveSwitchboard;
use session::{FtpEngineConfig, FtpSession};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct FtpEngine {
    listen_addr: SocketAddr,
    guard: Arc<PathGuard>,
    blocklist: Arc<BlockList>,
    auth: Arc<Auth>,
    stats: Arc<Stats>,
    switchboard: Arc<PassiveSwitchboard>,
    config: Arc<FtpEngineConfig>,
}

impl FtpEngine {
    pub fn new(listen_addr: SocketAddr, guard: Arc<PathGuard>, blocklist: Arc<BlockList>, auth: Arc<Auth>, stats: Arc<Stats>, pasv_port_min: u16, pasv_port_max: u16, anonymous_read: bool, lan_ip: String) -> Self {
        FtpEngine {
            listen_addr,
            guard,
            blocklist,
            auth,
            stats,
            switchboard: Arc::new(PassiveSwitchboard::new(pasv_port_min, pasv_port_max)),
            config: Arc::new(FtpEngineConfig { anonymous_read, lan_ip }),
        }
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        tracing::info!(addr = %self.listen_addr, "ftp engine listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let session = FtpSession::new(self.guard.clone(), self.blocklist.clone(), self.auth.clone(), self.stats.clone(), self.switchboard.clone(), self.config.clone(), peer.ip());
            tokio::spawn(async move {
                session.run(stream).await;
            });
        }
    }
}
