//! Per-control-connection FTP session: the command dispatch loop and the
//! authentication / passive-data-channel / rename state machine.
//!
//! The phased command set (pre-auth vs post-auth) and the "one data channel
//! at a time, torn down after every transfer" rule are grounded on
//! libunftp's control-channel session (`server/controlchan/mod.rs` and
//! `server/commands.rs`), adapted from its generic `StorageBackend<U>` to a
//! single filesystem root via `PathGuard`.

use super::codec::FtpCodec;
use super::commands::Command;
use super::passive::{PassiveSwitchboard, ReservedPassivePort};
use crate::auth::Auth;
use crate::blocklist::BlockList;
use crate::pathguard::PathGuard;
use crate::stats::Stats;
use futures::{SinkExt, StreamExt};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

const DATA_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STOR_TIMEOUT: Duration = Duration::from_secs(60);

type ControlChannel = Framed<TcpStream, FtpCodec>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum TransferType {
    Ascii,
    Image,
}

pub struct FtpEngineConfig {
    pub anonymous_read: bool,
    pub lan_ip: String,
}

pub struct FtpSession {
    guard: Arc<PathGuard>,
    blocklist: Arc<BlockList>,
    auth: Arc<Auth>,
    stats: Arc<Stats>,
    switchboard: Arc<PassiveSwitchboard>,
    config: Arc<FtpEngineConfig>,
    peer_ip: IpAddr,

    cwd: String,
    authenticated: bool,
    username: Option<String>,
    pending_username: Option<String>,
    transfer_type: TransferType,
    utf8: bool,
    pending_rename_from: Option<String>,
    passive: Option<ReservedPassivePort>,
}

impl FtpSession {
    pub fn new(guard: Arc<PathGuard>, blocklist: Arc<BlockList>, auth: Arc<Auth>, stats: Arc<Stats>, switchboard: Arc<PassiveSwitchboard>, config: Arc<FtpEngineConfig>, peer_ip: IpAddr) -> Self {
        FtpSession {
            guard,
            blocklist,
            auth,
            stats,
            switchboard,
            config,
            peer_ip,
            cwd: String::new(),
            authenticated: false,
            username: None,
            pending_username: None,
            transfer_type: TransferType::Ascii,
            utf8: false,
            pending_rename_from: None,
            passive: None,
        }
    }

    fn is_anonymous(&self) -> bool {
        self.username.as_deref() == Some("anonymous")
    }

    pub async fn run(mut self, stream: TcpStream) {
        let peer = self.peer_ip;
        let mut channel = Framed::new(stream, FtpCodec::new());

        if channel.send("220 fileshare FTP ready\r\n".to_string()).await.is_err() {
            return;
        }

        loop {
            let command = match channel.next().await {
                Some(Ok(command)) => command,
                Some(Err(_)) | None => break,
            };
            let verb = command.verb.clone();
            let reply = self.dispatch(&command, &mut channel).await;
            if let Some(reply) = reply {
                if channel.send(reply).await.is_err() {
                    break;
                }
            }
            if verb == "QUIT" {
                break;
            }
        }
        tracing::debug!(peer = %peer, "ftp control connection closed");
    }

    async fn dispatch(&mut self, command: &Command, writer: &mut ControlChannel) -> Option<String> {
        let arg = command.arg.as_deref();

        if !self.authenticated {
            return match command.verb.as_str() {
                "USER" => Some(self.handle_user(arg)),
                "PASS" => Some(self.handle_pass(arg).await),
                "FEAT" => Some(feat_reply()),
                "OPTS" => Some(self.handle_opts(arg)),
                "AUTH" => Some("504 Security extension not implemented.\r\n".to_string()),
                "QUIT" => Some("221 Goodbye.\r\n".to_string()),
                _ => Some("530 Please login with USER and PASS.\r\n".to_string()),
            };
        }

        match command.verb.as_str() {
            "SYST" => Some("215 UNIX Type: L8\r\n".to_string()),
            "TYPE" => Some(self.handle_type(arg)),
            "PWD" | "XPWD" => Some(format!("257 \"/{}\" is the current directory\r\n", self.cwd)),
            "CWD" | "XCWD" => self.handle_cwd(arg).await,
            "CDUP" | "XCUP" => {
                self.cwd = parent_of(&self.cwd);
                Some("250 Directory changed to parent.\r\n".to_string())
            }
            "PASV" => Some(self.handle_pasv().await),
            "EPSV" => Some(self.handle_epsv().await),
            "LIST" | "MLSD" | "NLST" => Some(self.handle_list(writer, command.verb.as_str(), arg).await),
            "RETR" => Some(self.handle_retr(writer, arg).await),
            "STOR" => Some(self.handle_stor(arg).await),
            "SIZE" => Some(self.handle_size(arg).await),
            "MDTM" => Some(self.handle_mdtm(arg).await),
            "MKD" | "XMKD" => Some(self.handle_mkd(arg).await),
            "RMD" | "XRMD" => Some(self.handle_rmd(arg).await),
            "DELE" => Some(self.handle_dele(arg).await),
            "RNFR" => Some(self.handle_rnfr(arg).await),
            "RNTO" => Some(self.handle_rnto(arg).await),
            "NOOP" => Some("200 NOOP ok.\r\n".to_string()),
            "ABOR" => Some("226 ABOR command successful.\r\n".to_string()),
            "REST" => Some("350 Restart position accepted.\r\n".to_string()),
            "STAT" => Some("211 fileshare FTP server\r\n".to_string()),
            "HELP" => Some("214 Commands: USER PASS QUIT SYST TYPE PWD CWD CDUP PASV EPSV LIST RETR STOR SIZE MDTM MKD RMD DELE RNFR RNTO NOOP ABOR REST STAT HELP\r\n".to_string()),
            "PORT" => Some("502 PORT not implemented, use PASV.\r\n".to_string()),
            "FEAT" => Some(feat_reply()),
            "OPTS" => Some(self.handle_opts(arg)),
            "QUIT" => Some("221 Goodbye.\r\n".to_string()),
            _ => Some("502 Command not implemented.\r\n".to_string()),
        }
    }

    fn handle_user(&mut self, arg: Option<&str>) -> String {
        let Some(name) = arg else {
            return "501 Syntax error in parameters.\r\n".to_string();
        };
        if self.config.anonymous_read && name.eq_ignore_ascii_case("anonymous") {
            self.authenticated = true;
            self.username = Some("anonymous".to_string());
            return "230 Anonymous access granted, restrictions apply.\r\n".to_string();
        }
        self.pending_username = Some(name.to_string());
        format!("331 Password required for {name}.\r\n")
    }

    async fn handle_pass(&mut self, arg: Option<&str>) -> String {
        let Some(password) = arg else {
            return "501 Syntax error in parameters.\r\n".to_string();
        };
        let Some(username) = self.pending_username.clone() else {
            return "503 Login with USER first.\r\n".to_string();
        };
        match self.auth.login(&username, password, &self.peer_ip.to_string()).await {
            Ok(session) => {
                self.authenticated = true;
                self.username = Some(session.current_username);
                "230 User logged in, proceed.\r\n".to_string()
            }
            Err(_) => "530 Login incorrect.\r\n".to_string(),
        }
    }

    fn handle_opts(&mut self, arg: Option<&str>) -> String {
        if arg.map(|a| a.eq_ignore_ascii_case("UTF8 ON")).unwrap_or(false) {
            self.utf8 = true;
            "200 UTF8 set to on.\r\n".to_string()
        } else {
            "501 Option not recognized.\r\n".to_string()
        }
    }

    fn handle_type(&mut self, arg: Option<&str>) -> String {
        match arg {
            Some("I") => {
                self.transfer_type = TransferType::Image;
                "200 Type set to I.\r\n".to_string()
            }
            Some("A") => {
                self.transfer_type = TransferType::Ascii;
                "200 Type set to A.\r\n".to_string()
            }
            _ => "504 Type not supported.\r\n".to_string(),
        }
    }

    fn resolve_rel(&self, arg: &str) -> String {
        if let Some(rooted) = arg.strip_prefix('/') {
            rooted.to_string()
        } else if self.cwd.is_empty() {
            arg.to_string()
        } else {
            format!("{}/{}", self.cwd, arg)
        }
    }

    async fn handle_cwd(&mut self, arg: Option<&str>) -> Option<String> {
        let Some(arg) = arg else {
            return Some("501 Syntax error in parameters.\r\n".to_string());
        };
        let rel = self.resolve_rel(arg);
        match self.guard.resolve_read(&rel).await {
            Ok(abs) if abs.is_dir() => {
                self.cwd = self.guard.relativize(&abs);
                Some("250 Directory changed.\r\n".to_string())
            }
            _ => Some("550 Failed to change directory.\r\n".to_string()),
        }
    }

    async fn handle_pasv(&mut self) -> String {
        let Some(reserved) = self.switchboard.reserve_next_free_port().await else {
            return "425 Cannot open passive connection.\r\n".to_string();
        };
        let port = reserved.port;
        self.passive = Some(reserved);
        let ip = advertised_ip(self.peer_ip, &self.config.lan_ip);
        let octets = match ip {
            IpAddr::V4(v4) => v4.octets(),
            IpAddr::V6(_) => [127, 0, 0, 1],
        };
        format!("227 Entering Passive Mode ({},{},{},{},{},{})\r\n", octets[0], octets[1], octets[2], octets[3], port >> 8, port & 0xFF)
    }

    async fn handle_epsv(&mut self) -> String {
        let Some(reserved) = self.switchboard.reserve_next_free_port().await else {
            return "425 Cannot open passive connection.\r\n".to_string();
        };
        let port = reserved.port;
        self.passive = Some(reserved);
        format!("229 Entering Extended Passive Mode (|||{port}|)\r\n")
    }

    async fn accept_data_channel(&mut self) -> Option<TcpStream> {
        let reserved = self.passive.take()?;
        let result = tokio::time::timeout(DATA_CONNECT_TIMEOUT, reserved.listener.accept()).await;
        match result {
            Ok(Ok((stream, _))) => Some(stream),
            _ => None,
        }
    }

    async fn handle_list(&mut self, writer: &mut ControlChannel, mode: &str, arg: Option<&str>) -> String {
        let rel = arg.map(|a| self.resolve_rel(a)).unwrap_or_else(|| self.cwd.clone());
        let Ok(dir_abs) = self.guard.resolve_read(&rel).await else {
            return "550 Failed to list directory.\r\n".to_string();
        };
        let Some(mut data) = self.accept_data_channel().await else {
            return "425 Can't open data connection.\r\n".to_string();
        };
        if writer.send("150 Here comes the directory listing.\r\n".to_string()).await.is_err() {
            return String::new();
        }

        let mut body = String::new();
        if let Ok(mut entries) = tokio::fs::read_dir(&dir_abs).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name == ".fileshare" {
                    continue;
                }
                let rel_child = self.guard.relativize(&entry.path());
                if self.blocklist.is_blocked(&rel_child).await {
                    continue;
                }
                let Ok(meta) = entry.metadata().await else { continue };
                body.push_str(&format_list_entry(mode, &name, &meta));
            }
        }

        let _ = data.write_all(body.as_bytes()).await;
        let _ = data.shutdown().await;
        "226 Directory send OK.\r\n".to_string()
    }

    async fn handle_retr(&mut self, writer: &mut ControlChannel, arg: Option<&str>) -> String {
        let Some(arg) = arg else {
            return "501 Syntax error in parameters.\r\n".to_string();
        };
        let rel = self.resolve_rel(arg);
        let Ok(abs) = self.guard.resolve_read(&rel).await else {
            return "550 File not found.\r\n".to_string();
        };
        let Ok(bytes) = tokio::fs::read(&abs).await else {
            return "550 File not found.\r\n".to_string();
        };
        let Some(mut data) = self.accept_data_channel().await else {
            return "425 Can't open data connection.\r\n".to_string();
        };
        if writer.send("150 Opening data connection.\r\n".to_string()).await.is_err() {
            return String::new();
        }
        let len = bytes.len() as u64;
        let ok = data.write_all(&bytes).await.is_ok();
        let _ = data.shutdown().await;
        if ok {
            self.stats.record_download(&rel, len);
            "226 Transfer complete.\r\n".to_string()
        } else {
            "426 Connection closed; transfer aborted.\r\n".to_string()
        }
    }

    async fn handle_stor(&mut self, arg: Option<&str>) -> String {
        if self.is_anonymous() {
            return "550 Permission denied.\r\n".to_string();
        }
        let Some(arg) = arg else {
            return "501 Syntax error in parameters.\r\n".to_string();
        };
        let rel = self.resolve_rel(arg);
        let Ok(abs) = self.guard.resolve_write(&rel).await else {
            return "550 Cannot create file.\r\n".to_string();
        };
        let Some(mut data) = self.accept_data_channel().await else {
            return "425 Can't open data connection.\r\n".to_string();
        };

        let mut buffer = Vec::new();
        let read_result = tokio::time::timeout(STOR_TIMEOUT, async {
            use tokio::io::AsyncReadExt;
            data.read_to_end(&mut buffer).await
        })
        .await;

        match read_result {
            Ok(Ok(_)) => {
                let tmp = abs.with_extension("part");
                if tokio::fs::write(&tmp, &buffer).await.is_err() || tokio::fs::rename(&tmp, &abs).await.is_err() {
                    return "451 Local error writing file.\r\n".to_string();
                }
                self.stats.record_upload(buffer.len() as u64);
                "226 Transfer complete.\r\n".to_string()
            }
            _ => "426 Connection closed; transfer aborted.\r\n".to_string(),
        }
    }

    async fn handle_size(&mut self, arg: Option<&str>) -> String {
        let Some(arg) = arg else {
            return "501 Syntax error in parameters.\r\n".to_string();
        };
        let rel = self.resolve_rel(arg);
        match self.guard.resolve_read(&rel).await {
            Ok(abs) => match tokio::fs::metadata(&abs).await {
                Ok(meta) => format!("213 {}\r\n", meta.len()),
                Err(_) => "550 Could not get file size.\r\n".to_string(),
            },
            Err(_) => "550 Could not get file size.\r\n".to_string(),
        }
    }

    async fn handle_mdtm(&mut self, arg: Option<&str>) -> String {
        let Some(arg) = arg else {
            return "501 Syntax error in parameters.\r\n".to_string();
        };
        let rel = self.resolve_rel(arg);
        match self.guard.resolve_read(&rel).await {
            Ok(abs) => match tokio::fs::metadata(&abs).await.ok().and_then(|m| m.modified().ok()) {
                Some(mtime) => {
                    let dt: chrono::DateTime<chrono::Utc> = mtime.into();
                    format!("213 {}\r\n", dt.format("%Y%m%d%H%M%S"))
                }
                None => "550 Could not get modification time.\r\n".to_string(),
            },
            Err(_) => "550 Could not get modification time.\r\n".to_string(),
        }
    }

    async fn handle_mkd(&mut self, arg: Option<&str>) -> String {
        if self.is_anonymous() {
            return "550 Permission denied.\r\n".to_string();
        }
        let Some(arg) = arg else {
            return "501 Syntax error in parameters.\r\n".to_string();
        };
        let rel = self.resolve_rel(arg);
        match self.guard.resolve_write(&rel).await {
            Ok(abs) if tokio::fs::create_dir(&abs).await.is_ok() => format!("257 \"/{rel}\" created\r\n"),
            _ => "550 Failed to create directory.\r\n".to_string(),
        }
    }

    async fn handle_rmd(&mut self, arg: Option<&str>) -> String {
        if self.is_anonymous() {
            return "550 Permission denied.\r\n".to_string();
        }
        let Some(arg) = arg else {
            return "501 Syntax error in parameters.\r\n".to_string();
        };
        let rel = self.resolve_rel(arg);
        match self.guard.resolve_read(&rel).await {
            Ok(abs) if tokio::fs::remove_dir(&abs).await.is_ok() => "250 Directory removed.\r\n".to_string(),
            _ => "550 Failed to remove directory.\r\n".to_string(),
        }
    }

    async fn handle_dele(&mut self, arg: Option<&str>) -> String {
        if self.is_anonymous() {
            return "550 Permission denied.\r\n".to_string();
        }
        let Some(arg) = arg else {
            return "501 Syntax error in parameters.\r\n".to_string();
        };
        let rel = self.resolve_rel(arg);
        match self.guard.resolve_read(&rel).await {
            Ok(abs) if tokio::fs::remove_file(&abs).await.is_ok() => "250 File deleted.\r\n".to_string(),
            _ => "550 Failed to delete file.\r\n".to_string(),
        }
    }

    async fn handle_rnfr(&mut self, arg: Option<&str>) -> String {
        if self.is_anonymous() {
            return "550 Permission denied.\r\n".to_string();
        }
        let Some(arg) = arg else {
            return "501 Syntax error in parameters.\r\n".to_string();
        };
        let rel = self.resolve_rel(arg);
        match self.guard.resolve_read(&rel).await {
            Ok(_) => {
                self.pending_rename_from = Some(rel);
                "350 Ready for RNTO.\r\n".to_string()
            }
            Err(_) => "550 File not found.\r\n".to_string(),
        }
    }

    async fn handle_rnto(&mut self, arg: Option<&str>) -> String {
        if self.is_anonymous() {
            return "550 Permission denied.\r\n".to_string();
        }
        let Some(source_rel) = self.pending_rename_from.take() else {
            return "503 RNFR required first.\r\n".to_string();
        };
        let Some(arg) = arg else {
            return "501 Syntax error in parameters.\r\n".to_string();
        };
        let target_rel = self.resolve_rel(arg);
        let (Ok(source_abs), Ok(target_abs)) = (self.guard.resolve_read(&source_rel).await, self.guard.resolve_write(&target_rel).await) else {
            return "550 Rename failed.\r\n".to_string();
        };
        match tokio::fs::rename(&source_abs, &target_abs).await {
            Ok(()) => "250 Rename successful.\r\n".to_string(),
            Err(_) => "550 Rename failed.\r\n".to_string(),
        }
    }
}

fn feat_reply() -> String {
    "211-Features:\r\n UTF8\r\n MDTM\r\n SIZE\r\n211 End\r\n".to_string()
}

fn parent_of(cwd: &str) -> String {
    match Path::new(cwd).parent() {
        Some(parent) => parent.to_string_lossy().replace('\\', "/"),
        None => String::new(),
    }
}

fn advertised_ip(peer: IpAddr, lan_ip: &str) -> IpAddr {
    if peer.is_loopback() {
        IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
    } else {
        lan_ip.parse().unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
    }
}

fn format_list_entry(mode: &str, name: &str, meta: &std::fs::Metadata) -> String {
    let mtime: chrono::DateTime<chrono::Utc> = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH).into();
    match mode {
        "NLST" => format!("{name}\r\n"),
        "MLSD" => {
            let kind = if meta.is_dir() { "dir" } else { "file" };
            format!("type={};size={};modify={};{}\r\n", kind, meta.len(), mtime.format("%Y%m%d%H%M%S"), name)
        }
        _ => {
            let perms = if meta.is_dir() { "drwxr-xr-x" } else { "-rw-r--r--" };
            format!("{} 1 owner group {:>12} {} {}\r\n", perms, meta.len(), mtime.format("%b %d %H:%M"), name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feat_reply_is_multiline_with_terminal_211() {
        let reply = feat_reply();
        assert!(reply.starts_with("211-"));
        assert!(reply.trim_end().ends_with("211 End"));
    }

    #[test]
    fn parent_of_root_is_empty() {
        assert_eq!(parent_of(""), "");
        assert_eq!(parent_of("a/b"), "a");
    }

    #[test]
    fn advertised_ip_prefers_loopback_for_loopback_peers() {
        let ip = advertised_ip(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), "10.0.0.5");
        assert_eq!(ip, IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    }
}
