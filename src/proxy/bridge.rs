//! TCP front door that terminates PROXY protocol v2 and splices the
//! remainder of the connection into the local HTTP server, rewriting the
//! forwarded-client headers before relaying.
//!
//! Grounded on libunftp's `ProxyProtocolSwitchboard` for the v2-handshake
//! idiom; the splice-then-pipe shape (read head, rewrite, connect, copy
//! bidirectionally) follows the generic reverse-proxy pattern used across
//! the pack's other TCP-proxy examples.

use super::v2;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const MAX_HEADER_PREFIX: usize = 16;
const MAX_HTTP_HEAD_BYTES: usize = 128 * 1024;

const CANNED_BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\nContent-Length: 58\r\n\r\n<html><body><h1>400 Bad Request</h1></body></html>";

pub struct ProxyBridge {
    listen_addr: SocketAddr,
    upstream_addr: SocketAddr,
}

impl ProxyBridge {
    pub fn new(listen_addr: SocketAddr, upstream_addr: SocketAddr) -> Self {
        ProxyBridge { listen_addr, upstream_addr }
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        tracing::info!(addr = %self.listen_addr, upstream = %self.upstream_addr, "proxy bridge listening");
        loop {
            let (socket, peer) = listener.accept().await?;
            let upstream_addr = self.upstream_addr;
            tokio::spawn(async move {
                if let Err(err) = handle_connection(socket, upstream_addr).await {
                    tracing::debug!(peer = %peer, error = %err, "proxy bridge connection closed with error");
                }
            });
        }
    }
}

async fn handle_connection(mut client: TcpStream, upstream_addr: SocketAddr) -> std::io::Result<()> {
    let mut prefix = [0u8; MAX_HEADER_PREFIX];
    client.read_exact(&mut prefix).await.map_err(|_| bad_request_err())?;

    if prefix[0..12] != v2::SIGNATURE {
        let _ = client.write_all(CANNED_BAD_REQUEST).await;
        return Err(bad_request_err());
    }

    let mut buffered = prefix.to_vec();
    fill_until_chain_complete(&mut client, &mut buffered).await?;

    let (header, consumed) = v2::parse_chain(&buffered).map_err(|_| bad_request_err())?;
    let client_ip = header.src_addr.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string());

    let mut remainder = buffered[consumed..].to_vec();
    let head_end = read_until_double_crlf(&mut client, &mut remainder).await?;

    let (head, pending_body) = remainder.split_at(head_end);
    let rewritten_head = rewrite_head(head, &client_ip);

    let mut upstream = TcpStream::connect(upstream_addr).await?;
    upstream.write_all(&rewritten_head).await?;
    upstream.write_all(pending_body).await?;

    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}

/// Keeps reading until `buffered` (starting from a confirmed v2 signature)
/// contains at least one full header; `parse_chain` itself detects whether
/// more stacked headers follow, so this only needs to guarantee the first
/// header's fixed+address bytes are present before the first parse attempt.
async fn fill_until_chain_complete(client: &mut TcpStream, buffered: &mut Vec<u8>) -> std::io::Result<()> {
    loop {
        if v2::parse_one(buffered).is_ok() {
            // Try the full chain; if it needs more stacked headers it will
            // fail with Truncated against the current buffer, so keep reading.
            match v2::parse_chain(buffered) {
                Ok(_) => return Ok(()),
                Err(v2::ProxyParseError::Truncated) => {}
                Err(_) => return Ok(()), // let the caller surface the parse error
            }
        }
        let mut chunk = [0u8; 256];
        let read = client.read(&mut chunk).await?;
        if read == 0 {
            return Err(bad_request_err());
        }
        buffered.extend_from_slice(&chunk[..read]);
        if buffered.len() > MAX_HTTP_HEAD_BYTES {
            return Err(bad_request_err());
        }
    }
}

async fn read_until_double_crlf(client: &mut TcpStream, buffered: &mut Vec<u8>) -> std::io::Result<usize> {
    loop {
        if let Some(pos) = find_double_crlf(buffered) {
            return Ok(pos);
        }
        if buffered.len() > MAX_HTTP_HEAD_BYTES {
            return Err(bad_request_err());
        }
        let mut chunk = [0u8; 4096];
        let read = client.read(&mut chunk).await?;
        if read == 0 {
            return Err(bad_request_err());
        }
        buffered.extend_from_slice(&chunk[..read]);
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

fn rewrite_head(head: &[u8], client_ip: &str) -> Vec<u8> {
    let text = String::from_utf8_lossy(head);
    let mut lines: Vec<String> = text.split("\r\n").map(str::to_string).collect();
    lines.retain(|line| {
        let lower = line.to_lowercase();
        !(lower.starts_with("x-forwarded-for:") || lower.starts_with("x-real-ip:"))
    });

    // The request line is lines[0]; insert the fresh headers right after it.
    let insert_at = 1.min(lines.len());
    lines.insert(insert_at, format!("X-Real-IP: {client_ip}"));
    lines.insert(insert_at, format!("X-Forwarded-For: {client_ip}"));

    lines.join("\r\n").into_bytes()
}

fn bad_request_err() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed proxy protocol v2 handshake")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_strips_existing_forwarded_headers_and_inserts_fresh_ones() {
        let head = b"GET / HTTP/1.1\r\nHost: x\r\nX-Forwarded-For: 1.2.3.4\r\nX-Real-IP: 1.2.3.4\r\n\r\n";
        let rewritten = String::from_utf8(rewrite_head(head, "9.9.9.9")).unwrap();
        assert!(!rewritten.contains("1.2.3.4"));
        assert!(rewritten.contains("X-Forwarded-For: 9.9.9.9"));
        assert!(rewritten.contains("X-Real-IP: 9.9.9.9"));
    }

    #[test]
    fn double_crlf_detection() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\nbody".to_vec();
        assert_eq!(find_double_crlf(&buf), Some(26));
    }
}
