//! PROXY protocol v2 binary header parsing.
//!
//! Grounded on libunftp's `server/proxy_protocol.rs`, which implements the
//! same v1/v2 handshake for FTP control connections; this version only needs
//! v2 (the HTTP front door never negotiates v1) and additionally supports
//! stacked chains of headers, each carrying the downstream's observed
//! client, the way a chain of L4 proxies would append one each.

use std::net::IpAddr;

pub const SIGNATURE: [u8; 12] = [0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A];
const HEADER_PREFIX_LEN: usize = 16;
const MAX_STACKED_HEADERS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Local,
    Proxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Unspec,
    Inet,
    Inet6,
    Unix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Unspec,
    Stream,
    Dgram,
}

#[derive(Debug, Clone, Copy)]
pub struct ProxyV2Header {
    pub version: u8,
    pub command: Command,
    pub family: Family,
    pub protocol: Protocol,
    pub src_addr: Option<IpAddr>,
    pub src_port: u16,
    pub dst_addr: Option<IpAddr>,
    pub dst_port: u16,
    pub header_length: usize,
}

#[derive(Debug)]
pub enum ProxyParseError {
    NoSignature,
    Truncated,
    UnsupportedVersion,
    TooManyStackedHeaders,
}

/// Parses a single v2 header (signature already confirmed present) starting
/// at `buf[0]`. Returns the header and its total byte length (fixed part +
/// address block), so callers can advance past it to look for the next
/// stacked header or the HTTP request line.
pub fn parse_one(buf: &[u8]) -> Result<ProxyV2Header, ProxyParseError> {
    if buf.len() < HEADER_PREFIX_LEN {
        return Err(ProxyParseError::Truncated);
    }
    if &buf[0..12] != SIGNATURE {
        return Err(ProxyParseError::NoSignature);
    }

    let ver_cmd = buf[12];
    let version = ver_cmd >> 4;
    if version != 2 {
        return Err(ProxyParseError::UnsupportedVersion);
    }
    let command = if (ver_cmd & 0x0F) == 0x01 { Command::Proxy } else { Command::Local };

    let fam_proto = buf[13];
    let family = match fam_proto >> 4 {
        0x1 => Family::Inet,
        0x2 => Family::Inet6,
        0x3 => Family::Unix,
        _ => Family::Unspec,
    };
    let protocol = match fam_proto & 0x0F {
        0x1 => Protocol::Stream,
        0x2 => Protocol::Dgram,
        _ => Protocol::Unspec,
    };

    let addr_len = u16::from_be_bytes([buf[14], buf[15]]) as usize;
    let total_len = HEADER_PREFIX_LEN + addr_len;
    if buf.len() < total_len {
        return Err(ProxyParseError::Truncated);
    }

    let (src_addr, src_port, dst_addr, dst_port) = match family {
        Family::Inet if addr_len >= 12 => {
            let body = &buf[HEADER_PREFIX_LEN..];
            let src = IpAddr::from([body[0], body[1], body[2], body[3]]);
            let dst = IpAddr::from([body[4], body[5], body[6], body[7]]);
            let src_port = u16::from_be_bytes([body[8], body[9]]);
            let dst_port = u16::from_be_bytes([body[10], body[11]]);
            (Some(src), src_port, Some(dst), dst_port)
        }
        Family::Inet6 if addr_len >= 36 => {
            let body = &buf[HEADER_PREFIX_LEN..];
            let mut src_octets = [0u8; 16];
            src_octets.copy_from_slice(&body[0..16]);
            let mut dst_octets = [0u8; 16];
            dst_octets.copy_from_slice(&body[16..32]);
            let src = IpAddr::from(src_octets);
            let dst = IpAddr::from(dst_octets);
            let src_port = u16::from_be_bytes([body[32], body[33]]);
            let dst_port = u16::from_be_bytes([body[34], body[35]]);
            (Some(src), src_port, Some(dst), dst_port)
        }
        _ => (None, 0, None, 0),
    };

    Ok(ProxyV2Header {
        version,
        command,
        family,
        protocol,
        src_addr,
        src_port,
        dst_addr,
        dst_port,
        header_length: total_len,
    })
}

/// Parses a chain of up to 32 stacked v2 headers starting at `buf[0]`.
/// Returns the last `PROXY`-command header (the authoritative client
/// address) and the total number of bytes consumed by the whole chain.
pub fn parse_chain(buf: &[u8]) -> Result<(ProxyV2Header, usize), ProxyParseError> {
    let mut offset = 0;
    let mut last_proxy: Option<ProxyV2Header> = None;
    let mut count = 0;

    loop {
        let header = parse_one(&buf[offset..])?;
        offset += header.header_length;
        if header.command == Command::Proxy {
            last_proxy = Some(header);
        }
        count += 1;
        if count > MAX_STACKED_HEADERS {
            return Err(ProxyParseError::TooManyStackedHeaders);
        }

        // Stop once the remaining bytes don't start with another signature.
        if offset + 12 > buf.len() || buf[offset..offset + 12] != SIGNATURE {
            break;
        }
    }

    match last_proxy {
        Some(header) => Ok((header, offset)),
        None => Err(ProxyParseError::NoSignature),
    }
}

/// Decodes the `X-Proxy-Protocol-V2` header value (base64 or hex) into the
/// raw v2 TLV chain and returns the authoritative client IP, per §4.7's
/// `getClientIp`.
pub fn parse_header_value_to_client_ip(header: &str) -> Option<String> {
    let bytes = decode_header_bytes(header.trim())?;
    let (header, _) = parse_chain(&bytes).ok()?;
    header.src_addr.map(|ip| ip.to_string())
}

fn decode_header_bytes(value: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(value) {
        return Some(bytes);
    }
    if let Ok(bytes) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(value) {
        return Some(bytes);
    }
    hex_decode(value)
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || s.is_empty() {
        return None;
    }
    (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_v2_header(command: u8, src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut buf = SIGNATURE.to_vec();
        buf.push(0x20 | command);
        buf.push(0x11); // INET | STREAM
        buf.extend_from_slice(&12u16.to_be_bytes());
        buf.extend_from_slice(&src);
        buf.extend_from_slice(&dst);
        buf.extend_from_slice(&src_port.to_be_bytes());
        buf.extend_from_slice(&dst_port.to_be_bytes());
        buf
    }

    #[test]
    fn parses_single_proxy_header() {
        let buf = build_v2_header(0x01, [10, 0, 0, 1], [10, 0, 0, 2], 51234, 80);
        let header = parse_one(&buf).unwrap();
        assert_eq!(header.command, Command::Proxy);
        assert_eq!(header.src_addr, Some(IpAddr::from([10, 0, 0, 1])));
        assert_eq!(header.header_length, 28);
    }

    #[test]
    fn chain_uses_last_proxy_header_as_authoritative() {
        let mut buf = build_v2_header(0x01, [10, 0, 0, 1], [10, 0, 0, 2], 1, 80);
        buf.extend(build_v2_header(0x01, [192, 168, 1, 1], [192, 168, 1, 2], 2, 80));
        let (header, consumed) = parse_chain(&buf).unwrap();
        assert_eq!(header.src_addr, Some(IpAddr::from([192, 168, 1, 1])));
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn rejects_missing_signature() {
        let buf = vec![0u8; 20];
        assert!(matches!(parse_one(&buf), Err(ProxyParseError::NoSignature)));
    }

    #[test]
    fn header_value_decodes_base64_chain() {
        use base64::Engine;
        let raw = build_v2_header(0x01, [203, 0, 113, 5], [10, 0, 0, 1], 51234, 443);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&raw);
        assert_eq!(parse_header_value_to_client_ip(&encoded), Some("203.0.113.5".to_string()));
    }

    #[test]
    fn header_value_decodes_hex_chain() {
        let raw = build_v2_header(0x01, [203, 0, 113, 6], [10, 0, 0, 1], 1, 443);
        let encoded: String = raw.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(parse_header_value_to_client_ip(&encoded), Some("203.0.113.6".to_string()));
    }
}
