//! `Decoder`/`Encoder` pair for the FTP control channel, used with
//! `tokio_util::codec::Framed` in place of hand-rolled line buffering.

use super::commands::{self, Command};
use bytes::BytesMut;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

pub struct FtpCodec {
    next_index: usize,
}

impl FtpCodec {
    pub fn new() -> Self {
        FtpCodec { next_index: 0 }
    }
}

impl Decoder for FtpCodec {
    type Item = Command;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Command>, Self::Error> {
        if let Some(newline_offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') {
            let newline_index = newline_offset + self.next_index;
            let line = buf.split_to(newline_index + 1);
            self.next_index = 0;
            let text = String::from_utf8_lossy(&line);
            Ok(Some(commands::parse(&text)))
        } else {
            self.next_index = buf.len();
            Ok(None)
        }
    }
}

impl Encoder<String> for FtpCodec {
    type Error = io::Error;

    fn encode(&mut self, reply: String, buf: &mut BytesMut) -> Result<(), Self::Error> {
        buf.extend_from_slice(reply.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_splits_on_newline_and_buffers_partial_lines() {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::from(&b"US"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"ER anonymous\r\n");
        let command = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(command.verb, "USER");
        assert_eq!(command.arg.as_deref(), Some("anonymous"));
    }

    #[test]
    fn encode_writes_reply_bytes_verbatim() {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("220 fileshare FTP ready\r\n".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"220 fileshare FTP ready\r\n");
    }
}
