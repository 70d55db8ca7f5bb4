//! Line codec for the IRC stream.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::common::error::ProtocolError;

/// Longest line accepted before the buffer is discarded.
pub const MAX_LINE_LENGTH: usize = 8192;

/// Splits the byte stream on CR or LF; empty lines are skipped.
#[derive(Debug, Default)]
pub struct IrcLineCodec {
    /// Bytes already scanned without finding a terminator.
    scanned: usize,
}

impl IrcLineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for IrcLineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let start = self.scanned.min(src.len());
            let terminator = src[start..]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r')
                .map(|offset| start + offset);

            let Some(end) = terminator else {
                if src.len() > MAX_LINE_LENGTH {
                    warn!("Discarding {} bytes without a line terminator", src.len());
                    src.clear();
                    self.scanned = 0;
                } else {
                    self.scanned = src.len();
                }
                return Ok(None);
            };

            self.scanned = 0;
            let line = src.split_to(end);
            src.advance(1);

            if line.is_empty() {
                continue;
            }
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
    }
}

impl Encoder<String> for IrcLineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // A stray newline would let a relayed message inject a second command.
        let line = line.replace(['\r', '\n'], " ");
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut IrcLineCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_crlf_and_bare_lf() {
        let mut codec = IrcLineCodec::new();
        let mut buf = BytesMut::from(&b"PING :a\r\nPING :b\nPING :c\r\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["PING :a", "PING :b", "PING :c"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_waits_for_terminator() {
        let mut codec = IrcLineCodec::new();
        let mut buf = BytesMut::from(&b"PRIVMSG #a :hel"[..]);
        assert!(decode_all(&mut codec, &mut buf).is_empty());
        buf.extend_from_slice(b"lo\r\n");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["PRIVMSG #a :hello"]);
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut codec = IrcLineCodec::new();
        let mut buf = BytesMut::from(&b"PRIVMSG #a :caf\xe9\r\n"[..]);
        let lines = decode_all(&mut codec, &mut buf);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("PRIVMSG #a :caf"));
    }

    #[test]
    fn test_overlong_line_discarded() {
        let mut codec = IrcLineCodec::new();
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LENGTH + 1].as_slice());
        assert!(decode_all(&mut codec, &mut buf).is_empty());
        assert!(buf.is_empty());
        buf.extend_from_slice(b"PING :ok\r\n");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["PING :ok"]);
    }

    #[test]
    fn test_encode_appends_crlf_and_strips_newlines() {
        let mut codec = IrcLineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("PRIVMSG #a :one\r\nQUIT".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"PRIVMSG #a :one  QUIT\r\n");
    }
}
