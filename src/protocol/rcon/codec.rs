//! RCON frame codec with partial-frame and continuation reassembly.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::common::error::ProtocolError;
use crate::protocol::rcon::packet::{
    RconPacket, CONTINUATION_FRAME_LENGTH, HEADER_AND_PADDING, MAX_FRAME_LENGTH,
};

/// Body collected from full-size frames that share one request id.
#[derive(Debug)]
struct Continuation {
    id: i32,
    kind: i32,
    body: Vec<u8>,
}

impl Continuation {
    fn finish(self) -> RconPacket {
        RconPacket {
            id: self.id,
            kind: self.kind,
            body: String::from_utf8_lossy(&self.body).into_owned(),
        }
    }
}

/// Decodes frames once complete and keeps partial continuation state.
#[derive(Debug, Default)]
pub struct RconCodec {
    carry: Option<Continuation>,
}

impl RconCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any in-progress continuation.
    pub fn reset(&mut self) {
        self.carry = None;
    }

    #[cfg(test)]
    pub fn has_carry(&self) -> bool {
        self.carry.is_some()
    }
}

fn read_i32_le(src: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]])
}

impl Decoder for RconCodec {
    type Item = RconPacket;
    type Error = ProtocolError;

    /// A malformed frame yields `Err` after it has been removed from `src`,
    /// so the caller can log it and keep decoding.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < 4 {
                return Ok(None);
            }

            let length = read_i32_le(src, 0);
            if !(0..=MAX_FRAME_LENGTH).contains(&length) {
                // No way to find the next frame boundary.
                src.clear();
                self.carry = None;
                return Err(ProtocolError::InvalidFrameLength { length });
            }

            let frame_len = 4 + length as usize;
            if src.len() < frame_len {
                return Ok(None);
            }

            if (length as usize) < HEADER_AND_PADDING {
                src.advance(frame_len);
                return Err(ProtocolError::InvalidFrameLength { length });
            }

            let id = read_i32_le(src, 4);
            if let Some(carry) = self.carry.take() {
                if carry.id != id {
                    // Leave the new frame in `src`; the carry is final on its own.
                    return Ok(Some(carry.finish()));
                }
                self.carry = Some(carry);
            }

            src.advance(8);
            let kind = src.get_i32_le();
            let body = src.split_to(length as usize - HEADER_AND_PADDING);
            src.advance(2);

            if length == CONTINUATION_FRAME_LENGTH {
                trace!(id, "RCON continuation frame");
                match &mut self.carry {
                    Some(carry) => carry.body.extend_from_slice(&body),
                    None => {
                        self.carry = Some(Continuation {
                            id,
                            kind,
                            body: body.to_vec(),
                        })
                    }
                }
                continue;
            }

            let packet = match self.carry.take() {
                Some(mut carry) => {
                    carry.body.extend_from_slice(&body);
                    carry.finish()
                }
                None => RconPacket {
                    id,
                    kind,
                    body: String::from_utf8_lossy(&body).into_owned(),
                },
            };
            return Ok(Some(packet));
        }
    }
}

impl Encoder<RconPacket> for RconCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: RconPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.body.as_bytes();
        let length = body.len() + HEADER_AND_PADDING;
        if length > MAX_FRAME_LENGTH as usize {
            return Err(ProtocolError::InvalidFrameLength {
                length: i32::try_from(length).unwrap_or(i32::MAX),
            });
        }

        dst.reserve(4 + length);
        dst.put_i32_le(length as i32);
        dst.put_i32_le(item.id);
        dst.put_i32_le(item.kind);
        dst.put_slice(body);
        dst.put_u8(0);
        dst.put_u8(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::rcon::packet::{packet_type, MAX_RESPONSE_BODY};

    fn encode(packet: RconPacket) -> BytesMut {
        let mut buf = BytesMut::new();
        RconCodec::new().encode(packet, &mut buf).unwrap();
        buf
    }

    fn reply(id: i32, body: &str) -> RconPacket {
        RconPacket {
            id,
            kind: packet_type::RESPONSE_VALUE,
            body: body.to_string(),
        }
    }

    fn decode_all(codec: &mut RconCodec, buf: &mut BytesMut) -> Vec<RconPacket> {
        let mut packets = Vec::new();
        loop {
            match codec.decode(buf) {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        packets
    }

    #[test]
    fn test_encode_layout() {
        let buf = encode(RconPacket::auth(7, "pw"));
        assert_eq!(
            &buf[..],
            &[12, 0, 0, 0, 7, 0, 0, 0, 3, 0, 0, 0, b'p', b'w', 0, 0][..]
        );
    }

    #[test]
    fn test_split_at_any_boundary_matches_single_read() {
        let frame = encode(reply(42, "There are 0/20 players online:"));
        let expected = decode_all(&mut RconCodec::new(), &mut frame.clone());
        assert_eq!(expected, vec![reply(42, "There are 0/20 players online:")]);

        for split in 1..frame.len() {
            let mut codec = RconCodec::new();
            let mut buf = BytesMut::from(&frame[..split]);
            assert!(decode_all(&mut codec, &mut buf).is_empty(), "split {}", split);
            buf.extend_from_slice(&frame[split..]);
            assert_eq!(decode_all(&mut codec, &mut buf), expected, "split {}", split);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_coalesced_frames() {
        let mut buf = encode(reply(1, "a"));
        buf.extend_from_slice(&encode(reply(2, "b")));
        buf.extend_from_slice(&encode(RconPacket::auth(3, "c"))[..5]);

        let mut codec = RconCodec::new();
        let packets = decode_all(&mut codec, &mut buf);
        assert_eq!(packets, vec![reply(1, "a"), reply(2, "b")]);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_continuation_frames_are_concatenated() {
        let first = "x".repeat(MAX_RESPONSE_BODY);
        let mut buf = encode(reply(9, &first));
        buf.extend_from_slice(&encode(reply(9, "tail")));

        let mut codec = RconCodec::new();
        let packets = decode_all(&mut codec, &mut buf);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].id, 9);
        assert_eq!(packets[0].body, format!("{}tail", first));
        assert!(!codec.has_carry());
    }

    #[test]
    fn test_continuation_waits_for_final_frame() {
        let mut buf = encode(reply(9, &"y".repeat(MAX_RESPONSE_BODY)));
        let mut codec = RconCodec::new();
        assert!(decode_all(&mut codec, &mut buf).is_empty());
        assert!(codec.has_carry());

        buf.extend_from_slice(&encode(reply(9, "")));
        let packets = decode_all(&mut codec, &mut buf);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].body.len(), MAX_RESPONSE_BODY);
    }

    #[test]
    fn test_continuation_followed_by_other_id() {
        let full = "z".repeat(MAX_RESPONSE_BODY);
        let mut buf = encode(reply(4, &full));
        buf.extend_from_slice(&encode(reply(5, "next")));

        let packets = decode_all(&mut RconCodec::new(), &mut buf);
        assert_eq!(packets, vec![reply(4, &full), reply(5, "next")]);
    }

    #[test]
    fn test_short_length_frame_is_dropped() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(4);
        buf.put_i32_le(1);
        buf.extend_from_slice(&encode(reply(2, "ok")));

        let mut codec = RconCodec::new();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::InvalidFrameLength { length: 4 })
        ));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(reply(2, "ok")));
    }

    #[test]
    fn test_negative_length_clears_buffer() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(-5);
        buf.extend_from_slice(&encode(reply(2, "lost")));

        let mut codec = RconCodec::new();
        assert!(codec.decode(&mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_framed_read_over_segmented_stream() {
        use futures::StreamExt;
        use tokio_util::codec::FramedRead;

        let first = encode(reply(1, "first"));
        let second = encode(reply(2, "second"));
        let mock = tokio_test::io::Builder::new()
            .read(&first[..3])
            .read(&first[3..])
            .read(&second)
            .build();

        let mut framed = FramedRead::new(mock, RconCodec::new());
        assert_eq!(framed.next().await.unwrap().unwrap(), reply(1, "first"));
        assert_eq!(framed.next().await.unwrap().unwrap(), reply(2, "second"));
        assert!(framed.next().await.is_none());
    }

    #[test]
    fn test_auth_failure_detected() {
        let mut buf = encode(RconPacket {
            id: -1,
            kind: packet_type::AUTH_RESPONSE,
            body: String::new(),
        });
        let packet = RconCodec::new().decode(&mut buf).unwrap().unwrap();
        assert!(packet.is_auth_failure());
    }
}
