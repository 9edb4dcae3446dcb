//! The on-wire record and its framing codec.
//!
//! Every wire unit is `length: u32 || body`, where the body lays out the
//! three header fields followed by the payload:
//!
//! ```text
//! +------------------+-------------+--------------+--- variable ---+
//! | recv_window_size | read_offset | write_offset |    data        |
//! |      (i32)       |    (i32)    |    (i32)     |                |
//! +------------------+-------------+--------------+----------------+
//! ```
//!
//! All integers are little-endian two's-complement. The length prefix is
//! what lets a byte-stream transport recover packet boundaries; a datagram
//! transport carries exactly one framed record per datagram.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, SquallStreamError};

/// Fixed header bytes in every frame body.
pub const HEADER_LEN: usize = 12;

/// Sentinel `write_offset` marking a pure acknowledgement with no payload.
pub const ACK_OFFSET: i32 = -1;

/// One unit on the wire: optional payload plus sequence/ACK metadata.
///
/// `read_offset` is the next sequence number this side expects from the
/// peer (the cumulative ACK point). `write_offset` is the sequence number
/// of the carried payload, or [`ACK_OFFSET`] for a pure ACK.
/// `recv_window_size` advertises how many more payloads the sender of the
/// packet is currently willing to buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub read_offset: i32,
    pub write_offset: i32,
    pub recv_window_size: i32,
    pub data: Bytes,
}

impl Packet {
    pub fn new(read_offset: i32, write_offset: i32, recv_window_size: i32, data: Bytes) -> Self {
        Self {
            read_offset,
            write_offset,
            recv_window_size,
            data,
        }
    }

    /// Build a pure acknowledgement: no payload, `write_offset = -1`.
    pub fn ack(read_offset: i32, recv_window_size: i32) -> Self {
        Self {
            read_offset,
            write_offset: ACK_OFFSET,
            recv_window_size,
            data: Bytes::new(),
        }
    }

    /// Whether this packet carries no payload and only advances the ACK point.
    pub fn is_ack(&self) -> bool {
        self.write_offset == ACK_OFFSET
    }

    /// Body length when encoded (excludes the u32 length prefix).
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    /// Encode the frame body (header fields + payload, no length prefix).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode the body into a pre-allocated `BytesMut`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.recv_window_size);
        buf.put_i32_le(self.read_offset);
        buf.put_i32_le(self.write_offset);
        buf.put_slice(&self.data);
    }

    /// Encode a complete wire record: `len: u32 || body`.
    pub fn encode_framed(&self) -> Bytes {
        let body_len = self.encoded_len();
        let mut buf = BytesMut::with_capacity(4 + body_len);
        buf.put_u32_le(body_len as u32);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode a frame body. Fails only on short input; over-long input is
    /// impossible because the length prefix bounds the body.
    pub fn decode(mut body: &[u8]) -> Result<Self> {
        if body.len() < HEADER_LEN {
            return Err(SquallStreamError::FrameTooShort {
                expected: HEADER_LEN,
                actual: body.len(),
            });
        }

        let recv_window_size = body.get_i32_le();
        let read_offset = body.get_i32_le();
        let write_offset = body.get_i32_le();
        let data = Bytes::copy_from_slice(body);

        Ok(Self {
            read_offset,
            write_offset,
            recv_window_size,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_roundtrip() {
        let packet = Packet::new(3, 7, 5, Bytes::from_static(b"payload"));
        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn ack_has_no_payload() {
        let ack = Packet::ack(12, 4);
        assert!(ack.is_ack());
        assert!(ack.data.is_empty());
        assert_eq!(ack.write_offset, ACK_OFFSET);

        let decoded = Packet::decode(&ack.encode()).unwrap();
        assert!(decoded.is_ack());
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn layout_is_little_endian() {
        let packet = Packet::new(0x01020304, -1, 0x0A0B0C0D, Bytes::new());
        let body = packet.encode();
        // recv_window_size, read_offset, write_offset, in that order, LE.
        assert_eq!(&body[0..4], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(&body[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&body[8..12], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn framed_record_carries_body_length() {
        let packet = Packet::new(0, 1, 2, Bytes::from_static(b"abc"));
        let framed = packet.encode_framed();
        let len = u32::from_le_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
        assert_eq!(len, HEADER_LEN + 3);
        assert_eq!(framed.len(), 4 + len);

        let decoded = Packet::decode(&framed[4..]).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn short_body_is_rejected() {
        let err = Packet::decode(&[0u8; 11]).unwrap_err();
        match err {
            SquallStreamError::FrameTooShort { expected, actual } => {
                assert_eq!(expected, HEADER_LEN);
                assert_eq!(actual, 11);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
