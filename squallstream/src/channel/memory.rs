//! In-process loopback channel pair.
//!
//! The two ends of a [`MemoryChannel::pair`] are connected by shared
//! deques of framed records, so the codec path is exercised exactly as it
//! would be on a socket. Closing either end closes both; buffered records
//! drain before the closure surfaces. Useful for tests and demos of the
//! reliability engine without real sockets.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::channel::{Channel, DEFAULT_PAYLOAD_HINT};
use crate::error::{Result, SquallStreamError};
use crate::packet::Packet;

#[derive(Default)]
struct Shared {
    a_to_b: Mutex<VecDeque<Bytes>>,
    b_to_a: Mutex<VecDeque<Bytes>>,
    closed: AtomicBool,
}

#[derive(Clone, Copy)]
enum Side {
    A,
    B,
}

pub struct MemoryChannel {
    shared: Arc<Shared>,
    side: Side,
    payload_hint: usize,
}

impl MemoryChannel {
    /// Create a connected pair of loopback channels.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_hint(DEFAULT_PAYLOAD_HINT)
    }

    /// As [`pair`](Self::pair), with a custom segment limit.
    pub fn pair_with_hint(payload_hint: usize) -> (Self, Self) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: shared.clone(),
                side: Side::A,
                payload_hint,
            },
            Self {
                shared,
                side: Side::B,
                payload_hint,
            },
        )
    }

    fn outbox(&self) -> &Mutex<VecDeque<Bytes>> {
        match self.side {
            Side::A => &self.shared.a_to_b,
            Side::B => &self.shared.b_to_a,
        }
    }

    fn inbox(&self) -> &Mutex<VecDeque<Bytes>> {
        match self.side {
            Side::A => &self.shared.b_to_a,
            Side::B => &self.shared.a_to_b,
        }
    }
}

impl Channel for MemoryChannel {
    fn send(&mut self, packet: &Packet) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SquallStreamError::ChannelClosed);
        }
        self.outbox().lock().push_back(packet.encode_framed());
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Packet>> {
        let record = self.inbox().lock().pop_front();
        match record {
            Some(framed) => Ok(Some(Packet::decode(&framed[4..])?)),
            None if self.shared.closed.load(Ordering::Acquire) => {
                Err(SquallStreamError::ChannelClosed)
            }
            None => Ok(None),
        }
    }

    fn max_payload_hint(&self) -> usize {
        self.payload_hint
    }

    fn close(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_roundtrip() {
        let (mut a, mut b) = MemoryChannel::pair();
        let packet = Packet::new(0, 0, 2, Bytes::from_static(b"hi"));
        a.send(&packet).unwrap();
        assert_eq!(b.try_recv().unwrap(), Some(packet));
        assert_eq!(b.try_recv().unwrap(), None);
    }

    #[test]
    fn buffered_records_drain_before_close_surfaces() {
        let (mut a, mut b) = MemoryChannel::pair();
        let packet = Packet::ack(5, 1);
        a.send(&packet).unwrap();
        a.close();

        assert_eq!(b.try_recv().unwrap(), Some(packet));
        assert!(matches!(
            b.try_recv(),
            Err(SquallStreamError::ChannelClosed)
        ));
        assert!(matches!(
            b.send(&Packet::ack(0, 0)),
            Err(SquallStreamError::ChannelClosed)
        ));
    }
}
