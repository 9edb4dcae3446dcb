//! The lower-layer transport abstraction.
//!
//! A [`Channel`] adapts either a datagram or a byte-stream socket to a
//! uniform send-one-packet / try-recv-one-packet interface. The reliability
//! engine above never sees sockets, only framed [`Packet`]s; the bridge
//! below the proxy pumps the same interface without interpreting it.

pub mod memory;
pub mod tcp;
pub mod udp;

use crate::error::Result;
use crate::packet::Packet;

/// Preferred maximum payload bytes per packet.
pub const DEFAULT_PAYLOAD_HINT: usize = 2 * 1024;

/// Polymorphic transport: one framed packet in, one framed packet out.
pub trait Channel: Send {
    /// Transmit one packet. Blocks at most briefly (kernel buffer pressure);
    /// a transient failure returns `Ok` and leaves the retry to the
    /// reliability layer. Permanent failure is `ChannelClosed`.
    fn send(&mut self, packet: &Packet) -> Result<()>;

    /// Non-blocking receive: one packet if one is fully buffered, else
    /// `None`. `ChannelClosed` on peer close, reset, or a malformed frame
    /// (the protocol has no resynchronization).
    fn try_recv(&mut self) -> Result<Option<Packet>>;

    /// Advisory segment limit: the stream splits user data at this size.
    fn max_payload_hint(&self) -> usize {
        DEFAULT_PAYLOAD_HINT
    }

    /// Idempotent.
    fn close(&mut self);
}
