//! SquallStream -- ordered, reliable byte streaming over channels that are
//! allowed to lose, reorder, and duplicate.
//!
//! The same reliability engine runs on top of either a datagram channel
//! (lossy, unordered) or a byte-stream channel (lossless, ordered):
//! sliding-window transmission with cumulative acknowledgements, go-back-N
//! retransmission, an additively-grown send window, and peer-advertised
//! receive-window backpressure. Around it sit pluggable per-packet
//! [`Mutator`]s (loss simulation, statistics, payload transforms), the
//! proxy-side [`Bridge`] that pumps packets obliviously between two
//! channels, and a best-effort [`ControllerClient`] for the control plane.

pub mod bridge;
pub mod channel;
pub mod controller;
pub mod error;
pub mod mutator;
pub mod packet;
pub mod stream;
mod worker;

pub use bridge::{share, Bridge, Forwarder, SharedChannel};
pub use channel::Channel;
pub use controller::ControllerClient;
pub use error::{Result, SquallStreamError};
pub use mutator::{Composite, Mutator, NoOp, RandomDrop, StatsRelay, StatsSink};
pub use packet::Packet;
pub use stream::{Stream, StreamConfig};
