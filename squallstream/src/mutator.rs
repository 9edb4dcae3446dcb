//! Per-packet filters.
//!
//! A [`Mutator`] is a pure unary transform applied to every packet crossing
//! a filter point: the stream worker runs one on each transmitted and each
//! received packet, the bridge runs one per forwarding direction. Returning
//! `None` drops the packet at that stage. Filters compose through
//! [`Composite`]; statistics and loss simulation are just filters.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use crate::packet::Packet;

pub trait Mutator: Send + Sync {
    /// Transform the packet, or return `None` to drop it.
    fn apply(&self, packet: Packet) -> Option<Packet>;
}

/// Identity filter.
pub struct NoOp;

impl Mutator for NoOp {
    fn apply(&self, packet: Packet) -> Option<Packet> {
        Some(packet)
    }
}

/// Drops packets with a configurable probability.
///
/// The chance is live-updatable: the proxy's control loop adjusts it while
/// the bridge worker is filtering, so it sits behind a lock.
pub struct RandomDrop {
    chance: Mutex<f64>,
}

impl RandomDrop {
    pub fn new(chance: f64) -> Self {
        Self {
            chance: Mutex::new(chance),
        }
    }

    pub fn set_drop(&self, chance: f64) {
        *self.chance.lock() = chance;
    }
}

impl Mutator for RandomDrop {
    fn apply(&self, packet: Packet) -> Option<Packet> {
        let chance = *self.chance.lock();
        if rand::thread_rng().gen::<f64>() < chance {
            None
        } else {
            Some(packet)
        }
    }
}

/// Destination for statistics deltas.
///
/// [`ControllerClient`](crate::controller::ControllerClient) is the
/// production implementation; tests count in memory.
pub trait StatsSink: Send + Sync {
    fn post_delta(&self, key: &str);
}

/// Applies an optional inner filter, then posts a `+1` delta for `key`
/// if the packet survived, passing it through unchanged.
pub struct StatsRelay {
    key: String,
    sink: Arc<dyn StatsSink>,
    inner: Option<Arc<dyn Mutator>>,
}

impl StatsRelay {
    pub fn new(key: impl Into<String>, sink: Arc<dyn StatsSink>) -> Self {
        Self {
            key: key.into(),
            sink,
            inner: None,
        }
    }

    pub fn with_inner(
        key: impl Into<String>,
        sink: Arc<dyn StatsSink>,
        inner: Arc<dyn Mutator>,
    ) -> Self {
        Self {
            key: key.into(),
            sink,
            inner: Some(inner),
        }
    }
}

impl Mutator for StatsRelay {
    fn apply(&self, packet: Packet) -> Option<Packet> {
        let packet = match &self.inner {
            Some(inner) => inner.apply(packet)?,
            None => packet,
        };
        self.sink.post_delta(&self.key);
        Some(packet)
    }
}

/// Sequential composition: `outer(inner(packet))`, short-circuiting on drop.
pub struct Composite {
    outer: Arc<dyn Mutator>,
    inner: Arc<dyn Mutator>,
}

impl Composite {
    pub fn new(outer: Arc<dyn Mutator>, inner: Arc<dyn Mutator>) -> Self {
        Self { outer, inner }
    }
}

impl Mutator for Composite {
    fn apply(&self, packet: Packet) -> Option<Packet> {
        self.outer.apply(self.inner.apply(packet)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct CountingSink {
        counts: Mutex<HashMap<String, usize>>,
    }

    impl CountingSink {
        fn get(&self, key: &str) -> usize {
            self.counts.lock().get(key).copied().unwrap_or(0)
        }
    }

    impl StatsSink for CountingSink {
        fn post_delta(&self, key: &str) {
            *self.counts.lock().entry(key.to_string()).or_insert(0) += 1;
        }
    }

    fn sample() -> Packet {
        Packet::new(0, 1, 2, Bytes::from_static(b"x"))
    }

    #[test]
    fn noop_is_identity() {
        let p = sample();
        assert_eq!(NoOp.apply(p.clone()), Some(p));
    }

    #[test]
    fn drop_chance_bounds() {
        let always = RandomDrop::new(1.0);
        let never = RandomDrop::new(0.0);
        for _ in 0..100 {
            assert!(always.apply(sample()).is_none());
            assert!(never.apply(sample()).is_some());
        }
    }

    #[test]
    fn drop_chance_is_live_updatable() {
        let drop = RandomDrop::new(1.0);
        assert!(drop.apply(sample()).is_none());
        drop.set_drop(0.0);
        assert!(drop.apply(sample()).is_some());
    }

    #[test]
    fn relay_counts_survivors_only() {
        let sink = Arc::new(CountingSink::default());
        let relay = StatsRelay::with_inner("sent", sink.clone(), Arc::new(RandomDrop::new(1.0)));
        assert!(relay.apply(sample()).is_none());
        assert_eq!(sink.get("sent"), 0);

        let relay = StatsRelay::new("sent", sink.clone());
        assert!(relay.apply(sample()).is_some());
        assert!(relay.apply(sample()).is_some());
        assert_eq!(sink.get("sent"), 2);
    }

    #[test]
    fn composite_short_circuits() {
        let sink = Arc::new(CountingSink::default());
        let outer: Arc<dyn Mutator> = Arc::new(StatsRelay::new("outer", sink.clone()));
        let inner: Arc<dyn Mutator> = Arc::new(RandomDrop::new(1.0));
        let composed = Composite::new(outer, inner);
        assert!(composed.apply(sample()).is_none());
        // Outer stage never ran.
        assert_eq!(sink.get("outer"), 0);
    }

    #[test]
    fn composite_runs_inner_first() {
        struct Tag(&'static str);
        impl Mutator for Tag {
            fn apply(&self, packet: Packet) -> Option<Packet> {
                let mut data = packet.data.to_vec();
                data.extend_from_slice(self.0.as_bytes());
                Some(Packet::new(
                    packet.read_offset,
                    packet.write_offset,
                    packet.recv_window_size,
                    Bytes::from(data),
                ))
            }
        }

        let composed = Composite::new(Arc::new(Tag("o")), Arc::new(Tag("i")));
        let out = composed.apply(sample()).unwrap();
        assert_eq!(&out.data[..], b"xio");
    }
}
