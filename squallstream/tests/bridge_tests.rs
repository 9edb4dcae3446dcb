//! Bridge and forwarder behavior, including bridged end-to-end transfers
//! under heavy simulated loss.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use squallstream::channel::memory::MemoryChannel;
use squallstream::{
    share, Bridge, Channel, Composite, Mutator, Packet, RandomDrop, StatsRelay, StatsSink, Stream,
    StreamConfig,
};

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

fn recv_blocking(ch: &mut MemoryChannel, deadline: Duration) -> Option<Packet> {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if let Ok(Some(packet)) = ch.try_recv() {
            return Some(packet);
        }
        thread::sleep(Duration::from_millis(1));
    }
    None
}

#[test]
fn bridge_forwards_both_directions() {
    let (mut a_end, a_bridge) = MemoryChannel::pair();
    let (b_bridge, mut b_end) = MemoryChannel::pair();
    let mut bridge = Bridge::start(
        share(Box::new(a_bridge)),
        share(Box::new(b_bridge)),
        None,
        None,
    );

    let forward = Packet::new(0, 0, 5, Bytes::from_static(b"to b"));
    a_end.send(&forward).unwrap();
    assert_eq!(recv_blocking(&mut b_end, Duration::from_secs(2)), Some(forward));

    let backward = Packet::ack(1, 5);
    b_end.send(&backward).unwrap();
    assert_eq!(recv_blocking(&mut a_end, Duration::from_secs(2)), Some(backward));

    bridge.stop();
}

#[test]
fn drop_filter_discards_until_rate_changes() {
    let (mut a_end, a_bridge) = MemoryChannel::pair();
    let (b_bridge, mut b_end) = MemoryChannel::pair();

    let drop = Arc::new(RandomDrop::new(1.0));
    let filter: Arc<dyn Mutator> = drop.clone();
    let mut bridge = Bridge::start(
        share(Box::new(a_bridge)),
        share(Box::new(b_bridge)),
        Some(filter),
        None,
    );

    a_end.send(&Packet::new(0, 0, 5, Bytes::from_static(b"lost"))).unwrap();
    assert_eq!(recv_blocking(&mut b_end, Duration::from_millis(200)), None);

    // The proxy control loop updates the rate while the bridge runs.
    drop.set_drop(0.0);
    let survivor = Packet::new(0, 1, 5, Bytes::from_static(b"kept"));
    a_end.send(&survivor).unwrap();
    assert_eq!(recv_blocking(&mut b_end, Duration::from_secs(2)), Some(survivor));

    bridge.stop();
}

#[test]
fn bridge_stops_when_a_channel_closes() {
    let (mut a_end, a_bridge) = MemoryChannel::pair();
    let (b_bridge, _b_end) = MemoryChannel::pair();
    let bridge = Bridge::start(
        share(Box::new(a_bridge)),
        share(Box::new(b_bridge)),
        None,
        None,
    );
    assert!(bridge.is_alive());

    a_end.close();
    let deadline = Instant::now() + Duration::from_secs(2);
    while bridge.is_alive() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!bridge.is_alive());
}

#[test]
fn lossy_bridge_still_delivers_everything() {
    let config = StreamConfig {
        ack_timeout: Duration::from_millis(100),
        ..StreamConfig::default()
    };
    // Sender <-> bridge <-> receiver, one-byte segments.
    let (sender_end, a_bridge) = MemoryChannel::pair_with_hint(1);
    let (b_bridge, receiver_end) = MemoryChannel::pair_with_hint(1);

    let sink = Arc::new(CountingSink::default());
    let drop: Arc<dyn Mutator> = Arc::new(RandomDrop::new(0.3));
    let arrivals: Arc<dyn Mutator> = Arc::new(StatsRelay::new("proxy_recv", sink.clone()));
    let ab: Arc<dyn Mutator> = Arc::new(StatsRelay::with_inner(
        "proxy_sent",
        sink.clone(),
        Arc::new(Composite::new(drop, arrivals)),
    ));

    let mut bridge = Bridge::start(
        share(Box::new(a_bridge)),
        share(Box::new(b_bridge)),
        Some(ab),
        None,
    );

    let mut sender = Stream::with_config(Box::new(sender_end), None, None, config.clone());
    let mut receiver = Stream::with_config(Box::new(receiver_end), None, None, config);

    let message = b"loss is recoverable";
    let writer = thread::spawn(move || {
        sender.write(message).unwrap();
        assert!(sender.flush(Duration::from_secs(30)));
    });

    let mut collected = Vec::new();
    while collected.len() < message.len() {
        let chunk = receiver.read(1, Some(Duration::from_secs(30)));
        assert!(!chunk.is_empty(), "bridged transfer stalled");
        collected.extend_from_slice(&chunk);
    }
    assert_eq!(&collected[..], message);
    writer.join().unwrap();

    // Every forwarded packet was first counted as an arrival.
    assert!(sink.get("proxy_recv") >= sink.get("proxy_sent"));
    assert!(sink.get("proxy_sent") > 0);

    bridge.stop();
}
