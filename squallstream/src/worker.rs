//! The reliability engine behind [`Stream`](crate::stream::Stream).
//!
//! One background worker per endpoint runs a cooperative loop that
//! interleaves receive and transmit work over a single [`Channel`]:
//! cumulative acknowledgements prune the unacked queue, out-of-order
//! payloads park in a reorder buffer until the gap fills, and a coarse
//! go-back-N timer retransmits everything still pending. The send quota
//! each tick is the minimum of our AIMD window and the floor-mean of the
//! peer's recently advertised receive windows; a zero peer window enters a
//! probing state that forces one packet out per backoff period.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use bytes::Bytes;
use crossbeam_queue::ArrayQueue;

use crate::channel::Channel;
use crate::error::{Result, SquallStreamError};
use crate::mutator::Mutator;
use crate::packet::Packet;
use crate::stream::StreamConfig;

pub(crate) struct StreamWorker {
    channel: Box<dyn Channel>,
    recv_filter: Arc<dyn Mutator>,
    transmit_filter: Arc<dyn Mutator>,
    data_in: Arc<ArrayQueue<Bytes>>,
    data_out: Arc<ArrayQueue<Option<Bytes>>>,
    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    unacked: Arc<AtomicUsize>,
    config: StreamConfig,

    /// Next sequence number this side will emit.
    local_write_offset: i32,
    /// Next in-order sequence number expected from the peer.
    local_read_offset: i32,
    /// Highest cumulative-ACK point received from the peer. Monotonic.
    max_remote_read_offset: i32,
    /// Unacknowledged packets, in emission order, keyed by write_offset.
    pending: VecDeque<(i32, Packet)>,
    /// Out-of-order arrivals awaiting a gap fill. Keys >= local_read_offset.
    recv_window: BTreeMap<i32, Bytes>,
    /// Our current send quota: +1 per send up to the cap, 1 after a timeout.
    window_size: usize,
    /// Ring of the peer's recent recv_window_size advertisements.
    recv_window_size_hint: VecDeque<i32>,
    /// Last progress event: an ACK pruned pending, a packet went out, or a
    /// retransmit fired. Drives the retransmission timer.
    last_write_ack: Instant,
    /// When the averaged peer window first hit zero, if it is still zero.
    backoff_since: Option<Instant>,
}

impl StreamWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        channel: Box<dyn Channel>,
        recv_filter: Arc<dyn Mutator>,
        transmit_filter: Arc<dyn Mutator>,
        data_in: Arc<ArrayQueue<Bytes>>,
        data_out: Arc<ArrayQueue<Option<Bytes>>>,
        stop: Arc<AtomicBool>,
        done: Arc<AtomicBool>,
        unacked: Arc<AtomicUsize>,
        config: StreamConfig,
    ) -> Self {
        Self {
            channel,
            recv_filter,
            transmit_filter,
            data_in,
            data_out,
            stop,
            done,
            unacked,
            config,
            local_write_offset: 0,
            local_read_offset: 0,
            max_remote_read_offset: 0,
            pending: VecDeque::new(),
            recv_window: BTreeMap::new(),
            window_size: 2,
            recv_window_size_hint: VecDeque::new(),
            last_write_ack: Instant::now(),
            backoff_since: None,
        }
    }

    pub(crate) fn run(mut self) {
        while !self.stop.load(Ordering::Acquire) {
            self.try_restore_backoff();
            let tick = self.try_receive().and_then(|()| self.try_transmit());
            match tick {
                Ok(()) => thread::sleep(self.config.tick_interval),
                Err(SquallStreamError::ChannelClosed) => {
                    tracing::debug!("channel closed, stopping stream worker");
                    break;
                }
                Err(err) => {
                    tracing::warn!(%err, "stream worker error, stopping");
                    break;
                }
            }
        }

        self.channel.close();
        self.done.store(true, Ordering::Release);
        // Wake a blocked reader; if the queue is full the done flag covers it.
        let _ = self.data_out.push(None);
    }

    /// Free delivery slots we can still absorb; advertised on every ACK.
    fn free_slots(&self) -> i32 {
        (self.data_out.capacity() - self.data_out.len()) as i32
    }

    fn write_raw(&mut self, packet: Packet) -> Result<()> {
        match self.transmit_filter.apply(packet) {
            Some(packet) => self.channel.send(&packet),
            None => Ok(()),
        }
    }

    /// Drop pending entries covered by the peer's cumulative ACK point.
    fn clean_pending(&mut self) {
        while self
            .pending
            .front()
            .is_some_and(|(seq, _)| *seq < self.max_remote_read_offset)
        {
            self.pending.pop_front();
            self.unacked.fetch_sub(1, Ordering::AcqRel);
            self.last_write_ack = Instant::now();
        }
    }

    /// Floor-mean of the recent peer window advertisements, or 1 before the
    /// first sample. Entering zero records the backoff start; leaving zero
    /// clears it.
    fn peer_window(&mut self) -> usize {
        if self.recv_window_size_hint.is_empty() {
            return 1;
        }
        let sum: i64 = self.recv_window_size_hint.iter().map(|&v| v as i64).sum();
        let mean = (sum / self.recv_window_size_hint.len() as i64).max(0) as usize;
        if mean == 0 {
            if self.backoff_since.is_none() {
                self.backoff_since = Some(Instant::now());
            }
        } else {
            self.backoff_since = None;
        }
        mean
    }

    /// After a full backoff period with the peer window still zero, seed
    /// the hint ring with a single 1 so exactly one probe goes out.
    fn try_restore_backoff(&mut self) {
        if let Some(since) = self.backoff_since {
            if since.elapsed() > self.config.max_backoff_period && self.peer_window() == 0 {
                tracing::debug!("peer window stuck at zero, probing");
                self.recv_window_size_hint.clear();
                self.recv_window_size_hint.push_back(1);
            }
        }
    }

    fn try_receive(&mut self) -> Result<()> {
        // Bounded per tick so a flood cannot starve the transmit phase.
        for _ in 0..self.config.max_recv_per_tick {
            let Some(packet) = self.channel.try_recv()? else {
                break;
            };
            let Some(packet) = self.recv_filter.apply(packet) else {
                continue;
            };

            self.max_remote_read_offset = self.max_remote_read_offset.max(packet.read_offset);
            self.clean_pending();

            self.recv_window_size_hint.push_back(packet.recv_window_size);
            while self.recv_window_size_hint.len() > self.config.recv_window_hint_size {
                self.recv_window_size_hint.pop_front();
            }

            // Pure ACKs (write_offset == -1) never pass this gate.
            if packet.write_offset >= self.local_read_offset
                && !self.recv_window.contains_key(&packet.write_offset)
            {
                self.recv_window.insert(packet.write_offset, packet.data.clone());

                // Drain the contiguous prefix into the delivery queue; a
                // full queue leaves the rest parked until a later tick.
                while let Some(payload) = self.recv_window.remove(&self.local_read_offset) {
                    if let Err(rejected) = self.data_out.push(Some(payload)) {
                        if let Some(payload) = rejected {
                            self.recv_window.insert(self.local_read_offset, payload);
                        }
                        break;
                    }
                    self.local_read_offset += 1;
                }
            }

            if packet.write_offset >= 0 {
                // Answer every data-bearing arrival, duplicates included,
                // so the peer converges after loss.
                let ack = Packet::ack(self.local_read_offset, self.free_slots());
                self.write_raw(ack)?;
            }
        }
        Ok(())
    }

    /// Retransmit pending packets, oldest first, up to the current quota.
    /// Each goes out rebuilt with the current ACK point and window.
    fn transmit_pending(&mut self) -> Result<()> {
        self.clean_pending();
        if self.pending.is_empty() {
            return Ok(());
        }

        let budget = self
            .pending
            .len()
            .min(self.window_size)
            .min(self.peer_window());
        for i in 0..budget {
            let refreshed = {
                let (_, original) = &self.pending[i];
                Packet::new(
                    self.local_read_offset,
                    original.write_offset,
                    self.free_slots(),
                    original.data.clone(),
                )
            };
            self.write_raw(refreshed)?;
        }
        Ok(())
    }

    fn try_transmit(&mut self) -> Result<()> {
        if !self.pending.is_empty() && self.last_write_ack.elapsed() > self.config.ack_timeout {
            self.last_write_ack = Instant::now();
            tracing::debug!(
                pending = self.pending.len(),
                "ack timeout, retransmitting window"
            );
            self.transmit_pending()?;
            self.window_size = 1;
        }

        if self.pending.len() < self.peer_window().min(self.window_size) {
            if let Some(data) = self.data_in.pop() {
                let packet = Packet::new(
                    self.local_read_offset,
                    self.local_write_offset,
                    self.free_slots(),
                    data,
                );
                self.pending.push_back((self.local_write_offset, packet.clone()));
                self.local_write_offset += 1;
                self.last_write_ack = Instant::now();
                self.write_raw(packet)?;
                self.window_size = (self.window_size + 1).min(self.config.max_window_size);
            }
        }
        Ok(())
    }
}
