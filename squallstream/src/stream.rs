//! User-facing byte-stream facade over the reliability engine.
//!
//! A [`Stream`] binds a [`Channel`], spawns its worker, and exposes a
//! blocking `write`/`read` interface. The application talks to the worker
//! through two bounded payload queues: `write` blocks when the outbound
//! queue is full (the only backpressure mechanism on the sending side),
//! and the free-slot count of the inbound queue is what the worker
//! advertises to the peer as our receive window.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use crossbeam_queue::ArrayQueue;

use crate::channel::Channel;
use crate::error::{Result, SquallStreamError};
use crate::mutator::{Mutator, NoOp};
use crate::worker::StreamWorker;

/// Tunables for the reliability engine.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Silence on the ACK path before the whole pending window is resent.
    pub ack_timeout: Duration,
    /// Cap on the additive send window.
    pub max_window_size: usize,
    /// Samples kept when averaging the peer's advertised window.
    pub recv_window_hint_size: usize,
    /// How long a zero peer window is honored before a probe is forced.
    pub max_backoff_period: Duration,
    /// Payload capacity of each direction's queue.
    pub queue_capacity: usize,
    /// Receive-phase packet budget per tick.
    pub max_recv_per_tick: usize,
    /// Worker sleep between ticks.
    pub tick_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(2),
            max_window_size: 10,
            recv_window_hint_size: 3,
            max_backoff_period: Duration::from_secs(3),
            queue_capacity: 10,
            max_recv_per_tick: 100,
            tick_interval: Duration::from_millis(1),
        }
    }
}

const BLOCK_RETRY: Duration = Duration::from_millis(1);

pub struct Stream {
    data_in: Arc<ArrayQueue<Bytes>>,
    data_out: Arc<ArrayQueue<Option<Bytes>>>,
    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    unacked: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
    max_packet_size: usize,
    closed: bool,
}

impl Stream {
    /// Bind a channel with identity filters and default tunables.
    pub fn new(channel: Box<dyn Channel>) -> Self {
        Self::with_filters(channel, None, None)
    }

    /// Bind a channel with optional per-direction filters.
    pub fn with_filters(
        channel: Box<dyn Channel>,
        recv_filter: Option<Arc<dyn Mutator>>,
        transmit_filter: Option<Arc<dyn Mutator>>,
    ) -> Self {
        Self::with_config(channel, recv_filter, transmit_filter, StreamConfig::default())
    }

    pub fn with_config(
        channel: Box<dyn Channel>,
        recv_filter: Option<Arc<dyn Mutator>>,
        transmit_filter: Option<Arc<dyn Mutator>>,
        config: StreamConfig,
    ) -> Self {
        let data_in = Arc::new(ArrayQueue::new(config.queue_capacity));
        let data_out = Arc::new(ArrayQueue::new(config.queue_capacity));
        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let unacked = Arc::new(AtomicUsize::new(0));
        let max_packet_size = channel.max_payload_hint();

        let worker = StreamWorker::new(
            channel,
            recv_filter.unwrap_or_else(|| Arc::new(NoOp)),
            transmit_filter.unwrap_or_else(|| Arc::new(NoOp)),
            data_in.clone(),
            data_out.clone(),
            stop.clone(),
            done.clone(),
            unacked.clone(),
            config,
        );
        let handle = match thread::Builder::new()
            .name("squall-stream-worker".into())
            .spawn(move || worker.run())
        {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(%err, "failed to spawn stream worker");
                done.store(true, Ordering::Release);
                None
            }
        };

        Self {
            data_in,
            data_out,
            stop,
            done,
            unacked,
            worker: handle,
            max_packet_size,
            closed: false,
        }
    }

    /// The segment size `write` splits user data at.
    pub fn preferred_segment_size(&self) -> usize {
        self.max_packet_size
    }

    /// Queue `data` for transmission, split into segments of at most
    /// [`preferred_segment_size`](Self::preferred_segment_size) bytes.
    /// Blocks while the outbound queue is full. A zero-byte write is a
    /// no-op.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        for segment in data.chunks(self.max_packet_size) {
            // Counted before the push so the worker can never observe (and
            // acknowledge) a segment ahead of its accounting.
            self.unacked.fetch_add(1, Ordering::AcqRel);
            let mut item = Bytes::copy_from_slice(segment);
            loop {
                if self.closed || self.done.load(Ordering::Acquire) {
                    self.unacked.fetch_sub(1, Ordering::AcqRel);
                    return Err(SquallStreamError::StreamClosed);
                }
                match self.data_in.push(item) {
                    Ok(()) => break,
                    Err(rejected) => {
                        item = rejected;
                        thread::sleep(BLOCK_RETRY);
                    }
                }
            }
        }
        Ok(())
    }

    /// Read delivered bytes.
    ///
    /// With `min_read == 0`, drains whatever is immediately available
    /// (possibly nothing). Otherwise accumulates until `min_read` bytes
    /// are buffered or `timeout` expires (`None` waits indefinitely).
    /// Hitting end-of-stream latches the stream closed and returns what
    /// was accumulated.
    pub fn read(&mut self, min_read: usize, timeout: Option<Duration>) -> Bytes {
        let mut buffer = BytesMut::new();

        if min_read == 0 {
            while let Some(slot) = self.data_out.pop() {
                match slot {
                    Some(payload) => buffer.extend_from_slice(&payload),
                    None => {
                        self.closed = true;
                        break;
                    }
                }
            }
            if self.done.load(Ordering::Acquire) && self.data_out.is_empty() {
                self.closed = true;
            }
            return buffer.freeze();
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        while buffer.len() < min_read {
            match self.data_out.pop() {
                Some(Some(payload)) => buffer.extend_from_slice(&payload),
                Some(None) => {
                    self.closed = true;
                    break;
                }
                None => {
                    if self.done.load(Ordering::Acquire) && self.data_out.is_empty() {
                        self.closed = true;
                        break;
                    }
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        break;
                    }
                    thread::sleep(BLOCK_RETRY);
                }
            }
        }
        buffer.freeze()
    }

    /// Wait until everything written has been acknowledged by the peer.
    /// Returns `false` on timeout or if the channel closed with segments
    /// still outstanding.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.unacked.load(Ordering::Acquire) == 0 {
                return true;
            }
            if self.done.load(Ordering::Acquire) || Instant::now() >= deadline {
                return false;
            }
            thread::sleep(BLOCK_RETRY);
        }
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Stop the worker, join it, and latch the stream closed. Idempotent.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        let _ = self.data_out.push(None);
        self.closed = true;
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close();
    }
}
