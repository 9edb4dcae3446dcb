//! The proxy's bidirectional packet pump.
//!
//! A [`Forwarder`] moves framed packets from one channel to another
//! through a single filter, with no reliability logic and no inspection
//! of sequence fields: the endpoints' own engines see every drop as loss
//! and recover. A [`Bridge`] runs the two directions of a channel pair in
//! one background thread and stops when either side closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::channel::Channel;
use crate::mutator::{Mutator, NoOp};

/// Each channel is the source of one direction and the destination of the
/// other, so the bridge's two forwarders share them behind a lock.
pub type SharedChannel = Arc<Mutex<Box<dyn Channel>>>;

/// Wrap a channel for use by a [`Bridge`].
pub fn share(channel: Box<dyn Channel>) -> SharedChannel {
    Arc::new(Mutex::new(channel))
}

pub struct Forwarder {
    src: SharedChannel,
    dest: SharedChannel,
    filter: Arc<dyn Mutator>,
}

impl Forwarder {
    pub fn new(src: SharedChannel, dest: SharedChannel, filter: Option<Arc<dyn Mutator>>) -> Self {
        Self {
            src,
            dest,
            filter: filter.unwrap_or_else(|| Arc::new(NoOp)),
        }
    }

    /// Move at most one packet from src to dest. Returns `false` when
    /// either side has closed, which terminates the bridge.
    pub fn poll(&self) -> bool {
        let packet = match self.src.lock().try_recv() {
            Ok(Some(packet)) => packet,
            Ok(None) => return true,
            Err(_) => return false,
        };
        let Some(packet) = self.filter.apply(packet) else {
            return true;
        };
        self.dest.lock().send(&packet).is_ok()
    }
}

const BRIDGE_TICK: Duration = Duration::from_millis(1);

pub struct Bridge {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Start pumping between `a` and `b` in a background thread, applying
    /// `ab_filter` to the a-to-b direction and `ba_filter` to the reverse.
    pub fn start(
        a: SharedChannel,
        b: SharedChannel,
        ab_filter: Option<Arc<dyn Mutator>>,
        ba_filter: Option<Arc<dyn Mutator>>,
    ) -> Self {
        let ab = Forwarder::new(a.clone(), b.clone(), ab_filter);
        let ba = Forwarder::new(b, a, ba_filter);
        let stop = Arc::new(AtomicBool::new(false));

        let worker_stop = stop.clone();
        let handle = match thread::Builder::new()
            .name("squall-bridge".into())
            .spawn(move || {
                while !worker_stop.load(Ordering::Acquire) {
                    if !(ab.poll() && ba.poll()) {
                        break;
                    }
                    thread::sleep(BRIDGE_TICK);
                }
                tracing::debug!("bridge stopped");
            }) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(%err, "failed to spawn bridge worker");
                None
            }
        };

        Self { stop, handle }
    }

    /// Whether the pump thread is still running.
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the pump and join it. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
    }
}
