//! Channel construction and filter-chain assembly shared by the sender
//! and receiver front-ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use squallstream::channel::tcp::TcpChannel;
use squallstream::channel::udp::UdpChannel;
use squallstream::{Channel, Composite, ControllerClient, Mutator, StatsRelay, Stream};
use squalltrust::{RsaCryptor, RsaKey};

/// Install the standard log subscriber, honoring `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Dial a remote endpoint (client role).
pub fn connect_channel(udp: bool, host: &str, port: u16) -> Result<Box<dyn Channel>> {
    let channel: Box<dyn Channel> = if udp {
        Box::new(UdpChannel::connect((host, port))
            .with_context(|| format!("cannot reach udp endpoint {host}:{port}"))?)
    } else {
        Box::new(TcpChannel::connect((host, port))
            .with_context(|| format!("cannot reach tcp endpoint {host}:{port}"))?)
    };
    Ok(channel)
}

/// Wait for a single remote (server role).
pub fn accept_channel(udp: bool, port: u16) -> Result<Box<dyn Channel>> {
    let channel: Box<dyn Channel> = if udp {
        Box::new(UdpChannel::bind(port).with_context(|| format!("cannot bind udp port {port}"))?)
    } else {
        Box::new(TcpChannel::accept(port).with_context(|| format!("cannot bind tcp port {port}"))?)
    };
    Ok(channel)
}

/// Which statistics counters this endpoint reports under, plus optional
/// key files enabling the payload cryptor.
pub struct FilterSpec {
    pub sent_key: &'static str,
    pub recv_key: &'static str,
    pub pub_key: Option<PathBuf>,
    pub priv_key: Option<PathBuf>,
}

fn load_key(path: &Path) -> Result<RsaKey> {
    RsaKey::load(path).with_context(|| format!("cannot load key file {}", path.display()))
}

/// Build a stream whose filters report to the controller and, when key
/// files are given, encrypt transmitted payloads and decrypt received
/// ones. The cryptor sits inside the transmit counter and outside the
/// receive counter, so both counters see wire packets.
pub fn create_stream(
    channel: Box<dyn Channel>,
    controller: Arc<ControllerClient>,
    spec: FilterSpec,
) -> Result<Stream> {
    let mut transmit: Arc<dyn Mutator> =
        Arc::new(StatsRelay::new(spec.sent_key, controller.clone()));
    let mut recv: Arc<dyn Mutator> = Arc::new(StatsRelay::new(spec.recv_key, controller));

    if let Some(path) = &spec.pub_key {
        let opener = RsaCryptor::decryptor(load_key(path)?)?;
        recv = Arc::new(Composite::new(Arc::new(opener), recv));
    }
    if let Some(path) = &spec.priv_key {
        let sealer = RsaCryptor::encryptor(load_key(path)?)?;
        transmit = Arc::new(Composite::new(transmit, Arc::new(sealer)));
    }

    Ok(Stream::with_filters(channel, Some(recv), Some(transmit)))
}
