//! Datagram channel over UDP.
//!
//! Each datagram carries exactly one framed record. The server role binds
//! without a peer and latches the source address of the most recent
//! datagram; until a peer is known, `send` sleep-retries. A client
//! announces itself with an empty datagram so the server can latch before
//! any data flows the other way.
//!
//! The latch follows whatever datagram arrived last, so an off-path party
//! that can spoof the source address can steal the session. That is a
//! property of the protocol under study, not an accident.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::Duration;

use crate::channel::Channel;
use crate::error::{Result, SquallStreamError};
use crate::packet::Packet;

const MAX_DATAGRAM: usize = 64 * 1024;
const PEER_WAIT: Duration = Duration::from_millis(10);

pub struct UdpChannel {
    sock: UdpSocket,
    peer: Option<SocketAddr>,
    closed: bool,
}

impl UdpChannel {
    /// Client role: bind an ephemeral port and announce to the remote.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let peer = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))?;
        let sock = UdpSocket::bind("0.0.0.0:0")?;
        sock.set_nonblocking(true)?;
        // Empty announcement datagram so the server-side latch fires.
        sock.send_to(&[], peer)?;
        Ok(Self {
            sock,
            peer: Some(peer),
            closed: false,
        })
    }

    /// Server role: bind the given port; the peer is latched from the
    /// first datagram that arrives.
    pub fn bind(port: u16) -> Result<Self> {
        let sock = UdpSocket::bind(("0.0.0.0", port))?;
        sock.set_nonblocking(true)?;
        Ok(Self {
            sock,
            peer: None,
            closed: false,
        })
    }

    /// Local socket address (useful when bound to an ephemeral port).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.sock.local_addr()?)
    }

    fn parse_datagram(&mut self, datagram: &[u8]) -> Result<Option<Packet>> {
        if datagram.is_empty() {
            // Peer announcement; nothing to deliver.
            return Ok(None);
        }
        if datagram.len() < 4 {
            tracing::warn!(len = datagram.len(), "runt datagram, closing channel");
            self.close();
            return Err(SquallStreamError::ChannelClosed);
        }
        let expected = u32::from_le_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]) as usize;
        if datagram.len() != 4 + expected {
            tracing::warn!(
                len = datagram.len(),
                expected = 4 + expected,
                "datagram does not carry exactly one frame, closing channel"
            );
            self.close();
            return Err(SquallStreamError::ChannelClosed);
        }
        match Packet::decode(&datagram[4..]) {
            Ok(packet) => Ok(Some(packet)),
            Err(err) => {
                tracing::warn!(%err, "malformed frame, closing channel");
                self.close();
                Err(SquallStreamError::ChannelClosed)
            }
        }
    }
}

impl Channel for UdpChannel {
    fn send(&mut self, packet: &Packet) -> Result<()> {
        // Server role: no destination until a peer has been observed.
        let peer = loop {
            if self.closed {
                return Err(SquallStreamError::ChannelClosed);
            }
            match self.peer {
                Some(peer) => break peer,
                None => thread::sleep(PEER_WAIT),
            }
        };

        let frame = packet.encode_framed();
        if frame.len() > MAX_DATAGRAM {
            return Err(SquallStreamError::PayloadTooLarge {
                size: packet.data.len(),
                max: self.max_payload_hint(),
            });
        }
        match self.sock.send_to(&frame, peer) {
            Ok(_) => Ok(()),
            // A full socket buffer just drops the datagram; the
            // reliability layer retransmits.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => {
                tracing::debug!(%err, "send failed, closing channel");
                self.close();
                Err(SquallStreamError::ChannelClosed)
            }
        }
    }

    fn try_recv(&mut self) -> Result<Option<Packet>> {
        if self.closed {
            return Err(SquallStreamError::ChannelClosed);
        }

        let mut buf = [0u8; MAX_DATAGRAM];
        match self.sock.recv_from(&mut buf) {
            Ok((n, source)) => {
                if self.peer != Some(source) {
                    tracing::debug!(%source, "peer latched");
                    self.peer = Some(source);
                }
                self.parse_datagram(&buf[..n])
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            // Linux reports ICMP port-unreachable for a prior send here;
            // that ends this tick, not the channel.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
            Err(err) => {
                tracing::debug!(%err, "recv failed, closing channel");
                self.close();
                Err(SquallStreamError::ChannelClosed)
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
