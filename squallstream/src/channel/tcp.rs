//! Byte-stream channel over TCP.
//!
//! The socket runs in non-blocking mode. Incoming bytes accumulate in a
//! reassembly buffer and `try_recv` parses at most one length-prefixed
//! frame per call; `send` writes the whole record, retrying briefly on a
//! full kernel buffer so a record is never interleaved.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use bytes::{Buf, BytesMut};

use crate::channel::Channel;
use crate::error::{Result, SquallStreamError};
use crate::packet::Packet;

const READ_CHUNK: usize = 4096;
const WRITE_RETRY: Duration = Duration::from_millis(1);

/// A length prefix beyond this is corruption, not a frame worth waiting for.
const MAX_FRAME: usize = 1024 * 1024;

pub struct TcpChannel {
    sock: TcpStream,
    recv_buffer: BytesMut,
    closed: bool,
}

impl TcpChannel {
    /// Connect to a remote endpoint (client role).
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let sock = TcpStream::connect(addr)?;
        Self::from_stream(sock)
    }

    /// Bind the given port and accept exactly one remote (server role).
    /// The listener is dropped once the remote is attached.
    pub fn accept(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let (sock, peer) = listener.accept()?;
        tracing::debug!(%peer, "remote attached");
        Self::from_stream(sock)
    }

    /// Wrap an already-connected socket.
    pub fn from_stream(sock: TcpStream) -> Result<Self> {
        sock.set_nonblocking(true)?;
        sock.set_nodelay(true)?;
        Ok(Self {
            sock,
            recv_buffer: BytesMut::with_capacity(READ_CHUNK),
            closed: false,
        })
    }

    fn send_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.sock.write(buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(WRITE_RETRY),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Parse one frame out of the reassembly buffer, if one is complete.
    fn take_frame(&mut self) -> Result<Option<Packet>> {
        if self.recv_buffer.len() < 4 {
            return Ok(None);
        }
        let expected = u32::from_le_bytes([
            self.recv_buffer[0],
            self.recv_buffer[1],
            self.recv_buffer[2],
            self.recv_buffer[3],
        ]) as usize;
        if expected > MAX_FRAME {
            tracing::warn!(expected, "implausible frame length, closing channel");
            self.close();
            return Err(SquallStreamError::ChannelClosed);
        }
        if self.recv_buffer.len() < 4 + expected {
            return Ok(None);
        }

        self.recv_buffer.advance(4);
        let body = self.recv_buffer.split_to(expected);
        match Packet::decode(&body) {
            Ok(packet) => Ok(Some(packet)),
            Err(err) => {
                // No way to resynchronize a corrupt byte stream.
                tracing::warn!(%err, "malformed frame, closing channel");
                self.close();
                Err(SquallStreamError::ChannelClosed)
            }
        }
    }
}

impl Channel for TcpChannel {
    fn send(&mut self, packet: &Packet) -> Result<()> {
        if self.closed {
            return Err(SquallStreamError::ChannelClosed);
        }
        let frame = packet.encode_framed();
        if let Err(err) = self.send_all(&frame) {
            tracing::debug!(%err, "send failed, closing channel");
            self.close();
            return Err(SquallStreamError::ChannelClosed);
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Packet>> {
        if self.closed {
            return Err(SquallStreamError::ChannelClosed);
        }

        let mut chunk = [0u8; READ_CHUNK];
        match self.sock.read(&mut chunk) {
            Ok(0) => {
                self.close();
                return Err(SquallStreamError::ChannelClosed);
            }
            Ok(n) => self.recv_buffer.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                tracing::debug!(%err, "recv failed, closing channel");
                self.close();
                return Err(SquallStreamError::ChannelClosed);
            }
        }

        self.take_frame()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.sock.shutdown(std::net::Shutdown::Both);
        }
    }
}
