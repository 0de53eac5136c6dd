//! Thin bounded-datagram transport over a UDP socket.
//!
//! The framing layers above assemble complete packets in a staging buffer;
//! this module only moves them whole. Socket setup, peer addressing policy
//! and the session handshake live with the caller. Timeouts are enforced by
//! the socket's own read timeout; [`is_timeout`] folds the two error kinds
//! platforms report into one check, so receive loops can simply retry.

use std::{io, net::SocketAddr};

/// Returns `true` if the I/O error kind represents a timeout condition.
#[inline(always)]
pub fn is_timeout(kind: io::ErrorKind) -> bool {
    use io::ErrorKind::*;
    [WouldBlock, TimedOut].contains(&kind)
}

/// A UDP socket bound to one session's MTU.
#[derive(Debug)]
pub struct Link {
    sock: std::net::UdpSocket,
    mtu: usize,
}

impl Link {
    #[inline(always)]
    pub fn new(sock: std::net::UdpSocket, mtu: u32) -> Self {
        Self {
            sock,
            mtu: mtu as usize,
        }
    }

    #[inline(always)]
    pub fn socket(&self) -> &std::net::UdpSocket {
        &self.sock
    }

    #[inline(always)]
    pub const fn mtu(&self) -> usize {
        self.mtu
    }

    /// Sends one assembled packet as a single datagram.
    ///
    /// Oversized packets are refused locally instead of letting the network
    /// fragment them; a short send is reported as an error since a partial
    /// packet is useless to the peer.
    pub fn send_to(&self, packet: &[u8], dest_addr: SocketAddr) -> io::Result<()> {
        if packet.len() > self.mtu {
            log::error!(
                "refusing to send a {}-byte packet over a {}-byte mtu link",
                packet.len(),
                self.mtu
            );
            return Err(io::ErrorKind::InvalidInput.into());
        }

        if self.sock.send_to(packet, dest_addr)? != packet.len() {
            Err(io::ErrorKind::Other.into())
        } else {
            Ok(())
        }
    }

    /// Receives one datagram into `buf`.
    ///
    /// Timeout-kind errors pass through; callers loop on [`is_timeout`] the
    /// same way they would on a raw socket.
    #[inline(always)]
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.sock.recv_from(buf)
    }
}
