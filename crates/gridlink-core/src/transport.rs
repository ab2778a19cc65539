//! Datagram socket abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr};

/// Low-level datagram socket abstraction.
///
/// Lets the pump run over a real UDP socket, the conditioned wrapper that
/// simulates loss and latency, or an in-memory socket in tests.
pub trait DatagramSocket {
    /// Sends a single datagram to the given address.
    fn send_datagram(&mut self, addr: SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives a single datagram into `buffer`, non-blocking. Returns
    /// `WouldBlock` when nothing is pending.
    fn receive_datagram<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// The local address this socket is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Gives the socket a chance to release internally delayed datagrams.
    /// The default implementation does nothing.
    fn tick(&mut self, _now: std::time::Instant) {}
}
