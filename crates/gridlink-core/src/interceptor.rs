//! Raw-datagram interception.
//!
//! An interceptor sees every datagram right after the socket read and right
//! before the socket write, and may inspect, rewrite, or drop it. The seam
//! exists for packet capture, lightweight obfuscation, and tests that need
//! to tamper with traffic below the protocol layer.

use std::net::SocketAddr;

/// Hooks around the raw send and receive paths.
pub trait Interceptor: Send {
    /// Called for every datagram read from the socket, before any protocol
    /// processing. Returning `false` drops the datagram.
    fn on_receive(&mut self, addr: SocketAddr, data: &mut [u8]) -> bool;

    /// Called for every datagram about to be written to the socket, after
    /// protocol encoding. Returning `false` drops the datagram.
    fn on_send(&mut self, addr: SocketAddr, data: &mut Vec<u8>) -> bool;
}

/// Default interceptor that passes all datagrams through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct NoopInterceptor;

impl Interceptor for NoopInterceptor {
    fn on_receive(&mut self, _addr: SocketAddr, _data: &mut [u8]) -> bool {
        true
    }

    fn on_send(&mut self, _addr: SocketAddr, _data: &mut Vec<u8>) -> bool {
        true
    }
}
