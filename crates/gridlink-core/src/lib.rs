#![warn(missing_docs)]

//! gridlink-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core utilities shared across all layers:
//! - Configuration types
//! - Error handling
//! - The bit-granular buffer used as the sole data-interchange type
//! - Buffer pooling
//! - The pluggable datagram-socket trait and the raw-packet interceptor seam
//!
//! Protocol and connection logic live in the specialized crates:
//! - `gridlink-protocol`: channels, wire framing, system message codec
//! - `gridlink-conn`: per-remote-peer connection state machine
//! - `gridlink-host`: socket pump, roles, discovery and NAT assistance

/// Protocol constants shared across layers.
pub mod constants {
    /// Number of logical channels (one unreliable, 15 sequenced, one
    /// reliable-unordered, 15 reliable-ordered).
    pub const CHANNEL_COUNT: u8 = 32;
    /// Size of the fixed part of an envelope header: kind/channel byte plus
    /// the 16-bit sequence number. The payload length var-int follows.
    pub const ENVELOPE_FIXED_HEADER: usize = 3;
    /// Size of one acknowledgment group on the wire: channel byte plus
    /// 16-bit sequence number.
    pub const ACK_GROUP_SIZE: usize = 3;
    /// Size of the fixed part of a fragment prefix (group id); index and
    /// total follow as var-ints.
    pub const FRAGMENT_GROUP_ID_SIZE: usize = 2;
    /// Length of the random endpoint nonce carried by handshake and
    /// discovery messages.
    pub const NONCE_LEN: usize = 8;
    /// Default maximum transmission unit for a single datagram payload.
    ///
    /// Derived from ethernet_mtu - ipv6_header_size - udp_header_size
    ///       1452 = 1500         - 40               - 8
    /// rounded down to leave room for lower-layer variability.
    pub const DEFAULT_MTU: usize = 1408;
    /// Base delay added to every resend computation, independent of RTT.
    pub const RESEND_BASE_MILLIS: u64 = 25;
}

/// Bit-granular read/write buffer.
pub mod bits;
/// Configuration options for the transport.
pub mod config;
/// Error types and results.
pub mod error;
/// Raw-datagram interception for inspection, mutation, or dropping.
pub mod interceptor;
/// Buffer recycling to reduce allocation churn on hot paths.
pub mod pool;
/// Datagram socket abstraction for pluggable I/O.
pub mod transport;
