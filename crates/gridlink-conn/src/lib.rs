#![warn(missing_docs)]

//! gridlink-conn: the per-remote-peer connection state machine.
//!
//! A `Connection` owns everything specific to one remote endpoint:
//! handshake and lifecycle, RTT tracking, per-channel sequencing and
//! reliability bookkeeping, acknowledgment batching, resend scheduling,
//! fragmentation and reassembly, and outbound throttling. It is driven
//! exclusively by the owning transport's worker, so none of its state needs
//! locking.

/// Per-channel receive-side reliability and sequencing state.
pub mod channel_recv;
/// The connection aggregate.
pub mod connection;
/// Fragmentation and reassembly of oversized messages.
pub mod fragment;
/// Round-trip time estimation.
pub mod rtt;
/// Per-connection statistics.
pub mod stats;
/// Lifecycle status.
pub mod status;
/// Outbound byte throttling.
pub mod throttle;

pub use connection::{ConnEvent, Connection};
pub use stats::ConnectionStats;
pub use status::ConnectionStatus;

use gridlink_protocol::system::Nonce;

/// Local identity shared by every connection of one transport instance: the
/// application identifier plus the random endpoint nonce used for the
/// self-connect guard and discovery.
#[derive(Debug, Clone)]
pub struct EndpointIdentity {
    /// Application identifier; handshakes with a different one are rejected.
    pub app_identifier: String,
    /// Random 8-byte endpoint nonce.
    pub nonce: Nonce,
}

impl EndpointIdentity {
    /// Creates an identity with a freshly drawn nonce.
    pub fn generate(app_identifier: impl Into<String>) -> Self {
        use rand::Rng;
        Self { app_identifier: app_identifier.into(), nonce: rand::rng().random() }
    }
}
