#![warn(missing_docs)]

//! gridlink-host: socket pump, network roles, discovery and NAT assistance.
//!
//! The pump (`Transport`) owns the raw socket and every connection, driven
//! by exactly one worker. Applications interact through two thread-safe
//! boundaries only: a command channel in and an event channel out. The
//! `Client`, `Server` and `Peer` roles wrap the pump for the three usage
//! shapes, and the conditioned socket injects simulated loss, duplication
//! and latency for testing.

/// Session impl binding the connection state machine into the pump.
mod conn_session;
/// Commands, events and session actions.
pub mod events;
/// The socket pump.
pub mod pump;
/// Client, Server and Peer roles over the shared endpoint core.
pub mod roles;
/// Session trait the pump drives.
pub mod session;
/// UDP socket wrapper and simulated network conditions.
pub mod socket;
/// Transport-level statistics.
pub mod stats;
/// Time source abstraction.
pub mod time;

pub use events::{NetEvent, SessionCommand, TransportCommand};
pub use pump::Transport;
pub use roles::{Client, Endpoint, EndpointHandle, Peer, Server};
pub use session::Session;
pub use socket::{ConditionedSocket, UdpDatagramSocket};
pub use stats::TransportStats;
pub use time::{Clock, SystemClock};
