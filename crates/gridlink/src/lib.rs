#![warn(missing_docs)]

//! Gridlink: a small public API facade for the workspace.
//!
//! This crate re-exports the surface most applications need to exchange
//! messages over unreliable UDP with per-channel delivery guarantees:
//!
//! - Roles and events (`Client`, `Server`, `Peer`, `NetEvent`)
//! - Channels and message types (`Channel`, `BitBuffer`)
//! - Configuration (`Config`, `SimulatedConditions`)
//!
//! Example
//! ```ignore
//! use gridlink::{BitBuffer, Channel, Client, Config, NetEvent, Server};
//! use std::time::Instant;
//!
//! let mut server = Server::bind("127.0.0.1:0", Config::new("Game")).unwrap();
//! let server_addr = server.local_addr().unwrap();
//! let mut client =
//!     Client::connect("127.0.0.1:0", server_addr, Config::new("Game"), vec![]).unwrap();
//!
//! // Drive both ends until the handshake completes, then exchange
//! // messages on reliable-ordered channel 1.
//! let mut payload = BitBuffer::new();
//! payload.write_str("hello");
//! client.send(Channel::ReliableOrdered(1), payload).unwrap();
//! loop {
//!     let now = Instant::now();
//!     client.manual_poll(now);
//!     server.manual_poll(now);
//!     if let Some(NetEvent::Message(mut message)) = server.recv() {
//!         assert_eq!(message.payload.read_str().unwrap(), "hello");
//!         break;
//!     }
//! }
//! ```

pub use gridlink_core::{
    bits::BitBuffer,
    config::{Config, SimulatedConditions},
    error::{ErrorKind, Result},
};
pub use gridlink_protocol::{
    channel::{Channel, DeliveryClass},
    envelope::{IncomingMessage, OutgoingMessage, ReceiptToken},
};
pub use gridlink_conn::{ConnectionStats, ConnectionStatus};
pub use gridlink_host::{
    Client, Endpoint, EndpointHandle, NetEvent, Peer, Server, TransportCommand, TransportStats,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        BitBuffer, Channel, Client, Config, NetEvent, Peer, Server, SimulatedConditions,
    };
}
