//! Commands into the worker and events out of it.
//!
//! These two types are the only application-facing thread boundaries: the
//! application pushes `TransportCommand`s through a channel that the worker
//! drains at the start of each pump cycle, and the worker pushes `NetEvent`s
//! through a channel the application drains at its leisure. Neither side
//! ever blocks.

use std::net::SocketAddr;

use gridlink_protocol::envelope::{IncomingMessage, OutgoingMessage, ReceiptToken};

/// Instructions a session hands back to the pump.
#[derive(Debug)]
pub enum Action<E> {
    /// Write these bytes to the session's remote address.
    Send(Vec<u8>),
    /// Surface an event to the application.
    Emit(E),
}

/// Commands a session knows how to execute.
#[derive(Debug)]
pub enum SessionCommand {
    /// Queue a user message.
    Send(OutgoingMessage),
    /// Begin a graceful disconnect.
    Disconnect {
        /// Reason transmitted to the remote peer.
        reason: String,
    },
}

/// Commands the application sends to the transport worker.
#[derive(Debug)]
pub enum TransportCommand {
    /// Open an outbound connection, optionally carrying hail data.
    Connect {
        /// Remote endpoint to connect to.
        addr: SocketAddr,
        /// Hail payload riding the handshake.
        hail: Vec<u8>,
    },
    /// Queue a message on an existing connection.
    Send {
        /// The connection's remote endpoint.
        addr: SocketAddr,
        /// Message to queue.
        message: OutgoingMessage,
    },
    /// Gracefully disconnect a connection.
    Disconnect {
        /// The connection's remote endpoint.
        addr: SocketAddr,
        /// Reason transmitted to the remote peer.
        reason: String,
    },
    /// Approve a held connection request (approval mode).
    Approve {
        /// The requesting endpoint.
        addr: SocketAddr,
        /// Hail payload for the connect response.
        hail: Vec<u8>,
    },
    /// Reject a held connection request with a reason (approval mode).
    Reject {
        /// The requesting endpoint.
        addr: SocketAddr,
        /// Reason sent to the requester.
        reason: String,
    },
    /// Send a discovery probe to a directed or broadcast address.
    Discover {
        /// Probe destination.
        target: SocketAddr,
    },
    /// Introduce two endpoints to each other for NAT traversal.
    Introduce {
        /// First endpoint.
        a: SocketAddr,
        /// Second endpoint.
        b: SocketAddr,
    },
    /// Send unconnected application data outside any connection.
    SendOutOfBand {
        /// Destination endpoint.
        addr: SocketAddr,
        /// Opaque payload.
        payload: Vec<u8>,
    },
}

/// Events the transport surfaces to the application.
#[derive(Debug)]
pub enum NetEvent {
    /// A fully processed message is ready to read.
    Message(IncomingMessage),
    /// An inbound connect is held for application approval.
    ConnectionRequested {
        /// The requesting endpoint.
        addr: SocketAddr,
        /// Hail payload the requester attached.
        hail: Vec<u8>,
    },
    /// A connection finished its handshake.
    Connected {
        /// The remote endpoint.
        addr: SocketAddr,
        /// Hail payload the remote peer attached.
        hail: Vec<u8>,
    },
    /// An outbound connect was refused by the remote peer.
    Rejected {
        /// The remote endpoint.
        addr: SocketAddr,
        /// Reason the remote peer sent.
        reason: String,
    },
    /// A connection reached `Disconnected`.
    Disconnected {
        /// The remote endpoint.
        addr: SocketAddr,
        /// Local or remote teardown reason.
        reason: String,
    },
    /// A reliable message tagged with a receipt token was acknowledged.
    Receipt {
        /// The remote endpoint.
        addr: SocketAddr,
        /// The application's receipt token.
        token: ReceiptToken,
    },
    /// A malformed or unexpected message was dropped.
    Diagnostic {
        /// The offending endpoint.
        addr: SocketAddr,
        /// Human-readable description.
        detail: String,
    },
    /// Someone probed this transport with a matching identifier.
    DiscoveryRequested {
        /// The prober's endpoint.
        addr: SocketAddr,
    },
    /// A response to one of our discovery probes (first per responder).
    Discovered {
        /// The responder's endpoint.
        addr: SocketAddr,
        /// Application payload the responder attached.
        data: Vec<u8>,
    },
    /// A third party asked this transport to punch toward an endpoint.
    NatIntroduced {
        /// The partner endpoint to punch toward.
        addr: SocketAddr,
    },
    /// A NAT punch datagram arrived from an introduced partner.
    NatPunchSucceeded {
        /// The partner endpoint the punch came from.
        addr: SocketAddr,
    },
}
