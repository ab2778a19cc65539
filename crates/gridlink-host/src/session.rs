use std::{fmt::Debug, net::SocketAddr, time::Instant};

use gridlink_conn::EndpointIdentity;
use gridlink_core::config::Config;
use gridlink_protocol::system::Nonce;

use crate::events::Action;

/// Engine the pump drives for one remote endpoint.
///
/// The pump owns the socket and the clock; a session owns everything about
/// its one peer and communicates purely through returned [`Action`]s.
pub trait Session: Debug {
    /// Commands the application can address to this session.
    type Command;
    /// Events this session surfaces to the application.
    type Event;

    /// Creates a session initiating an outbound handshake.
    fn open_outbound(
        config: &Config,
        identity: &EndpointIdentity,
        addr: SocketAddr,
        hail: Vec<u8>,
        time: Instant,
    ) -> Self;

    /// Creates a session for a validated (and, if required, approved)
    /// inbound connect.
    fn open_inbound(
        config: &Config,
        identity: &EndpointIdentity,
        addr: SocketAddr,
        remote_nonce: Nonce,
        remote_hail: Vec<u8>,
        local_hail: Vec<u8>,
        time: Instant,
    ) -> Self;

    /// True once the handshake has completed.
    fn is_connected(&self) -> bool;

    /// Processes one received datagram.
    fn process_datagram(&mut self, payload: &[u8], time: Instant) -> Vec<Action<Self::Event>>;

    /// Executes an application command.
    fn process_command(&mut self, command: Self::Command, time: Instant)
        -> Vec<Action<Self::Event>>;

    /// Runs per-tick maintenance: handshake retries, pings, resend scans,
    /// send-queue flushes.
    fn heartbeat(&mut self, time: Instant) -> Vec<Action<Self::Event>>;

    /// Whether the pump should reap this session, plus any final actions.
    fn poll_reap(&mut self, time: Instant) -> (bool, Vec<Action<Self::Event>>);
}
