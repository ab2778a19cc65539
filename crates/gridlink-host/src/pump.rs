//! The socket pump.
//!
//! One `Transport` instance owns the socket and every session, and a single
//! worker drives it: each `manual_poll` releases delayed simulated
//! datagrams, drains the socket non-blockingly, routes datagrams to their
//! session or the unconnected handler, merges queued application commands,
//! runs per-session maintenance, reaps dead sessions and flushes pending
//! sends and events. No other thread ever touches session state.

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    time::Instant,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use gridlink_conn::EndpointIdentity;
use gridlink_core::{
    config::Config,
    error::Result,
    interceptor::{Interceptor, NoopInterceptor},
    pool::BufferPool,
    transport::DatagramSocket,
};
use gridlink_protocol::{
    channel::Channel,
    envelope::{IncomingMessage, MessageKind},
    system::{Nonce, SystemMessage},
    wire,
};
use tracing::{debug, error, trace};

use crate::{
    events::{Action, NetEvent, SessionCommand, TransportCommand},
    session::Session,
    stats::TransportStats,
};

/// Out-of-band payload tag for unconnected application data.
const OOB_DATA: u8 = 0;
/// Out-of-band payload tag for NAT punch datagrams.
const OOB_NAT_PUNCH: u8 = 1;
/// Punch datagrams emitted toward an introduced partner.
const NAT_PUNCH_BURST: usize = 5;

/// Held inbound connect awaiting application approval.
#[derive(Debug)]
struct PendingConnect {
    nonce: Nonce,
    hail: Vec<u8>,
}

/// Socket pump multiplexing many sessions over one datagram socket.
pub struct Transport<TSocket, TSession>
where
    TSocket: DatagramSocket,
    TSession: Session<Command = SessionCommand, Event = NetEvent>,
{
    socket: TSocket,
    config: Config,
    identity: EndpointIdentity,
    sessions: HashMap<SocketAddr, TSession>,
    receive_buffer: Vec<u8>,

    command_tx: Sender<TransportCommand>,
    command_rx: Receiver<TransportCommand>,
    event_tx: Sender<NetEvent>,
    event_rx: Receiver<NetEvent>,

    pending_sends: Vec<(SocketAddr, Vec<u8>)>,
    pending_events: Vec<NetEvent>,
    interceptor: Box<dyn Interceptor>,
    send_pool: BufferPool,

    pending_approvals: HashMap<SocketAddr, PendingConnect>,
    next_discovery_request: u32,
    discovery_responders: HashMap<u32, HashSet<SocketAddr>>,
    punched_from: HashSet<SocketAddr>,

    stats: TransportStats,
}

impl<TSocket, TSession> Transport<TSocket, TSession>
where
    TSocket: DatagramSocket,
    TSession: Session<Command = SessionCommand, Event = NetEvent>,
{
    /// Creates a pump over a bound socket.
    pub fn new(socket: TSocket, config: Config, identity: EndpointIdentity) -> Self {
        Self::with_interceptor(socket, config, identity, None)
    }

    /// Creates a pump with a custom raw-datagram interceptor.
    pub fn with_interceptor(
        socket: TSocket,
        config: Config,
        identity: EndpointIdentity,
        interceptor: Option<Box<dyn Interceptor>>,
    ) -> Self {
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let mtu = config.mtu;
        Self {
            socket,
            receive_buffer: vec![0; mtu.max(2048) * 2],
            config,
            identity,
            sessions: HashMap::new(),
            command_tx,
            command_rx,
            event_tx,
            event_rx,
            pending_sends: Vec::new(),
            pending_events: Vec::new(),
            interceptor: interceptor.unwrap_or_else(|| Box::new(NoopInterceptor)),
            send_pool: BufferPool::new(mtu, 256),
            pending_approvals: HashMap::new(),
            next_discovery_request: 0,
            discovery_responders: HashMap::new(),
            punched_from: HashSet::new(),
            stats: TransportStats::default(),
        }
    }

    /// Sender for application commands (cloneable across threads).
    pub fn command_sender(&self) -> Sender<TransportCommand> {
        self.command_tx.clone()
    }

    /// Receiver for application events (cloneable across threads).
    pub fn event_receiver(&self) -> Receiver<NetEvent> {
        self.event_rx.clone()
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Aggregated transport statistics.
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Number of live sessions (any status).
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Addresses of sessions whose handshake has completed.
    pub fn connected_addrs(&self) -> Vec<SocketAddr> {
        self.sessions
            .iter()
            .filter(|(_, session)| session.is_connected())
            .map(|(&addr, _)| addr)
            .collect()
    }

    /// Runs one pump cycle.
    pub fn manual_poll(&mut self, time: Instant) {
        self.socket.tick(time);

        // Drain everything the socket has right now.
        loop {
            match self.socket.receive_datagram(self.receive_buffer.as_mut()) {
                Ok((payload, addr)) => {
                    let len = payload.len();
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += len as u64;

                    let keep = {
                        let slice = &mut self.receive_buffer[..len];
                        self.interceptor.on_receive(addr, slice)
                    };
                    if !keep {
                        continue;
                    }
                    let datagram = self.receive_buffer[..len].to_vec();

                    if let Some(session) = self.sessions.get_mut(&addr) {
                        let actions = session.process_datagram(&datagram, time);
                        self.handle_actions(addr, actions);
                    } else {
                        self.handle_unconnected(addr, &datagram, time);
                    }
                }
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::WouldBlock {
                        // Transient socket errors are absorbed, not fatal.
                        error!("error receiving datagram: {err:?}");
                    }
                    break;
                }
            }
        }

        // Merge application commands queued since the last cycle.
        while let Ok(command) = self.command_rx.try_recv() {
            self.handle_command(command, time);
        }

        // Per-session maintenance.
        let addrs: Vec<SocketAddr> = self.sessions.keys().copied().collect();
        for addr in addrs {
            if let Some(session) = self.sessions.get_mut(&addr) {
                let actions = session.heartbeat(time);
                self.handle_actions(addr, actions);
            }
        }

        // Reap sessions that reached their terminal state.
        let mut reaped = Vec::new();
        for (&addr, session) in self.sessions.iter_mut() {
            let (reap, actions) = session.poll_reap(time);
            if reap {
                reaped.push((addr, actions));
            }
        }
        for (addr, actions) in reaped {
            self.sessions.remove(&addr);
            self.handle_actions(addr, actions);
        }

        self.flush();
    }

    /// Disconnects every session and flushes best-effort goodbyes. Called
    /// by the worker when a cooperative shutdown is observed.
    pub fn shutdown(&mut self, reason: &str, time: Instant) {
        let addrs: Vec<SocketAddr> = self.sessions.keys().copied().collect();
        for addr in addrs {
            if let Some(session) = self.sessions.get_mut(&addr) {
                let actions = session
                    .process_command(SessionCommand::Disconnect { reason: reason.into() }, time);
                self.handle_actions(addr, actions);
            }
        }
        self.flush();
    }

    fn handle_actions(&mut self, addr: SocketAddr, actions: Vec<Action<NetEvent>>) {
        for action in actions {
            match action {
                Action::Send(bytes) => self.pending_sends.push((addr, bytes)),
                Action::Emit(event) => self.pending_events.push(event),
            }
        }
    }

    fn flush(&mut self) {
        for (addr, mut payload) in self.pending_sends.drain(..) {
            if !self.interceptor.on_send(addr, &mut payload) {
                self.send_pool.release(payload);
                continue;
            }
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += payload.len() as u64;
            if let Err(err) = self.socket.send_datagram(addr, &payload) {
                // A forcibly-closed remote surfaces here; the connection
                // itself is torn down by its ping timeout.
                error!("error sending datagram to {addr}: {err}");
            }
            self.send_pool.release(payload);
        }
        for event in self.pending_events.drain(..) {
            // The receiver lives as long as the transport, so this only
            // fails during teardown.
            let _ = self.event_tx.send(event);
        }
    }

    // ===== Application commands =====

    fn handle_command(&mut self, command: TransportCommand, time: Instant) {
        match command {
            TransportCommand::Connect { addr, hail } => {
                if self.sessions.contains_key(&addr) {
                    self.pending_events.push(NetEvent::Diagnostic {
                        addr,
                        detail: "connect requested for an existing connection".into(),
                    });
                    return;
                }
                let session =
                    TSession::open_outbound(&self.config, &self.identity, addr, hail, time);
                self.sessions.insert(addr, session);
            }
            TransportCommand::Send { addr, message } => {
                match self.sessions.get_mut(&addr) {
                    Some(session) => {
                        let actions =
                            session.process_command(SessionCommand::Send(message), time);
                        self.handle_actions(addr, actions);
                    }
                    None => self.pending_events.push(NetEvent::Diagnostic {
                        addr,
                        detail: "send addressed to an unknown connection".into(),
                    }),
                }
            }
            TransportCommand::Disconnect { addr, reason } => {
                if let Some(session) = self.sessions.get_mut(&addr) {
                    let actions =
                        session.process_command(SessionCommand::Disconnect { reason }, time);
                    self.handle_actions(addr, actions);
                }
            }
            TransportCommand::Approve { addr, hail } => match self.pending_approvals.remove(&addr)
            {
                Some(pending) => {
                    let session = TSession::open_inbound(
                        &self.config,
                        &self.identity,
                        addr,
                        pending.nonce,
                        pending.hail,
                        hail,
                        time,
                    );
                    self.sessions.insert(addr, session);
                }
                None => self.pending_events.push(NetEvent::Diagnostic {
                    addr,
                    detail: "approval for an unknown connection request".into(),
                }),
            },
            TransportCommand::Reject { addr, reason } => {
                if self.pending_approvals.remove(&addr).is_some() {
                    self.stats.connects_rejected += 1;
                    self.send_system(addr, &SystemMessage::ConnectionRejected { reason });
                }
            }
            TransportCommand::Discover { target } => {
                let request_id = self.next_discovery_request;
                self.next_discovery_request = self.next_discovery_request.wrapping_add(1);
                self.discovery_responders.insert(request_id, HashSet::new());
                self.send_system(
                    target,
                    &SystemMessage::Discovery {
                        app_identifier: self.identity.app_identifier.clone(),
                        nonce: self.identity.nonce,
                        request_id,
                    },
                );
            }
            TransportCommand::Introduce { a, b } => {
                self.send_system(a, &SystemMessage::NatIntroduction { partner: b });
                self.send_system(b, &SystemMessage::NatIntroduction { partner: a });
            }
            TransportCommand::SendOutOfBand { addr, payload } => {
                self.send_out_of_band(addr, OOB_DATA, &payload);
            }
        }
    }

    // ===== Unconnected messages =====

    fn handle_unconnected(&mut self, addr: SocketAddr, datagram: &[u8], time: Instant) {
        let envelopes = match wire::decode_datagram(datagram) {
            Ok(envelopes) => envelopes,
            Err(err) => {
                self.pending_events.push(NetEvent::Diagnostic {
                    addr,
                    detail: format!("undecodable unconnected datagram: {err}"),
                });
                return;
            }
        };
        for envelope in envelopes {
            match envelope.kind {
                MessageKind::System => match SystemMessage::decode(&envelope.payload) {
                    Ok(message) => self.handle_unconnected_system(addr, message, time),
                    Err(err) => self.pending_events.push(NetEvent::Diagnostic {
                        addr,
                        detail: format!("undecodable unconnected system message: {err}"),
                    }),
                },
                MessageKind::OutOfBand => match envelope.payload.split_first() {
                    Some((&OOB_DATA, rest)) => {
                        self.pending_events.push(NetEvent::Message(IncomingMessage {
                            addr,
                            channel: Channel::Unreliable,
                            sequence: 0,
                            payload: rest.to_vec().into(),
                        }));
                    }
                    Some((&OOB_NAT_PUNCH, _)) => {
                        if self.punched_from.insert(addr) {
                            self.pending_events.push(NetEvent::NatPunchSucceeded { addr });
                        }
                    }
                    _ => trace!("dropping unconnected out-of-band datagram from {addr}"),
                },
                _ => {
                    // Connection-scoped traffic from an address with no
                    // session: stale or spoofed, drop quietly.
                    trace!("dropping unconnected {:?} envelope from {addr}", envelope.kind);
                }
            }
        }
    }

    fn handle_unconnected_system(
        &mut self,
        addr: SocketAddr,
        message: SystemMessage,
        time: Instant,
    ) {
        match message {
            SystemMessage::Connect { app_identifier, nonce, hail } => {
                self.handle_connect_request(addr, app_identifier, nonce, hail, time);
            }
            SystemMessage::Discovery { app_identifier, nonce, request_id } => {
                if !self.config.respond_to_discovery {
                    return;
                }
                if app_identifier != self.identity.app_identifier {
                    debug!("ignoring discovery for {app_identifier:?} from {addr}");
                    return;
                }
                if nonce == self.identity.nonce {
                    // Our own broadcast came back; never answer ourselves.
                    return;
                }
                self.stats.discovery_responses_sent += 1;
                self.pending_events.push(NetEvent::DiscoveryRequested { addr });
                self.send_system(
                    addr,
                    &SystemMessage::DiscoveryResponse { request_id, data: Vec::new() },
                );
            }
            SystemMessage::DiscoveryResponse { request_id, data } => {
                match self.discovery_responders.get_mut(&request_id) {
                    Some(responders) => {
                        // One event per responder, however many duplicate
                        // responses arrive.
                        if responders.insert(addr) {
                            self.pending_events.push(NetEvent::Discovered { addr, data });
                        }
                    }
                    None => self.pending_events.push(NetEvent::Diagnostic {
                        addr,
                        detail: format!("discovery response for unknown request {request_id}"),
                    }),
                }
            }
            SystemMessage::NatIntroduction { partner } => {
                self.pending_events.push(NetEvent::NatIntroduced { addr: partner });
                // Punch a local NAT mapping toward the partner.
                for _ in 0..NAT_PUNCH_BURST {
                    self.send_out_of_band(partner, OOB_NAT_PUNCH, &[]);
                }
            }
            SystemMessage::ConnectionRejected { .. }
            | SystemMessage::Disconnect { .. }
            | SystemMessage::Ping { .. }
            | SystemMessage::Pong { .. } => {
                // Stragglers for a connection already reaped.
                trace!("dropping late connection-scoped message from {addr}");
            }
            other => {
                self.pending_events.push(NetEvent::Diagnostic {
                    addr,
                    detail: format!(
                        "system message type {} not valid while unconnected",
                        other.system_type()
                    ),
                });
            }
        }
    }

    fn handle_connect_request(
        &mut self,
        addr: SocketAddr,
        app_identifier: String,
        nonce: Nonce,
        hail: Vec<u8>,
        time: Instant,
    ) {
        if !self.config.accept_incoming {
            self.reject_connect(addr, "connections are not accepted");
            return;
        }
        if app_identifier != self.identity.app_identifier {
            self.pending_events.push(NetEvent::Diagnostic {
                addr,
                detail: format!("connect with wrong application identifier {app_identifier:?}"),
            });
            self.reject_connect(addr, "wrong application identifier");
            return;
        }
        if nonce == self.identity.nonce {
            self.reject_connect(addr, "cannot connect to self");
            return;
        }
        if self.sessions.len() >= self.config.max_connections {
            self.reject_connect(addr, "server full");
            return;
        }

        if self.config.require_approval {
            // Hold the request; a retransmitted connect just refreshes it.
            let first = !self.pending_approvals.contains_key(&addr);
            self.pending_approvals.insert(addr, PendingConnect { nonce, hail: hail.clone() });
            if first {
                self.pending_events.push(NetEvent::ConnectionRequested { addr, hail });
            }
        } else {
            let session = TSession::open_inbound(
                &self.config,
                &self.identity,
                addr,
                nonce,
                hail,
                Vec::new(),
                time,
            );
            self.sessions.insert(addr, session);
        }
    }

    fn reject_connect(&mut self, addr: SocketAddr, reason: &str) {
        self.stats.connects_rejected += 1;
        debug!("rejecting connect from {addr}: {reason}");
        self.send_system(addr, &SystemMessage::ConnectionRejected { reason: reason.into() });
    }

    // ===== Unconnected sends =====

    fn send_system(&mut self, addr: SocketAddr, message: &SystemMessage) {
        let mut datagram = self.send_pool.acquire();
        wire::write_envelope(&mut datagram, MessageKind::System, 0, 0, &message.encode());
        self.pending_sends.push((addr, datagram));
    }

    fn send_out_of_band(&mut self, addr: SocketAddr, tag: u8, payload: &[u8]) {
        let mut body = Vec::with_capacity(1 + payload.len());
        body.push(tag);
        body.extend_from_slice(payload);
        let mut datagram = self.send_pool.acquire();
        wire::write_envelope(&mut datagram, MessageKind::OutOfBand, 0, 0, &body);
        self.pending_sends.push((addr, datagram));
    }
}

impl<TSocket, TSession> std::fmt::Debug for Transport<TSocket, TSession>
where
    TSocket: DatagramSocket,
    TSession: Session<Command = SessionCommand, Event = NetEvent>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("sessions", &self.sessions.len())
            .field("pending_approvals", &self.pending_approvals.len())
            .finish()
    }
}
