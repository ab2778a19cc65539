//! Network roles: `Client`, `Server` and `Peer`.
//!
//! All three wrap the same `Endpoint` core: a pump over a conditioned UDP
//! socket plus the two cross-thread channels. An endpoint can be polled
//! manually (deterministic tests, custom loops) or moved onto a dedicated
//! worker thread with [`Endpoint::spawn`]; shutdown is cooperative through a
//! flag observed at the top of the next pump cycle.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use gridlink_conn::{Connection, EndpointIdentity};
use gridlink_core::{
    bits::BitBuffer,
    config::Config,
    error::{ErrorKind, Result},
};
use gridlink_protocol::{
    channel::Channel,
    envelope::{OutgoingMessage, ReceiptToken},
};

use crate::{
    events::{NetEvent, TransportCommand},
    pump::Transport,
    socket::{ConditionedSocket, UdpDatagramSocket},
    stats::TransportStats,
    time::{Clock, SystemClock},
};

type NetTransport = Transport<ConditionedSocket<UdpDatagramSocket>, Connection>;

/// Shared core of every role: socket pump plus command/event channels.
pub struct Endpoint {
    transport: NetTransport,
    config: Config,
    commands: Sender<TransportCommand>,
    events: Receiver<NetEvent>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<AtomicBool>,
}

impl Endpoint {
    /// Binds to the given address with the system clock.
    pub fn bind<A: ToSocketAddrs>(addresses: A, config: Config) -> Result<Self> {
        Self::bind_with_clock(addresses, config, Arc::new(SystemClock))
    }

    /// Binds with a custom clock for testing.
    pub fn bind_with_clock<A: ToSocketAddrs>(
        addresses: A,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let socket = UdpDatagramSocket::bind(addresses, &config)?;
        let socket = ConditionedSocket::new(socket, config.simulation.clone());
        let identity = EndpointIdentity::generate(config.app_identifier.clone());
        let transport = Transport::new(socket, config.clone(), identity);
        let commands = transport.command_sender();
        let events = transport.event_receiver();
        Ok(Self {
            transport,
            config,
            commands,
            events,
            clock,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Cloneable sender for transport commands.
    pub fn command_sender(&self) -> Sender<TransportCommand> {
        self.commands.clone()
    }

    /// Cloneable receiver for transport events.
    pub fn event_receiver(&self) -> Receiver<NetEvent> {
        self.events.clone()
    }

    /// Transport statistics.
    pub fn stats(&self) -> &TransportStats {
        self.transport.stats()
    }

    /// Addresses of currently connected peers.
    pub fn connected_addrs(&self) -> Vec<SocketAddr> {
        self.transport.connected_addrs()
    }

    /// Non-blocking read of the next event.
    pub fn recv(&self) -> Option<NetEvent> {
        self.events.try_recv().ok()
    }

    /// Blocking read with a bound, for callers that want to wait.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<NetEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Opens a connection toward a remote endpoint.
    pub fn connect(&self, addr: SocketAddr, hail: Vec<u8>) -> Result<()> {
        self.command(TransportCommand::Connect { addr, hail })
    }

    /// Queues a message on the connection to `addr`. Oversized payloads
    /// fail here, at send time.
    pub fn send(&self, addr: SocketAddr, channel: Channel, payload: BitBuffer) -> Result<()> {
        self.submit(addr, OutgoingMessage::new(channel, payload))
    }

    /// Like [`send`](Self::send), firing a receipt event when acknowledged.
    pub fn send_with_receipt(
        &self,
        addr: SocketAddr,
        channel: Channel,
        payload: BitBuffer,
        token: ReceiptToken,
    ) -> Result<()> {
        self.submit(addr, OutgoingMessage::with_receipt(channel, payload, token))
    }

    fn submit(&self, addr: SocketAddr, message: OutgoingMessage) -> Result<()> {
        let size = message.payload.len_bytes();
        if size > self.config.max_message_size {
            return Err(ErrorKind::MessageTooLarge {
                size,
                limit: self.config.max_message_size,
            });
        }
        self.command(TransportCommand::Send { addr, message })
    }

    /// Starts a graceful disconnect from `addr`.
    pub fn disconnect(&self, addr: SocketAddr, reason: &str) -> Result<()> {
        self.command(TransportCommand::Disconnect { addr, reason: reason.into() })
    }

    /// Sends a discovery probe to a directed or broadcast address.
    pub fn discover(&self, target: SocketAddr) -> Result<()> {
        self.command(TransportCommand::Discover { target })
    }

    /// Introduces two peers to each other for NAT traversal.
    pub fn introduce(&self, a: SocketAddr, b: SocketAddr) -> Result<()> {
        self.command(TransportCommand::Introduce { a, b })
    }

    /// Sends unconnected application data.
    pub fn send_out_of_band(&self, addr: SocketAddr, payload: Vec<u8>) -> Result<()> {
        self.command(TransportCommand::SendOutOfBand { addr, payload })
    }

    fn command(&self, command: TransportCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| ErrorKind::ShutDown)
    }

    /// Runs one pump cycle at the given time.
    pub fn manual_poll(&mut self, time: Instant) {
        self.transport.manual_poll(time);
    }

    /// Flag observed by the polling loop; set it to stop.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Polls until the shutdown flag is set, then flushes best-effort
    /// goodbye messages for a bounded grace period. Blocking.
    pub fn start_polling(&mut self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.transport.manual_poll(self.clock.now());
            thread::sleep(self.config.pump_interval);
        }
        let deadline = self.clock.now() + self.config.shutdown_grace;
        self.transport.shutdown("host shutting down", self.clock.now());
        while self.clock.now() < deadline {
            self.transport.manual_poll(self.clock.now());
            thread::sleep(self.config.pump_interval);
        }
    }

    /// Moves the endpoint onto a dedicated worker thread, returning a
    /// handle carrying the command/event channels.
    pub fn spawn(mut self) -> Result<EndpointHandle> {
        let local_addr = self.local_addr()?;
        let commands = self.command_sender();
        let events = self.event_receiver();
        let shutdown = self.shutdown_flag();
        let config = self.config.clone();
        let worker = thread::Builder::new()
            .name("gridlink-pump".into())
            .spawn(move || self.start_polling())
            .map_err(ErrorKind::Io)?;
        Ok(EndpointHandle { local_addr, config, commands, events, shutdown, worker })
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").field("transport", &self.transport).finish()
    }
}

/// Handle to an endpoint running on its own worker thread.
pub struct EndpointHandle {
    local_addr: SocketAddr,
    config: Config,
    commands: Sender<TransportCommand>,
    events: Receiver<NetEvent>,
    shutdown: Arc<AtomicBool>,
    worker: thread::JoinHandle<()>,
}

impl EndpointHandle {
    /// The worker's bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cloneable sender for transport commands.
    pub fn command_sender(&self) -> Sender<TransportCommand> {
        self.commands.clone()
    }

    /// Cloneable receiver for transport events.
    pub fn event_receiver(&self) -> Receiver<NetEvent> {
        self.events.clone()
    }

    /// Non-blocking read of the next event.
    pub fn recv(&self) -> Option<NetEvent> {
        self.events.try_recv().ok()
    }

    /// Blocking read with a bound.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<NetEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Queues a message on the connection to `addr`.
    pub fn send(&self, addr: SocketAddr, channel: Channel, payload: BitBuffer) -> Result<()> {
        let size = payload.len_bytes();
        if size > self.config.max_message_size {
            return Err(ErrorKind::MessageTooLarge {
                size,
                limit: self.config.max_message_size,
            });
        }
        self.commands
            .send(TransportCommand::Send { addr, message: OutgoingMessage::new(channel, payload) })
            .map_err(|_| ErrorKind::ShutDown)
    }

    /// Signals the worker to stop, flushes goodbyes, and joins it.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.worker.join();
    }
}

// ===== Roles =====

/// Client role: exactly one connection, originated locally.
#[derive(Debug)]
pub struct Client {
    endpoint: Endpoint,
    remote: SocketAddr,
}

impl Client {
    /// Binds a local socket and starts connecting to `remote`.
    pub fn connect<A: ToSocketAddrs>(
        bind: A,
        remote: SocketAddr,
        mut config: Config,
        hail: Vec<u8>,
    ) -> Result<Self> {
        config.accept_incoming = false;
        let endpoint = Endpoint::bind(bind, config)?;
        endpoint.connect(remote, hail)?;
        Ok(Self { endpoint, remote })
    }

    /// The server this client talks to.
    pub fn server_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Queues a message for the server.
    pub fn send(&self, channel: Channel, payload: BitBuffer) -> Result<()> {
        self.endpoint.send(self.remote, channel, payload)
    }

    /// Queues a message whose acknowledgment fires a receipt event.
    pub fn send_with_receipt(
        &self,
        channel: Channel,
        payload: BitBuffer,
        token: ReceiptToken,
    ) -> Result<()> {
        self.endpoint.send_with_receipt(self.remote, channel, payload, token)
    }

    /// Starts a graceful disconnect from the server.
    pub fn disconnect(&self, reason: &str) -> Result<()> {
        self.endpoint.disconnect(self.remote, reason)
    }

    /// Access to the shared endpoint core.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Non-blocking read of the next event.
    pub fn recv(&self) -> Option<NetEvent> {
        self.endpoint.recv()
    }

    /// Runs one pump cycle.
    pub fn manual_poll(&mut self, time: Instant) {
        self.endpoint.manual_poll(time);
    }

    /// Moves the client onto a dedicated worker thread.
    pub fn spawn(self) -> Result<EndpointHandle> {
        self.endpoint.spawn()
    }
}

/// Server role: accepts and multiplexes many connections.
#[derive(Debug)]
pub struct Server {
    endpoint: Endpoint,
}

impl Server {
    /// Binds a listening transport. `config.max_connections`,
    /// `require_approval` and `respond_to_discovery` shape its behavior.
    pub fn bind<A: ToSocketAddrs>(addresses: A, mut config: Config) -> Result<Self> {
        config.accept_incoming = true;
        Ok(Self { endpoint: Endpoint::bind(addresses, config)? })
    }

    /// The bound listening address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Approves a held connection request, optionally with hail data.
    pub fn approve(&self, addr: SocketAddr, hail: Vec<u8>) -> Result<()> {
        self.endpoint.command(TransportCommand::Approve { addr, hail })
    }

    /// Rejects a held connection request with a reason.
    pub fn reject(&self, addr: SocketAddr, reason: &str) -> Result<()> {
        self.endpoint.command(TransportCommand::Reject { addr, reason: reason.into() })
    }

    /// Queues a message for one connected peer.
    pub fn send(&self, addr: SocketAddr, channel: Channel, payload: BitBuffer) -> Result<()> {
        self.endpoint.send(addr, channel, payload)
    }

    /// Sends the same payload to every connected peer. Returns how many
    /// peers it was queued for.
    pub fn broadcast(&self, channel: Channel, payload: &BitBuffer) -> Result<usize> {
        self.broadcast_except(None, channel, payload)
    }

    /// Broadcast excluding one peer (commonly the message's originator).
    pub fn broadcast_except(
        &self,
        except: Option<SocketAddr>,
        channel: Channel,
        payload: &BitBuffer,
    ) -> Result<usize> {
        let mut count = 0;
        for addr in self.endpoint.connected_addrs() {
            if Some(addr) == except {
                continue;
            }
            self.endpoint.send(addr, channel, BitBuffer::from_bytes(payload.as_bytes().to_vec()))?;
            count += 1;
        }
        Ok(count)
    }

    /// Starts a graceful disconnect of one peer.
    pub fn disconnect(&self, addr: SocketAddr, reason: &str) -> Result<()> {
        self.endpoint.disconnect(addr, reason)
    }

    /// Access to the shared endpoint core.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Non-blocking read of the next event.
    pub fn recv(&self) -> Option<NetEvent> {
        self.endpoint.recv()
    }

    /// Runs one pump cycle.
    pub fn manual_poll(&mut self, time: Instant) {
        self.endpoint.manual_poll(time);
    }

    /// Moves the server onto a dedicated worker thread.
    pub fn spawn(self) -> Result<EndpointHandle> {
        self.endpoint.spawn()
    }
}

/// Peer role: a server that may also actively originate connections.
#[derive(Debug)]
pub struct Peer {
    endpoint: Endpoint,
}

impl Peer {
    /// Binds a transport that both accepts and originates connections.
    pub fn bind<A: ToSocketAddrs>(addresses: A, mut config: Config) -> Result<Self> {
        config.accept_incoming = true;
        Ok(Self { endpoint: Endpoint::bind(addresses, config)? })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Opens a connection toward another peer.
    pub fn connect_to(&self, addr: SocketAddr, hail: Vec<u8>) -> Result<()> {
        self.endpoint.connect(addr, hail)
    }

    /// Queues a message for a connected peer.
    pub fn send(&self, addr: SocketAddr, channel: Channel, payload: BitBuffer) -> Result<()> {
        self.endpoint.send(addr, channel, payload)
    }

    /// Sends a discovery probe.
    pub fn discover(&self, target: SocketAddr) -> Result<()> {
        self.endpoint.discover(target)
    }

    /// Access to the shared endpoint core.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Non-blocking read of the next event.
    pub fn recv(&self) -> Option<NetEvent> {
        self.endpoint.recv()
    }

    /// Runs one pump cycle.
    pub fn manual_poll(&mut self, time: Instant) {
        self.endpoint.manual_poll(time);
    }

    /// Moves the peer onto a dedicated worker thread.
    pub fn spawn(self) -> Result<EndpointHandle> {
        self.endpoint.spawn()
    }
}
