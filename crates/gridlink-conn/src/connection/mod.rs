use std::{
    collections::{HashMap, VecDeque},
    fmt,
    net::SocketAddr,
    time::{Duration, Instant},
};

use gridlink_core::{
    config::Config,
    error::{ErrorKind, Result},
};
use gridlink_protocol::{
    envelope::{OutgoingMessage, ReceiptToken},
    sequencing::SequenceNumber,
    system::{Nonce, SystemMessage},
    wire::{self, Envelope},
};

use crate::{
    channel_recv::{ReliableReceiveState, SequencedReceiveState},
    fragment::{self, FragmentAssembly},
    rtt::RttEstimator,
    stats::ConnectionStats,
    status::ConnectionStatus,
    throttle::SendThrottle,
    EndpointIdentity,
};

mod handshake;
mod receiver;
mod sender;

pub(crate) use sender::{QueuedSend, SendPayload};

/// Events a connection surfaces to the owning transport.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnEvent {
    /// Handshake completed; carries the remote hail payload.
    Connected {
        /// Hail data the remote peer attached to the handshake.
        hail: Vec<u8>,
    },
    /// The remote peer refused the connect attempt.
    Rejected {
        /// Reason sent by the remote peer.
        reason: String,
    },
    /// The connection reached `Disconnected`.
    Disconnected {
        /// Local or remote reason for the teardown.
        reason: String,
    },
    /// A reliable message tagged with a receipt token was acknowledged.
    Receipt {
        /// The token the application attached at send time.
        token: ReceiptToken,
    },
    /// A malformed or unexpected message was dropped (never fatal).
    Diagnostic {
        /// Human-readable description for the application's logs.
        detail: String,
    },
}

/// Per-remote-peer state machine.
///
/// All mutation happens on the owning transport's worker; the connection
/// itself holds no locks.
pub struct Connection {
    pub(crate) remote_address: SocketAddr,
    pub(crate) config: Config,
    pub(crate) identity: EndpointIdentity,
    pub(crate) status: ConnectionStatus,
    /// True when this side initiated the handshake.
    pub(crate) outbound: bool,
    /// Time base for ping timestamps.
    pub(crate) epoch: Instant,

    // Handshake
    pub(crate) connect_attempts: u32,
    pub(crate) last_connect_attempt: Option<Instant>,
    pub(crate) connect_started: Instant,
    pub(crate) local_hail: Vec<u8>,
    pub(crate) remote_hail: Vec<u8>,
    pub(crate) remote_nonce: Option<Nonce>,

    // Liveness
    pub(crate) last_heard: Instant,
    pub(crate) last_sent: Instant,
    pub(crate) last_ping: Option<Instant>,
    pub(crate) last_pong: Instant,
    pub(crate) rtt: RttEstimator,

    // Sending
    pub(crate) control: VecDeque<SystemMessage>,
    pub(crate) unsent: VecDeque<QueuedSend>,
    pub(crate) pending: HashMap<(u8, SequenceNumber), sender::PendingReliable>,
    pub(crate) next_seq: [SequenceNumber; 32],
    pub(crate) next_fragment_group: u16,
    pub(crate) throttle: SendThrottle,

    // Receiving
    pub(crate) sequenced_recv: HashMap<u8, SequencedReceiveState>,
    pub(crate) reliable_recv: HashMap<u8, ReliableReceiveState<Vec<u8>>>,
    pub(crate) assemblies: HashMap<u16, FragmentAssembly>,

    // Acknowledgments awaiting a flush
    pub(crate) pending_acks: Vec<(u8, SequenceNumber)>,
    pub(crate) oldest_pending_ack: Option<Instant>,

    // Teardown
    pub(crate) linger_until: Option<Instant>,
    pub(crate) close_reason: String,

    pub(crate) events: VecDeque<ConnEvent>,
    pub(crate) stats: ConnectionStats,
}

impl Connection {
    fn base(
        remote_address: SocketAddr,
        config: &Config,
        identity: &EndpointIdentity,
        outbound: bool,
        time: Instant,
    ) -> Self {
        Self {
            remote_address,
            config: config.clone(),
            identity: identity.clone(),
            status: ConnectionStatus::Connecting,
            outbound,
            epoch: time,
            connect_attempts: 0,
            last_connect_attempt: None,
            connect_started: time,
            local_hail: Vec::new(),
            remote_hail: Vec::new(),
            remote_nonce: None,
            last_heard: time,
            last_sent: time,
            last_ping: None,
            last_pong: time,
            rtt: RttEstimator::new(),
            control: VecDeque::new(),
            unsent: VecDeque::new(),
            pending: HashMap::new(),
            next_seq: [0; 32],
            next_fragment_group: 0,
            throttle: SendThrottle::new(config.throttle_bytes_per_sec, time),
            sequenced_recv: HashMap::new(),
            reliable_recv: HashMap::new(),
            assemblies: HashMap::new(),
            pending_acks: Vec::new(),
            oldest_pending_ack: None,
            linger_until: None,
            close_reason: String::new(),
            events: VecDeque::new(),
            stats: ConnectionStats::default(),
        }
    }

    /// Opens an outbound connection. The first connect attempt goes out on
    /// the next tick.
    pub fn connect(
        remote_address: SocketAddr,
        config: &Config,
        identity: &EndpointIdentity,
        hail: Vec<u8>,
        time: Instant,
    ) -> Self {
        let mut conn = Self::base(remote_address, config, identity, true, time);
        conn.local_hail = hail;
        conn
    }

    /// Accepts an inbound connect that passed validation (and, if enabled,
    /// application approval). Queues the connect response immediately; the
    /// connection becomes `Connected` when the establish message arrives.
    pub fn accept(
        remote_address: SocketAddr,
        config: &Config,
        identity: &EndpointIdentity,
        remote_nonce: Nonce,
        remote_hail: Vec<u8>,
        local_hail: Vec<u8>,
        time: Instant,
    ) -> Self {
        let mut conn = Self::base(remote_address, config, identity, false, time);
        conn.remote_nonce = Some(remote_nonce);
        conn.remote_hail = remote_hail;
        conn.local_hail = local_hail;
        conn.control.push_back(conn.make_connect_response());
        // The queued response counts as the first handshake attempt; the
        // tick re-sends it until the establish message arrives.
        conn.connect_attempts = 1;
        conn.last_connect_attempt = Some(time);
        conn
    }

    // ===== Accessors =====

    /// The remote endpoint this connection talks to.
    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// True once the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    /// Smoothed round-trip estimate.
    pub fn rtt(&self) -> Duration {
        self.rtt.smoothed()
    }

    /// Interval since traffic was last received from the remote peer.
    pub fn last_heard(&self, now: Instant) -> Duration {
        now.duration_since(self.last_heard)
    }

    /// Interval since a datagram was last handed to the socket.
    pub fn last_sent(&self, now: Instant) -> Duration {
        now.duration_since(self.last_sent)
    }

    /// Traffic statistics for this connection.
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Reliable messages sent but not yet acknowledged.
    pub fn unacked_count(&self) -> usize {
        self.pending.len()
    }

    /// Drains pending connection events for the owning transport.
    pub fn take_events(&mut self) -> Vec<ConnEvent> {
        self.events.drain(..).collect()
    }

    /// Milliseconds since this connection's epoch, wrapping; the ping
    /// timestamp unit.
    pub(crate) fn now_ms(&self, now: Instant) -> u32 {
        now.duration_since(self.epoch).as_millis() as u32
    }

    // ===== Sending API =====

    /// Queues a user message. Oversized messages fail immediately; messages
    /// queued on a closing connection are dropped with a diagnostic.
    pub fn enqueue_message(&mut self, message: OutgoingMessage) -> Result<()> {
        let bytes = message.payload.into_bytes();
        if bytes.len() > self.config.max_message_size {
            return Err(ErrorKind::MessageTooLarge {
                size: bytes.len(),
                limit: self.config.max_message_size,
            });
        }
        if self.status.is_closing() {
            self.events.push_back(ConnEvent::Diagnostic {
                detail: format!(
                    "dropping {} byte message queued on closing connection",
                    bytes.len()
                ),
            });
            return Ok(());
        }

        let payload = if Envelope::encoded_len(bytes.len()) <= self.config.mtu {
            SendPayload::Whole(bytes)
        } else {
            let chunk_size = self.config.mtu.saturating_sub(wire::fragment_overhead()).max(1);
            let group = self.next_fragment_group;
            self.next_fragment_group = self.next_fragment_group.wrapping_add(1);
            SendPayload::Fragmented { group, chunk_size, data: bytes }
        };
        self.unsent.push_back(QueuedSend {
            channel: message.channel,
            payload,
            receipt: message.receipt,
        });
        Ok(())
    }

    /// Requests a graceful disconnect. The connection lingers so
    /// outstanding acknowledgments and resends still flow, unless the
    /// configured linger is zero.
    pub fn disconnect(&mut self, reason: &str, now: Instant) {
        if self.status.is_closing() {
            return;
        }
        self.control.push_back(SystemMessage::Disconnect { reason: reason.to_string() });
        self.close_reason = reason.to_string();
        if self.config.disconnect_linger.is_zero() {
            self.status = ConnectionStatus::Disconnected;
            self.events.push_back(ConnEvent::Disconnected { reason: reason.to_string() });
        } else {
            self.status = ConnectionStatus::Disconnecting;
            self.linger_until = Some(now + self.config.disconnect_linger);
        }
    }

    // ===== Per-tick maintenance =====

    /// Runs handshake retries, ping scheduling, timeout checks, fragment
    /// eviction and linger expiry. Datagram assembly happens separately in
    /// [`pack_datagrams`](Self::pack_datagrams).
    pub fn tick(&mut self, now: Instant) {
        match self.status {
            ConnectionStatus::Connecting => self.tick_handshake(now),
            ConnectionStatus::Connected => {
                // Keepalive pings at the configured frequency.
                let ping_due = match self.last_ping {
                    None => true,
                    Some(last) => now.duration_since(last) >= self.config.ping_interval,
                };
                if ping_due {
                    let timestamp = self.now_ms(now);
                    self.control.push_back(SystemMessage::Ping { timestamp });
                    self.last_ping = Some(now);
                }
                if now.duration_since(self.last_pong) > self.config.connection_timeout {
                    self.force_disconnect("connection timed out", now);
                }
            }
            ConnectionStatus::Disconnecting => {
                if self.linger_until.is_some_and(|until| now >= until) {
                    self.status = ConnectionStatus::Disconnected;
                    let reason = std::mem::take(&mut self.close_reason);
                    self.events.push_back(ConnEvent::Disconnected { reason });
                }
            }
            ConnectionStatus::Disconnected => {}
        }

        if let Some(timeout) = self.config.fragment_timeout {
            fragment::evict_stale(&mut self.assemblies, timeout, now);
        }
    }

    /// Moves straight to `Disconnected` with a timeout-style reason.
    pub(crate) fn force_disconnect(&mut self, reason: &str, _now: Instant) {
        self.status = ConnectionStatus::Disconnected;
        self.events.push_back(ConnEvent::Disconnected { reason: reason.to_string() });
    }

    /// Whether the owning transport should reap this connection.
    pub fn should_reap(&self) -> bool {
        self.status == ConnectionStatus::Disconnected && self.events.is_empty()
    }

    pub(crate) fn diagnostic(&mut self, detail: String) {
        self.stats.malformed += 1;
        tracing::debug!(remote = %self.remote_address, "{detail}");
        self.events.push_back(ConnEvent::Diagnostic { detail });
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("remote", &self.remote_address)
            .field("status", &self.status)
            .field("unacked", &self.pending.len())
            .finish()
    }
}
