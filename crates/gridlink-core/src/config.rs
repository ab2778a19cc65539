use std::time::Duration;

use crate::constants::DEFAULT_MTU;

/// Artificial network conditions applied to the send path, for testing.
///
/// Whether simulation runs is purely a configuration choice: the code path
/// is always compiled, and `Config::simulation` is `None` by default.
#[derive(Clone, Debug)]
pub struct SimulatedConditions {
    /// Chance (0.0 to 1.0) that an outgoing datagram is silently dropped.
    pub loss_chance: f32,
    /// Chance (0.0 to 1.0) that an outgoing datagram is sent twice.
    pub duplicate_chance: f32,
    /// Minimum added one-way latency.
    pub min_latency: Duration,
    /// Extra uniformly random latency added on top of the minimum.
    pub latency_variance: Duration,
}

impl Default for SimulatedConditions {
    fn default() -> Self {
        Self {
            loss_chance: 0.0,
            duplicate_chance: 0.0,
            min_latency: Duration::ZERO,
            latency_variance: Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug)]
/// Configuration options to tune transport behavior.
///
/// The application identifier must match exactly between peers; everything
/// else is a local tunable.
pub struct Config {
    /// Identifier of the application-level protocol. Handshakes and
    /// discovery probes carrying a different identifier are rejected.
    pub app_identifier: String,
    /// Maximum datagram payload size in bytes. Messages whose encoded
    /// envelope exceeds this are fragmented.
    pub mtu: usize,
    /// Hard cap on a single message payload. Larger sends fail immediately
    /// with a `MessageTooLarge` error.
    pub max_message_size: usize,
    /// Maximum number of accepted connections (servers). Further connects
    /// are rejected with a reason.
    pub max_connections: usize,
    /// Whether unsolicited connects are accepted at all. Client transports
    /// leave this off.
    pub accept_incoming: bool,
    /// Defer accepting inbound connects to an application approval step.
    pub require_approval: bool,
    /// Answer discovery probes that carry our application identifier.
    pub respond_to_discovery: bool,
    /// Interval between keepalive pings on an established connection.
    pub ping_interval: Duration,
    /// Force-disconnect when no pong has arrived for this long.
    pub connection_timeout: Duration,
    /// Number of connect attempts before giving up with a timeout reason.
    pub handshake_attempts: u32,
    /// Delay between connect attempts.
    pub handshake_interval: Duration,
    /// Multiplier applied to the smoothed RTT in the resend-time formula.
    pub resend_multiplier: f32,
    /// Fraction of the current RTT an acknowledgment may be withheld while
    /// waiting to piggyback on other outgoing traffic.
    pub ack_withhold_fraction: f32,
    /// How long a disconnecting connection lingers so outstanding
    /// acknowledgments and resends can still flow. Zero disconnects
    /// immediately.
    pub disconnect_linger: Duration,
    /// Outbound throttle in bytes per second (0 = unlimited).
    pub throttle_bytes_per_sec: u32,
    /// Evict incomplete fragment groups this long after their first chunk.
    /// `None` preserves abandoned groups until connection teardown.
    pub fragment_timeout: Option<Duration>,
    /// Socket receive buffer size in bytes (None = system default).
    /// Corresponds to SO_RCVBUF.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = system default).
    /// Corresponds to SO_SNDBUF.
    pub socket_send_buffer_size: Option<usize>,
    /// Enable SO_BROADCAST so local discovery probes can be broadcast.
    pub socket_broadcast: bool,
    /// Sleep between pump cycles when polling on a background thread.
    pub pump_interval: Duration,
    /// Grace period a cooperative shutdown waits for goodbye messages.
    pub shutdown_grace: Duration,
    /// Simulated loss/duplication/latency on the send path (testing only).
    pub simulation: Option<SimulatedConditions>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_identifier: String::new(),
            mtu: DEFAULT_MTU,
            max_message_size: 8 * 1024 * 1024,
            max_connections: 32,
            accept_incoming: false,
            require_approval: false,
            respond_to_discovery: false,
            ping_interval: Duration::from_secs(4),
            connection_timeout: Duration::from_secs(25),
            handshake_attempts: 5,
            handshake_interval: Duration::from_millis(2500),
            resend_multiplier: 2.0,
            ack_withhold_fraction: 0.25,
            disconnect_linger: Duration::from_millis(500),
            throttle_bytes_per_sec: 0, // Unlimited
            fragment_timeout: Some(Duration::from_secs(10)),
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
            socket_broadcast: false,
            pump_interval: Duration::from_millis(1),
            shutdown_grace: Duration::from_millis(250),
            simulation: None,
        }
    }
}

impl Config {
    /// Convenience constructor fixing the application identifier, the one
    /// field with no useful default.
    pub fn new(app_identifier: impl Into<String>) -> Self {
        Self { app_identifier: app_identifier.into(), ..Self::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_simulation() {
        let config = Config::default();
        assert!(config.simulation.is_none());
    }

    #[test]
    fn test_default_fragment_timeout_enabled() {
        let config = Config::default();
        assert!(config.fragment_timeout.is_some());
    }

    #[test]
    fn test_new_sets_identifier() {
        let config = Config::new("Game");
        assert_eq!(config.app_identifier, "Game");
        assert_eq!(config.mtu, DEFAULT_MTU);
    }
}
