//! Transport-level statistics.

/// Counters aggregated across every session of one transport instance.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Datagrams written to the socket.
    pub packets_sent: u64,
    /// Datagrams read from the socket.
    pub packets_received: u64,
    /// Bytes written to the socket.
    pub bytes_sent: u64,
    /// Bytes read from the socket.
    pub bytes_received: u64,
    /// Inbound connects refused (wrong identifier, capacity, self-connect).
    pub connects_rejected: u64,
    /// Discovery responses sent to probers.
    pub discovery_responses_sent: u64,
}

impl TransportStats {
    /// Resets every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
