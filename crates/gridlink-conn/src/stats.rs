//! Per-connection traffic statistics.

/// Counters for one connection's traffic and protocol behavior.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Datagrams written to the socket for this connection.
    pub packets_sent: u64,
    /// Datagrams received from this connection's remote endpoint.
    pub packets_received: u64,
    /// Payload bytes sent (excluding envelope overhead).
    pub bytes_sent: u64,
    /// Payload bytes received (excluding envelope overhead).
    pub bytes_received: u64,
    /// Reliable messages sent more than once.
    pub messages_resent: u64,
    /// Sequenced arrivals dropped as late.
    pub dropped_late: u64,
    /// Reliable arrivals dropped as duplicates.
    pub dropped_duplicate: u64,
    /// Ordered arrivals currently withheld waiting for a gap to close.
    pub withheld: u64,
    /// Datagrams or envelopes dropped as malformed.
    pub malformed: u64,
}

impl ConnectionStats {
    /// Resets every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero_and_reset() {
        let mut stats = ConnectionStats::default();
        assert_eq!(stats.packets_sent, 0);
        stats.packets_sent = 12;
        stats.dropped_late = 3;
        stats.reset();
        assert_eq!(stats.packets_sent, 0);
        assert_eq!(stats.dropped_late, 0);
    }
}
