/// Connection lifecycle state machine.
///
/// `Connecting` covers both sides of the handshake: the initiator waiting
/// for a connect response and the acceptor waiting for the final
/// established message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Handshake in progress, no data flows yet.
    #[default]
    Connecting,

    /// Handshake complete, user messages flow in both directions.
    Connected,

    /// Disconnect requested; lingering so outstanding acknowledgments and
    /// resends still flow.
    Disconnecting,

    /// Terminal. The owning transport reaps the connection.
    Disconnected,
}

impl ConnectionStatus {
    /// True once the handshake has completed.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// True while the connection still processes traffic.
    pub fn is_alive(&self) -> bool {
        !matches!(self, ConnectionStatus::Disconnected)
    }

    /// True during the handshake exchange.
    pub fn is_handshaking(&self) -> bool {
        matches!(self, ConnectionStatus::Connecting)
    }

    /// True once a disconnect is underway or done.
    pub fn is_closing(&self) -> bool {
        matches!(self, ConnectionStatus::Disconnecting | ConnectionStatus::Disconnected)
    }
}
