//! Binds the connection state machine into the pump's `Session` seam.

use std::{net::SocketAddr, time::Instant};

use gridlink_conn::{ConnEvent, Connection, EndpointIdentity};
use gridlink_core::config::Config;
use gridlink_protocol::system::Nonce;

use crate::{
    events::{Action, NetEvent, SessionCommand},
    session::Session,
};

impl Session for Connection {
    type Command = SessionCommand;
    type Event = NetEvent;

    fn open_outbound(
        config: &Config,
        identity: &EndpointIdentity,
        addr: SocketAddr,
        hail: Vec<u8>,
        time: Instant,
    ) -> Self {
        Connection::connect(addr, config, identity, hail, time)
    }

    fn open_inbound(
        config: &Config,
        identity: &EndpointIdentity,
        addr: SocketAddr,
        remote_nonce: Nonce,
        remote_hail: Vec<u8>,
        local_hail: Vec<u8>,
        time: Instant,
    ) -> Self {
        Connection::accept(addr, config, identity, remote_nonce, remote_hail, local_hail, time)
    }

    fn is_connected(&self) -> bool {
        Connection::is_connected(self)
    }

    fn process_datagram(&mut self, payload: &[u8], time: Instant) -> Vec<Action<NetEvent>> {
        let mut actions = Vec::new();
        for message in self.handle_datagram(payload, time) {
            actions.push(Action::Emit(NetEvent::Message(message)));
        }
        self.collect(&mut actions, time);
        actions
    }

    fn process_command(&mut self, command: SessionCommand, time: Instant) -> Vec<Action<NetEvent>> {
        let mut actions = Vec::new();
        match command {
            SessionCommand::Send(message) => {
                if let Err(err) = self.enqueue_message(message) {
                    actions.push(Action::Emit(NetEvent::Diagnostic {
                        addr: self.remote_address(),
                        detail: err.to_string(),
                    }));
                }
            }
            SessionCommand::Disconnect { reason } => self.disconnect(&reason, time),
        }
        self.collect(&mut actions, time);
        actions
    }

    fn heartbeat(&mut self, time: Instant) -> Vec<Action<NetEvent>> {
        self.tick(time);
        let mut actions = Vec::new();
        self.collect(&mut actions, time);
        actions
    }

    fn poll_reap(&mut self, _time: Instant) -> (bool, Vec<Action<NetEvent>>) {
        (self.should_reap(), Vec::new())
    }
}

/// Shared tail of every session entry point: surface connection events,
/// then flush whatever the sender wants on the wire.
trait Collect {
    fn collect(&mut self, actions: &mut Vec<Action<NetEvent>>, time: Instant);
}

impl Collect for Connection {
    fn collect(&mut self, actions: &mut Vec<Action<NetEvent>>, time: Instant) {
        let addr = self.remote_address();
        for event in self.take_events() {
            actions.push(Action::Emit(match event {
                ConnEvent::Connected { hail } => NetEvent::Connected { addr, hail },
                ConnEvent::Rejected { reason } => NetEvent::Rejected { addr, reason },
                ConnEvent::Disconnected { reason } => NetEvent::Disconnected { addr, reason },
                ConnEvent::Receipt { token } => NetEvent::Receipt { addr, token },
                ConnEvent::Diagnostic { detail } => NetEvent::Diagnostic { addr, detail },
            }));
        }
        for datagram in self.pack_datagrams(time) {
            actions.push(Action::Send(datagram));
        }
    }
}

#[cfg(test)]
mod tests {
    use gridlink_core::bits::BitBuffer;
    use gridlink_protocol::{channel::Channel, envelope::OutgoingMessage};

    use super::*;

    #[test]
    fn test_outbound_session_emits_connect_datagram_on_heartbeat() {
        let config = Config::new("Game");
        let identity = EndpointIdentity::generate("Game");
        let now = Instant::now();
        let mut session = <Connection as Session>::open_outbound(
            &config,
            &identity,
            "127.0.0.1:9400".parse().unwrap(),
            vec![],
            now,
        );

        let actions = session.heartbeat(now);
        assert!(actions.iter().any(|a| matches!(a, Action::Send(_))));
    }

    #[test]
    fn test_send_command_on_closing_connection_is_diagnostic() {
        let config = Config::new("Game");
        let identity = EndpointIdentity::generate("Game");
        let now = Instant::now();
        let mut session = <Connection as Session>::open_outbound(
            &config,
            &identity,
            "127.0.0.1:9400".parse().unwrap(),
            vec![],
            now,
        );
        session.disconnect("done", now);

        let mut payload = BitBuffer::new();
        payload.write_u8(1);
        let actions = session.process_command(
            SessionCommand::Send(OutgoingMessage::new(Channel::ReliableOrdered(1), payload)),
            now,
        );
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Emit(NetEvent::Diagnostic { .. }))));
    }
}
