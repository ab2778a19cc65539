//! Handshake and system-message handling.
//!
//! The exchange is `Connect` → `ConnectResponse` → `ConnectionEstablished`.
//! The initiator retries `Connect` at the configured interval until the
//! attempt budget runs out, then disconnects with a timeout reason. Both
//! handshake messages may carry hail payloads.

use std::time::{Duration, Instant};

use gridlink_protocol::system::SystemMessage;

use crate::status::ConnectionStatus;

use super::{ConnEvent, Connection};

impl Connection {
    pub(crate) fn make_connect(&self) -> SystemMessage {
        SystemMessage::Connect {
            app_identifier: self.identity.app_identifier.clone(),
            nonce: self.identity.nonce,
            hail: self.local_hail.clone(),
        }
    }

    pub(crate) fn make_connect_response(&self) -> SystemMessage {
        SystemMessage::ConnectResponse {
            app_identifier: self.identity.app_identifier.clone(),
            nonce: self.identity.nonce,
            hail: self.local_hail.clone(),
        }
    }

    /// Drives handshake retries while `Connecting`: the initiator repeats
    /// its connect, the acceptor repeats its response until the establish
    /// message arrives. Either side gives up after the attempt budget.
    pub(crate) fn tick_handshake(&mut self, now: Instant) {
        let due = match self.last_connect_attempt {
            None => true,
            Some(last) => now.duration_since(last) >= self.config.handshake_interval,
        };
        if !due {
            return;
        }
        if self.connect_attempts >= self.config.handshake_attempts {
            let reason = if self.outbound {
                "timed out waiting for connect response"
            } else {
                "timed out waiting for connection establishment"
            };
            self.force_disconnect(reason, now);
            return;
        }
        let message =
            if self.outbound { self.make_connect() } else { self.make_connect_response() };
        self.control.push_back(message);
        self.connect_attempts += 1;
        self.last_connect_attempt = Some(now);
    }

    /// Processes a system message arriving on this connection.
    pub(crate) fn handle_system(&mut self, message: SystemMessage, now: Instant) {
        match message {
            SystemMessage::Connect { app_identifier, nonce, hail } => {
                // A retransmitted opener: the response must be idempotent.
                if self.outbound {
                    self.diagnostic("connect received on an outbound connection".into());
                    return;
                }
                if app_identifier != self.identity.app_identifier {
                    self.diagnostic(format!(
                        "connect with wrong application identifier {app_identifier:?}"
                    ));
                    return;
                }
                if self.remote_nonce == Some(nonce) {
                    self.remote_hail = hail;
                    self.control.push_back(self.make_connect_response());
                }
            }
            SystemMessage::ConnectResponse { app_identifier, nonce, hail } => {
                if !self.outbound {
                    self.diagnostic("connect response received on an inbound connection".into());
                    return;
                }
                if app_identifier != self.identity.app_identifier {
                    self.diagnostic(format!(
                        "connect response with wrong application identifier {app_identifier:?}"
                    ));
                    return;
                }
                match self.status {
                    ConnectionStatus::Connecting => {
                        self.remote_nonce = Some(nonce);
                        self.remote_hail = hail.clone();
                        // Seed RTT optimistically from the handshake round trip.
                        self.rtt.seed(now.duration_since(self.connect_started));
                        self.last_pong = now;
                        self.control.push_back(SystemMessage::ConnectionEstablished);
                        self.status = ConnectionStatus::Connected;
                        self.events.push_back(ConnEvent::Connected { hail });
                    }
                    ConnectionStatus::Connected => {
                        // Our establish message got lost; repeat it.
                        self.control.push_back(SystemMessage::ConnectionEstablished);
                    }
                    _ => {}
                }
            }
            SystemMessage::ConnectionEstablished => {
                if !self.outbound && self.status == ConnectionStatus::Connecting {
                    self.rtt.seed(now.duration_since(self.connect_started));
                    self.last_pong = now;
                    self.status = ConnectionStatus::Connected;
                    let hail = self.remote_hail.clone();
                    self.events.push_back(ConnEvent::Connected { hail });
                }
            }
            SystemMessage::ConnectionRejected { reason } => {
                if self.outbound && self.status == ConnectionStatus::Connecting {
                    self.status = ConnectionStatus::Disconnected;
                    self.events.push_back(ConnEvent::Rejected { reason });
                }
            }
            SystemMessage::Disconnect { reason } => {
                if self.status.is_alive() {
                    self.status = ConnectionStatus::Disconnected;
                    self.events.push_back(ConnEvent::Disconnected { reason });
                }
            }
            SystemMessage::Ping { timestamp } => {
                self.control.push_back(SystemMessage::Pong { timestamp });
            }
            SystemMessage::Pong { timestamp } => {
                self.last_pong = now;
                let rtt_ms = self.now_ms(now).wrapping_sub(timestamp);
                self.rtt.sample(Duration::from_millis(rtt_ms as u64));
            }
            SystemMessage::StringTableAck { .. } => {
                // Reserved for an application string-table layer.
            }
            SystemMessage::Discovery { .. }
            | SystemMessage::DiscoveryResponse { .. }
            | SystemMessage::NatIntroduction { .. } => {
                // These belong to the unconnected path; on an established
                // connection they are out of place.
                self.diagnostic("unconnected system message on an established connection".into());
            }
        }
    }
}
