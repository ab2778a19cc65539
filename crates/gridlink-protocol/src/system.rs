//! System (handshake and control) messages.
//!
//! A system envelope's payload starts with a sub-type byte followed by the
//! fields of that sub-type. The family is modeled as one tagged enum with an
//! explicit match in both codec directions so wire compatibility stays
//! obvious.

use std::net::SocketAddr;

use gridlink_core::{
    bits::BitBuffer,
    constants::NONCE_LEN,
    error::{ErrorKind, Result},
};

/// Random 8-byte endpoint identity carried by handshake and discovery
/// messages; equal nonces mean both ends are the same endpoint.
pub type Nonce = [u8; NONCE_LEN];

/// The system message family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemMessage {
    /// Handshake opener. Rejected when the identifier differs or the nonce
    /// equals the receiver's own.
    Connect {
        /// Application identifier; must match the receiver's exactly.
        app_identifier: String,
        /// Sender's endpoint nonce.
        nonce: Nonce,
        /// Optional application hail payload.
        hail: Vec<u8>,
    },
    /// Accepting reply to a `Connect`.
    ConnectResponse {
        /// Responder's application identifier, echoed for symmetry.
        app_identifier: String,
        /// Responder's endpoint nonce.
        nonce: Nonce,
        /// Optional application hail payload.
        hail: Vec<u8>,
    },
    /// Final handshake step from the connect initiator.
    ConnectionEstablished,
    /// Refusal of a `Connect`, with the reason sent to the remote peer.
    ConnectionRejected {
        /// Human-readable rejection reason.
        reason: String,
    },
    /// Graceful teardown notice.
    Disconnect {
        /// Human-readable disconnect reason.
        reason: String,
    },
    /// Unconnected peer-discovery probe.
    Discovery {
        /// Application identifier the prober is looking for.
        app_identifier: String,
        /// Prober's endpoint nonce, so a listener never answers itself.
        nonce: Nonce,
        /// Probe id echoed by responses so the prober can deduplicate.
        request_id: u32,
    },
    /// Answer to a discovery probe.
    DiscoveryResponse {
        /// Id of the probe being answered.
        request_id: u32,
        /// Optional application payload describing the responder.
        data: Vec<u8>,
    },
    /// Rendezvous notice naming a partner endpoint to punch toward.
    NatIntroduction {
        /// The partner's public endpoint.
        partner: SocketAddr,
    },
    /// Keepalive and RTT probe.
    Ping {
        /// Sender-local millisecond timestamp, echoed by the pong.
        timestamp: u32,
    },
    /// Echo of a ping.
    Pong {
        /// The timestamp carried by the ping being answered.
        timestamp: u32,
    },
    /// Reserved for an application string-table layer; parsed and ignored.
    StringTableAck {
        /// Opaque payload.
        payload: Vec<u8>,
    },
}

impl SystemMessage {
    /// The sub-type byte identifying this message on the wire.
    pub fn system_type(&self) -> u8 {
        match self {
            SystemMessage::Connect { .. } => 0,
            SystemMessage::ConnectResponse { .. } => 1,
            SystemMessage::ConnectionEstablished => 2,
            SystemMessage::ConnectionRejected { .. } => 3,
            SystemMessage::Disconnect { .. } => 4,
            SystemMessage::Discovery { .. } => 5,
            SystemMessage::DiscoveryResponse { .. } => 6,
            SystemMessage::NatIntroduction { .. } => 7,
            SystemMessage::Ping { .. } => 8,
            SystemMessage::Pong { .. } => 9,
            SystemMessage::StringTableAck { .. } => 10,
        }
    }

    /// Encodes the message as a system envelope payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BitBuffer::new();
        buf.write_u8(self.system_type());
        match self {
            SystemMessage::Connect { app_identifier, nonce, hail }
            | SystemMessage::ConnectResponse { app_identifier, nonce, hail } => {
                buf.write_str(app_identifier);
                buf.write_bytes(nonce);
                buf.write_bytes(hail);
            }
            SystemMessage::ConnectionEstablished => {}
            SystemMessage::ConnectionRejected { reason }
            | SystemMessage::Disconnect { reason } => {
                buf.write_str(reason);
            }
            SystemMessage::Discovery { app_identifier, nonce, request_id } => {
                buf.write_str(app_identifier);
                buf.write_bytes(nonce);
                buf.write_var_u32(*request_id);
            }
            SystemMessage::DiscoveryResponse { request_id, data } => {
                buf.write_var_u32(*request_id);
                buf.write_bytes(data);
            }
            SystemMessage::NatIntroduction { partner } => {
                buf.write_str(&partner.to_string());
            }
            SystemMessage::Ping { timestamp } | SystemMessage::Pong { timestamp } => {
                buf.write_u32(*timestamp);
            }
            SystemMessage::StringTableAck { payload } => {
                buf.write_bytes(payload);
            }
        }
        buf.into_bytes()
    }

    /// Decodes a system envelope payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = BitBuffer::from_bytes(payload.to_vec());
        let system_type = buf.read_u8().map_err(|_| ErrorKind::Malformed("empty system payload"))?;
        match system_type {
            0 | 1 => {
                let app_identifier = buf.read_str()?;
                let nonce = read_nonce(&mut buf)?;
                let hail = read_rest(&mut buf)?;
                if system_type == 0 {
                    Ok(SystemMessage::Connect { app_identifier, nonce, hail })
                } else {
                    Ok(SystemMessage::ConnectResponse { app_identifier, nonce, hail })
                }
            }
            2 => Ok(SystemMessage::ConnectionEstablished),
            3 => Ok(SystemMessage::ConnectionRejected { reason: buf.read_str()? }),
            4 => Ok(SystemMessage::Disconnect { reason: buf.read_str()? }),
            5 => Ok(SystemMessage::Discovery {
                app_identifier: buf.read_str()?,
                nonce: read_nonce(&mut buf)?,
                request_id: buf.read_var_u32()?,
            }),
            6 => Ok(SystemMessage::DiscoveryResponse {
                request_id: buf.read_var_u32()?,
                data: read_rest(&mut buf)?,
            }),
            7 => {
                let text = buf.read_str()?;
                let partner = text
                    .parse::<SocketAddr>()
                    .map_err(|_| ErrorKind::Malformed("bad endpoint in nat introduction"))?;
                Ok(SystemMessage::NatIntroduction { partner })
            }
            8 => Ok(SystemMessage::Ping { timestamp: buf.read_u32()? }),
            9 => Ok(SystemMessage::Pong { timestamp: buf.read_u32()? }),
            10 => Ok(SystemMessage::StringTableAck { payload: read_rest(&mut buf)? }),
            other => Err(ErrorKind::InvalidSystemType(other)),
        }
    }
}

fn read_nonce(buf: &mut BitBuffer) -> Result<Nonce> {
    let bytes = buf.read_bytes(NONCE_LEN)?;
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&bytes);
    Ok(nonce)
}

fn read_rest(buf: &mut BitBuffer) -> Result<Vec<u8>> {
    let remaining = buf.remaining_bits() / 8;
    buf.read_bytes(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONCE: Nonce = [1, 2, 3, 4, 5, 6, 7, 8];

    #[test]
    fn test_connect_round_trip_with_hail() {
        let message = SystemMessage::Connect {
            app_identifier: "Game".into(),
            nonce: NONCE,
            hail: b"player-one".to_vec(),
        };
        let decoded = SystemMessage::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_connect_round_trip_without_hail() {
        let message = SystemMessage::ConnectResponse {
            app_identifier: "Game".into(),
            nonce: NONCE,
            hail: Vec::new(),
        };
        assert_eq!(SystemMessage::decode(&message.encode()).unwrap(), message);
    }

    #[test]
    fn test_sub_type_is_first_payload_byte() {
        let message = SystemMessage::Disconnect { reason: "bye".into() };
        let payload = message.encode();
        assert_eq!(payload[0], 4);
    }

    #[test]
    fn test_all_variants_round_trip() {
        let partner: SocketAddr = "203.0.113.9:4400".parse().unwrap();
        let messages = [
            SystemMessage::Connect { app_identifier: "A".into(), nonce: NONCE, hail: vec![9] },
            SystemMessage::ConnectResponse {
                app_identifier: "A".into(),
                nonce: NONCE,
                hail: vec![],
            },
            SystemMessage::ConnectionEstablished,
            SystemMessage::ConnectionRejected { reason: "server full".into() },
            SystemMessage::Disconnect { reason: "shutting down".into() },
            SystemMessage::Discovery { app_identifier: "A".into(), nonce: NONCE, request_id: 7 },
            SystemMessage::DiscoveryResponse { request_id: 7, data: b"lobby".to_vec() },
            SystemMessage::NatIntroduction { partner },
            SystemMessage::Ping { timestamp: 123456 },
            SystemMessage::Pong { timestamp: 123456 },
            SystemMessage::StringTableAck { payload: vec![1, 2, 3] },
        ];
        for message in messages {
            let decoded = SystemMessage::decode(&message.encode()).unwrap();
            assert_eq!(decoded, message);
            assert_eq!(decoded.system_type(), message.system_type());
        }
    }

    #[test]
    fn test_unknown_sub_type_rejected() {
        assert!(matches!(SystemMessage::decode(&[42]), Err(ErrorKind::InvalidSystemType(42))));
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(SystemMessage::decode(&[]).is_err());
    }

    #[test]
    fn test_truncated_connect_rejected() {
        let message =
            SystemMessage::Connect { app_identifier: "Game".into(), nonce: NONCE, hail: vec![] };
        let payload = message.encode();
        assert!(SystemMessage::decode(&payload[..payload.len() - 3]).is_err());
    }
}
