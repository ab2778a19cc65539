//! Outbound datagram assembly.
//!
//! Queued messages are batched into datagrams up to the MTU, acknowledgments
//! piggyback on whatever is going out (or flush standalone once they have
//! been withheld too long), and unacknowledged reliable messages are re-sent
//! on an attempt-keyed backoff.

use std::time::{Duration, Instant};

use gridlink_core::constants::RESEND_BASE_MILLIS;
use gridlink_protocol::{
    channel::Channel,
    envelope::{MessageKind, ReceiptToken},
    sequencing::SequenceNumber,
    wire::{self, Envelope, FragmentHeader},
};

use super::Connection;

/// Acknowledgment groups packed into a single ack envelope.
const MAX_ACK_GROUPS: usize = 128;

/// Encoded form of a queued message: either one envelope payload or the
/// coordinates to cut fragment chunks from.
#[derive(Debug, Clone)]
pub(crate) enum SendPayload {
    /// Fits in one envelope.
    Whole(Vec<u8>),
    /// Oversized; sent as a fragment group sharing one sequence number.
    Fragmented {
        group: u16,
        chunk_size: usize,
        data: Vec<u8>,
    },
}

impl SendPayload {
    /// Payload bytes this message puts on the wire, for throttle accounting.
    fn wire_bytes(&self) -> usize {
        match self {
            SendPayload::Whole(bytes) => bytes.len(),
            SendPayload::Fragmented { data, .. } => data.len(),
        }
    }
}

/// A user message waiting for its first send attempt. The sequence number
/// is assigned when the message is first packed into a datagram.
#[derive(Debug)]
pub(crate) struct QueuedSend {
    pub channel: Channel,
    pub payload: SendPayload,
    pub receipt: Option<ReceiptToken>,
}

/// A reliable message that has been sent and awaits acknowledgment.
#[derive(Debug)]
pub(crate) struct PendingReliable {
    pub channel: Channel,
    pub sequence: SequenceNumber,
    pub payload: SendPayload,
    /// Times this message has been handed to the socket.
    pub send_count: u32,
    pub next_resend: Instant,
    pub receipt: Option<ReceiptToken>,
}

/// Greedily fills datagrams with envelopes up to the MTU.
struct DatagramPacker {
    mtu: usize,
    datagrams: Vec<Vec<u8>>,
    current: Vec<u8>,
}

impl DatagramPacker {
    fn new(mtu: usize) -> Self {
        Self { mtu, datagrams: Vec::new(), current: Vec::new() }
    }

    fn push(
        &mut self,
        kind: MessageKind,
        channel_id: u8,
        sequence: SequenceNumber,
        payload: &[u8],
    ) {
        let encoded = Envelope::encoded_len(payload.len());
        if !self.current.is_empty() && self.current.len() + encoded > self.mtu {
            self.flush();
        }
        wire::write_envelope(&mut self.current, kind, channel_id, sequence, payload);
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.datagrams.push(std::mem::take(&mut self.current));
        }
    }

    fn is_empty(&self) -> bool {
        self.datagrams.is_empty() && self.current.is_empty()
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        self.flush();
        self.datagrams
    }
}

/// Resend time for a message that has been sent `send_count` times:
/// base + srtt × multiplier × (1 + send_count²).
fn resend_delay(srtt: Duration, multiplier: f32, send_count: u32) -> Duration {
    let attempts = send_count as f64;
    let backoff = multiplier as f64 * (1.0 + attempts * attempts);
    Duration::from_millis(RESEND_BASE_MILLIS) + srtt.mul_f64(backoff)
}

impl Connection {
    /// Assembles every datagram this connection wants to send right now.
    pub fn pack_datagrams(&mut self, now: Instant) -> Vec<Vec<u8>> {
        self.throttle.replenish(now);
        let srtt = self.rtt.smoothed();
        let mut packer = DatagramPacker::new(self.config.mtu);

        // System/control messages flow regardless of status and throttle.
        while let Some(message) = self.control.pop_front() {
            packer.push(MessageKind::System, 0, 0, &message.encode());
        }

        // Acknowledgments piggyback on any outgoing traffic; once withheld
        // longer than the configured RTT fraction they flush standalone.
        if !self.pending_acks.is_empty() {
            let withhold = srtt.mul_f32(self.config.ack_withhold_fraction);
            let overdue = self
                .oldest_pending_ack
                .is_some_and(|first| now.duration_since(first) >= withhold);
            if overdue || !packer.is_empty() || self.has_due_sends(now) {
                for groups in self.pending_acks.chunks(MAX_ACK_GROUPS) {
                    packer.push(MessageKind::Ack, 0, 0, &wire::encode_acks(groups));
                }
                self.pending_acks.clear();
                self.oldest_pending_ack = None;
            }
        }

        // Resends first: they have been waiting the longest.
        let mut due: Vec<(u8, SequenceNumber)> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.next_resend <= now)
            .map(|(&key, _)| key)
            .collect();
        due.sort_unstable();
        for key in due {
            if !self.throttle.allows_send() {
                break;
            }
            let pending = self.pending.get_mut(&key).expect("due key was just collected");
            emit_payload(&mut packer, pending.channel, pending.sequence, &pending.payload);
            pending.send_count += 1;
            pending.next_resend =
                now + resend_delay(srtt, self.config.resend_multiplier, pending.send_count);
            let wire_bytes = pending.payload.wire_bytes();
            self.throttle.record(wire_bytes);
            self.stats.messages_resent += 1;
        }

        // Fresh messages only flow once the handshake has completed;
        // anything queued earlier waits here.
        if self.status.is_connected() {
            while !self.unsent.is_empty() && self.throttle.allows_send() {
                let item = self.unsent.pop_front().expect("checked non-empty");
                let sequence = self.assign_sequence(item.channel);
                emit_payload(&mut packer, item.channel, sequence, &item.payload);
                self.throttle.record(item.payload.wire_bytes());
                if item.channel.is_reliable() {
                    self.pending.insert(
                        (item.channel.to_u8(), sequence),
                        PendingReliable {
                            channel: item.channel,
                            sequence,
                            payload: item.payload,
                            send_count: 1,
                            next_resend: now
                                + resend_delay(srtt, self.config.resend_multiplier, 1),
                            receipt: item.receipt,
                        },
                    );
                }
            }
        }

        let datagrams = packer.finish();
        if !datagrams.is_empty() {
            self.last_sent = now;
        }
        for datagram in &datagrams {
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += datagram.len() as u64;
        }
        datagrams
    }

    fn has_due_sends(&self, now: Instant) -> bool {
        (self.status.is_connected() && !self.unsent.is_empty())
            || self.pending.values().any(|pending| pending.next_resend <= now)
    }

    /// Sequence numbers are drawn per channel, lazily at the first send
    /// attempt. The unreliable channel carries no meaningful sequence.
    fn assign_sequence(&mut self, channel: Channel) -> SequenceNumber {
        if !channel.is_sequenced() {
            return 0;
        }
        let slot = channel.to_u8() as usize;
        let sequence = self.next_seq[slot];
        self.next_seq[slot] = sequence.wrapping_add(1);
        sequence
    }
}

fn emit_payload(
    packer: &mut DatagramPacker,
    channel: Channel,
    sequence: SequenceNumber,
    payload: &SendPayload,
) {
    match payload {
        SendPayload::Whole(bytes) => {
            packer.push(MessageKind::User, channel.to_u8(), sequence, bytes);
        }
        SendPayload::Fragmented { group, chunk_size, data } => {
            let total = data.chunks(*chunk_size).count() as u32;
            for (index, chunk) in data.chunks(*chunk_size).enumerate() {
                let header = FragmentHeader { group: *group, index: index as u32, total };
                packer.push(
                    MessageKind::UserFragment,
                    channel.to_u8(),
                    sequence,
                    &wire::encode_fragment(header, chunk),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use gridlink_core::{bits::BitBuffer, config::Config};
    use gridlink_protocol::{envelope::OutgoingMessage, wire::decode_datagram};

    use crate::{ConnectionStatus, EndpointIdentity};

    use super::*;

    fn connected(config: Config) -> Connection {
        let identity = EndpointIdentity::generate(config.app_identifier.clone());
        let mut conn = Connection::connect(
            "127.0.0.1:9200".parse().unwrap(),
            &config,
            &identity,
            vec![],
            Instant::now(),
        );
        conn.status = ConnectionStatus::Connected;
        conn
    }

    fn payload(bytes: &[u8]) -> BitBuffer {
        let mut buf = BitBuffer::new();
        buf.write_bytes(bytes);
        buf
    }

    #[test]
    fn test_small_messages_batch_into_one_datagram() {
        let mut conn = connected(Config::new("Game"));
        let now = Instant::now();
        for _ in 0..4 {
            conn.enqueue_message(OutgoingMessage::new(Channel::Unreliable, payload(b"tiny")))
                .unwrap();
        }
        let datagrams = conn.pack_datagrams(now);
        assert_eq!(datagrams.len(), 1);
        assert_eq!(decode_datagram(&datagrams[0]).unwrap().len(), 4);
    }

    #[test]
    fn test_datagrams_respect_mtu() {
        let mut config = Config::new("Game");
        config.mtu = 600;
        let mut conn = connected(config);
        let now = Instant::now();
        for _ in 0..4 {
            conn.enqueue_message(OutgoingMessage::new(
                Channel::Unreliable,
                payload(&[7u8; 250]),
            ))
            .unwrap();
        }
        let datagrams = conn.pack_datagrams(now);
        assert!(datagrams.len() >= 2);
        for datagram in &datagrams {
            assert!(datagram.len() <= 600);
        }
    }

    #[test]
    fn test_sequence_numbers_assigned_per_channel() {
        let mut conn = connected(Config::new("Game"));
        let now = Instant::now();
        conn.enqueue_message(OutgoingMessage::new(Channel::ReliableOrdered(1), payload(b"a")))
            .unwrap();
        conn.enqueue_message(OutgoingMessage::new(Channel::ReliableOrdered(2), payload(b"b")))
            .unwrap();
        conn.enqueue_message(OutgoingMessage::new(Channel::ReliableOrdered(1), payload(b"c")))
            .unwrap();

        let datagrams = conn.pack_datagrams(now);
        let envelopes = decode_datagram(&datagrams[0]).unwrap();
        let seqs: Vec<(u8, u16)> =
            envelopes.iter().map(|e| (e.channel_id, e.sequence)).collect();
        // Each channel draws from its own space.
        assert_eq!(seqs, [(17, 0), (18, 0), (17, 1)]);
    }

    #[test]
    fn test_reliable_messages_enter_pending_and_resend() {
        let mut conn = connected(Config::new("Game"));
        let start = Instant::now();
        conn.enqueue_message(OutgoingMessage::new(
            Channel::ReliableUnordered,
            payload(b"important"),
        ))
        .unwrap();

        let first = conn.pack_datagrams(start);
        assert_eq!(first.len(), 1);
        assert_eq!(conn.unacked_count(), 1);

        // Nothing due yet.
        assert!(conn.pack_datagrams(start + Duration::from_millis(1)).is_empty());

        // Well past the first resend time the message goes out again.
        let later = start + Duration::from_secs(5);
        let resent = conn.pack_datagrams(later);
        assert_eq!(resent.len(), 1);
        assert_eq!(conn.stats().messages_resent, 1);

        // Backoff grows with the attempt count.
        let pending = conn.pending.values().next().unwrap();
        assert_eq!(pending.send_count, 2);
        assert!(pending.next_resend > later + Duration::from_secs(1));
    }

    #[test]
    fn test_unreliable_messages_are_not_tracked() {
        let mut conn = connected(Config::new("Game"));
        conn.enqueue_message(OutgoingMessage::new(Channel::Unreliable, payload(b"fire")))
            .unwrap();
        conn.pack_datagrams(Instant::now());
        assert_eq!(conn.unacked_count(), 0);
    }

    #[test]
    fn test_oversized_message_fragments_share_one_sequence() {
        let mut config = Config::new("Game");
        config.mtu = 500;
        let mut conn = connected(config);
        let data = vec![0xEEu8; 1800];
        conn.enqueue_message(OutgoingMessage::new(
            Channel::ReliableOrdered(1),
            payload(&data),
        ))
        .unwrap();

        let datagrams = conn.pack_datagrams(Instant::now());
        let envelopes: Vec<_> = datagrams
            .iter()
            .flat_map(|d| decode_datagram(d).unwrap())
            .collect();
        assert!(envelopes.len() >= 4);
        for envelope in &envelopes {
            assert_eq!(envelope.kind, MessageKind::UserFragment);
            assert_eq!(envelope.sequence, 0);
        }
        // One pending entry for the whole group.
        assert_eq!(conn.unacked_count(), 1);
    }

    #[test]
    fn test_acks_flush_standalone_after_withhold_bound() {
        let mut conn = connected(Config::new("Game"));
        let now = Instant::now();
        conn.pending_acks.push((17, 3));
        conn.oldest_pending_ack = Some(now);

        // Fresh ack with no other traffic: withheld.
        assert!(conn.pack_datagrams(now).is_empty());

        // Once the RTT-fraction bound elapses it flushes alone.
        let later = now + conn.rtt().mul_f32(conn.config.ack_withhold_fraction)
            + Duration::from_millis(1);
        let datagrams = conn.pack_datagrams(later);
        assert_eq!(datagrams.len(), 1);
        let envelopes = decode_datagram(&datagrams[0]).unwrap();
        assert_eq!(envelopes[0].kind, MessageKind::Ack);
        assert!(conn.pending_acks.is_empty());
    }

    #[test]
    fn test_acks_piggyback_on_outgoing_traffic() {
        let mut conn = connected(Config::new("Game"));
        let now = Instant::now();
        conn.pending_acks.push((17, 3));
        conn.oldest_pending_ack = Some(now);
        conn.enqueue_message(OutgoingMessage::new(Channel::Unreliable, payload(b"data")))
            .unwrap();

        let datagrams = conn.pack_datagrams(now);
        assert_eq!(datagrams.len(), 1);
        let kinds: Vec<MessageKind> =
            decode_datagram(&datagrams[0]).unwrap().iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&MessageKind::Ack));
        assert!(kinds.contains(&MessageKind::User));
    }

    #[test]
    fn test_messages_queued_while_connecting_wait() {
        let identity = EndpointIdentity::generate("Game");
        let mut conn = Connection::connect(
            "127.0.0.1:9200".parse().unwrap(),
            &Config::new("Game"),
            &identity,
            vec![],
            Instant::now(),
        );
        conn.enqueue_message(OutgoingMessage::new(Channel::ReliableOrdered(1), payload(b"x")))
            .unwrap();
        // Only nothing or handshake traffic may go out; the user message stays.
        conn.pack_datagrams(Instant::now());
        assert_eq!(conn.unsent.len(), 1);
    }

    #[test]
    fn test_throttle_pauses_user_traffic() {
        let mut config = Config::new("Game");
        config.throttle_bytes_per_sec = 600;
        let mut conn = connected(config);
        let now = Instant::now();
        for _ in 0..10 {
            conn.enqueue_message(OutgoingMessage::new(
                Channel::Unreliable,
                payload(&[1u8; 200]),
            ))
            .unwrap();
        }
        conn.pack_datagrams(now);
        // The debt limit leaves most of the queue for later.
        assert!(!conn.unsent.is_empty());

        // After the debt decays, more goes out.
        let before = conn.unsent.len();
        conn.pack_datagrams(now + Duration::from_secs(2));
        assert!(conn.unsent.len() < before);
    }

    #[test]
    fn test_oversized_send_fails_fast() {
        let mut config = Config::new("Game");
        config.max_message_size = 64;
        let mut conn = connected(config);
        let result = conn.enqueue_message(OutgoingMessage::new(
            Channel::ReliableUnordered,
            payload(&[0u8; 65]),
        ));
        assert!(matches!(
            result,
            Err(gridlink_core::error::ErrorKind::MessageTooLarge { size: 65, limit: 64 })
        ));
    }
}
