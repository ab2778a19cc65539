//! Inbound datagram processing.
//!
//! Every envelope in a datagram is dispatched by kind: user payloads run
//! through their channel's delivery guarantee, fragments accumulate until
//! the group completes and then take the same path, acknowledgments clear
//! pending resends, and system messages feed the handshake/lifecycle logic.
//! Malformed input is reported as a diagnostic and dropped, never fatal.

use std::{collections::VecDeque, time::Instant};

use gridlink_core::bits::BitBuffer;
use gridlink_protocol::{
    channel::{Channel, DeliveryClass},
    envelope::{Deliveries, IncomingMessage, MessageKind},
    sequencing::SequenceNumber,
    system::SystemMessage,
    wire::{self, Envelope},
};

use crate::{
    channel_recv::{ReliableOutcome, ReliableReceiveState},
    fragment::FragmentAssembly,
};

use super::{ConnEvent, Connection};

impl Connection {
    /// Processes one received datagram, returning the messages it released
    /// to the application.
    pub fn handle_datagram(&mut self, data: &[u8], now: Instant) -> Deliveries {
        self.stats.packets_received += 1;
        self.stats.bytes_received += data.len() as u64;
        self.last_heard = now;

        let envelopes = match wire::decode_datagram(data) {
            Ok(envelopes) => envelopes,
            Err(err) => {
                self.diagnostic(format!("undecodable datagram: {err}"));
                return Deliveries::none();
            }
        };

        let mut released = VecDeque::new();
        for envelope in envelopes {
            match envelope.kind {
                MessageKind::User => self.receive_user(envelope, &mut released),
                MessageKind::UserFragment => self.receive_fragment(envelope, now, &mut released),
                MessageKind::Ack => self.receive_acks(&envelope),
                MessageKind::System => match SystemMessage::decode(&envelope.payload) {
                    Ok(message) => self.handle_system(message, now),
                    Err(err) => self.diagnostic(format!("undecodable system message: {err}")),
                },
                MessageKind::OutOfBand => self.receive_out_of_band(envelope, &mut released),
            }
        }

        match released.len() {
            0 => Deliveries::none(),
            1 => Deliveries::one(released.pop_front().expect("len checked")),
            _ => Deliveries::many(released),
        }
    }

    /// Queues an acknowledgment for a reliable receipt. Flushed by the
    /// sender, piggybacked or standalone.
    fn queue_ack(&mut self, channel_id: u8, sequence: SequenceNumber, now: Instant) {
        self.pending_acks.push((channel_id, sequence));
        if self.oldest_pending_ack.is_none() {
            self.oldest_pending_ack = Some(now);
        }
    }

    fn receive_user(&mut self, envelope: Envelope, released: &mut VecDeque<IncomingMessage>) {
        let channel = match envelope.channel() {
            Ok(channel) => channel,
            Err(err) => {
                self.diagnostic(format!("user envelope with {err}"));
                return;
            }
        };
        let now = self.last_heard;
        self.route_payload(channel, envelope.sequence, envelope.payload, now, released);
    }

    /// Runs a complete payload through its channel's delivery guarantee.
    /// Fragmented messages arrive here only after reassembly, so the
    /// guarantee applies to the whole message.
    fn route_payload(
        &mut self,
        channel: Channel,
        sequence: SequenceNumber,
        payload: Vec<u8>,
        now: Instant,
        released: &mut VecDeque<IncomingMessage>,
    ) {
        let addr = self.remote_address;
        match channel.delivery() {
            DeliveryClass::Unreliable => {
                released.push_back(incoming(addr, channel, sequence, payload));
            }
            DeliveryClass::Sequenced => {
                let state = self.sequenced_recv.entry(channel.to_u8()).or_default();
                if state.receive(sequence) {
                    released.push_back(incoming(addr, channel, sequence, payload));
                } else {
                    self.stats.dropped_late += 1;
                }
            }
            DeliveryClass::ReliableUnordered | DeliveryClass::ReliableOrdered => {
                let ordered = channel.delivery() == DeliveryClass::ReliableOrdered;
                let state = self
                    .reliable_recv
                    .entry(channel.to_u8())
                    .or_insert_with(|| ReliableReceiveState::new(ordered));
                match state.receive(sequence, payload) {
                    ReliableOutcome::Deliver(messages) => {
                        self.queue_ack(channel.to_u8(), sequence, now);
                        for (seq, bytes) in messages {
                            released.push_back(incoming(addr, channel, seq, bytes));
                        }
                    }
                    ReliableOutcome::Withheld => {
                        self.queue_ack(channel.to_u8(), sequence, now);
                        self.stats.withheld += 1;
                    }
                    ReliableOutcome::Duplicate => {
                        // Acknowledge duplicates too, to stop resends.
                        self.queue_ack(channel.to_u8(), sequence, now);
                        self.stats.dropped_duplicate += 1;
                    }
                    ReliableOutcome::TooEarly => {
                        tracing::trace!(
                            remote = %addr,
                            sequence,
                            "dropping arrival beyond the receive window"
                        );
                    }
                }
            }
        }
    }

    fn receive_fragment(
        &mut self,
        envelope: Envelope,
        now: Instant,
        released: &mut VecDeque<IncomingMessage>,
    ) {
        let channel = match envelope.channel() {
            Ok(channel) => channel,
            Err(err) => {
                self.diagnostic(format!("fragment envelope with {err}"));
                return;
            }
        };
        let (header, chunk) = match wire::decode_fragment(&envelope.payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.diagnostic(format!("undecodable fragment: {err}"));
                return;
            }
        };

        // A group whose sequence number is already accounted for was
        // reassembled (or dropped) before; just refresh the acknowledgment.
        if channel.is_reliable() {
            if let Some(state) = self.reliable_recv.get(&channel.to_u8()) {
                if state.is_accounted(envelope.sequence) {
                    self.queue_ack(channel.to_u8(), envelope.sequence, now);
                    self.stats.dropped_duplicate += 1;
                    return;
                }
            }
        }

        let inserted = {
            let assembly = self.assemblies.entry(header.group).or_insert_with(|| {
                FragmentAssembly::new(channel, envelope.sequence, header.total, now)
            });
            if assembly.channel() != channel
                || assembly.sequence() != envelope.sequence
                || assembly.total() != header.total
            {
                None
            } else {
                Some(assembly.insert(header.index, chunk))
            }
        };
        match inserted {
            None => self.diagnostic(format!(
                "fragment group {} chunk disagrees with its group header",
                header.group
            )),
            Some(false) => {}
            Some(true) => {
                let assembly = self
                    .assemblies
                    .remove(&header.group)
                    .expect("assembly completed in place");
                let payload = assembly.reassemble();
                // The reassembled message takes the normal channel path and
                // consumes the group's single sequence number.
                self.route_payload(channel, envelope.sequence, payload, now, released);
            }
        }
    }

    fn receive_acks(&mut self, envelope: &Envelope) {
        let groups = match wire::decode_acks(&envelope.payload) {
            Ok(groups) => groups,
            Err(err) => {
                self.diagnostic(format!("undecodable acknowledgment: {err}"));
                return;
            }
        };
        for (channel_id, sequence) in groups {
            if let Some(pending) = self.pending.remove(&(channel_id, sequence)) {
                if let Some(token) = pending.receipt {
                    self.events.push_back(ConnEvent::Receipt { token });
                }
            }
            // Acks for already-cleared messages are expected under
            // duplication and need no handling.
        }
    }

    fn receive_out_of_band(
        &mut self,
        envelope: Envelope,
        released: &mut VecDeque<IncomingMessage>,
    ) {
        // Tag byte 0 is unconnected application data; anything else (NAT
        // punch traffic) matters only before a connection exists.
        match envelope.payload.split_first() {
            Some((0, rest)) => {
                released.push_back(incoming(
                    self.remote_address,
                    Channel::Unreliable,
                    0,
                    rest.to_vec(),
                ));
            }
            Some(_) => {}
            None => self.diagnostic("empty out-of-band payload".into()),
        }
    }
}

fn incoming(
    addr: std::net::SocketAddr,
    channel: Channel,
    sequence: SequenceNumber,
    payload: Vec<u8>,
) -> IncomingMessage {
    IncomingMessage { addr, channel, sequence, payload: BitBuffer::from_bytes(payload) }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use gridlink_core::{bits::BitBuffer, config::Config};
    use gridlink_protocol::envelope::OutgoingMessage;

    use crate::{ConnectionStatus, EndpointIdentity};

    use super::*;

    fn pair(config: Config) -> (Connection, Connection) {
        let a_identity = EndpointIdentity::generate(config.app_identifier.clone());
        let b_identity = EndpointIdentity::generate(config.app_identifier.clone());
        let now = Instant::now();
        let mut a = Connection::connect(
            "127.0.0.1:9301".parse().unwrap(),
            &config,
            &a_identity,
            vec![],
            now,
        );
        let mut b = Connection::connect(
            "127.0.0.1:9302".parse().unwrap(),
            &config,
            &b_identity,
            vec![],
            now,
        );
        a.status = ConnectionStatus::Connected;
        b.status = ConnectionStatus::Connected;
        (a, b)
    }

    fn payload(bytes: &[u8]) -> BitBuffer {
        let mut buf = BitBuffer::new();
        buf.write_bytes(bytes);
        buf
    }

    fn read_all(message: &mut IncomingMessage) -> Vec<u8> {
        let len = message.payload.remaining_bits() / 8;
        message.payload.read_bytes(len).unwrap()
    }

    #[test]
    fn test_reliable_ordered_survives_reordering_and_duplication() {
        let (mut sender, mut receiver) = pair(Config::new("Game"));
        let now = Instant::now();

        for text in [b"m1", b"m2", b"m3"] {
            sender
                .enqueue_message(OutgoingMessage::new(
                    Channel::ReliableOrdered(1),
                    payload(text),
                ))
                .unwrap();
        }
        // Split the batch into one datagram per envelope so the network
        // reordering can be simulated below.
        let datagrams = sender.pack_datagrams(now);
        let envelopes: Vec<_> = datagrams
            .iter()
            .flat_map(|d| wire::decode_datagram(d).unwrap())
            .collect();
        assert_eq!(envelopes.len(), 3);
        let mut single_datagrams: Vec<Vec<u8>> = envelopes
            .iter()
            .map(|e| {
                let mut out = Vec::new();
                wire::write_envelope(&mut out, e.kind, e.channel_id, e.sequence, &e.payload);
                out
            })
            .collect();

        // Deliver reordered: m3, m1, m3 (dup), m2.
        single_datagrams.rotate_left(2);
        let dup = single_datagrams[0].clone();
        single_datagrams.insert(2, dup);

        let mut received = Vec::new();
        for datagram in &single_datagrams {
            for mut message in receiver.handle_datagram(datagram, now) {
                received.push(read_all(&mut message));
            }
        }
        assert_eq!(received, [b"m1".to_vec(), b"m2".to_vec(), b"m3".to_vec()]);
        assert_eq!(receiver.stats().dropped_duplicate, 1);
    }

    #[test]
    fn test_reliable_channels_deliver_at_most_once() {
        let (mut sender, mut receiver) = pair(Config::new("Game"));
        let now = Instant::now();
        sender
            .enqueue_message(OutgoingMessage::new(Channel::ReliableUnordered, payload(b"only")))
            .unwrap();
        let datagram = sender.pack_datagrams(now).remove(0);

        assert_eq!(receiver.handle_datagram(&datagram, now).count(), 1);
        assert_eq!(receiver.handle_datagram(&datagram, now).count(), 0);
        assert_eq!(receiver.handle_datagram(&datagram, now).count(), 0);
        // Every duplicate still refreshed the acknowledgment.
        assert_eq!(receiver.pending_acks.len(), 3);
    }

    #[test]
    fn test_sequenced_drops_late_never_delivers_behind_watermark() {
        let (mut sender, mut receiver) = pair(Config::new("Game"));
        let now = Instant::now();

        let mut datagrams = Vec::new();
        for text in [&b"s0"[..], b"s1", b"s2"] {
            sender
                .enqueue_message(OutgoingMessage::new(Channel::Sequenced(2), payload(text)))
                .unwrap();
            datagrams.extend(sender.pack_datagrams(now));
        }

        // Newest first, then the stale ones.
        assert_eq!(receiver.handle_datagram(&datagrams[2], now).count(), 1);
        assert_eq!(receiver.handle_datagram(&datagrams[0], now).count(), 0);
        assert_eq!(receiver.handle_datagram(&datagrams[1], now).count(), 0);
        assert_eq!(receiver.stats().dropped_late, 2);
        // Sequenced traffic is never acknowledged.
        assert!(receiver.pending_acks.is_empty());
    }

    #[test]
    fn test_acks_clear_pending_and_fire_receipts() {
        let (mut sender, mut receiver) = pair(Config::new("Game"));
        let now = Instant::now();
        sender
            .enqueue_message(OutgoingMessage::with_receipt(
                Channel::ReliableOrdered(1),
                payload(b"tracked"),
                4242,
            ))
            .unwrap();
        let datagram = sender.pack_datagrams(now).remove(0);
        assert_eq!(sender.unacked_count(), 1);

        receiver.handle_datagram(&datagram, now).count();
        // Force the standalone ack flush.
        let flush_at = now + Duration::from_secs(1);
        let acks = receiver.pack_datagrams(flush_at);
        assert_eq!(acks.len(), 1);

        sender.handle_datagram(&acks[0], flush_at).count();
        assert_eq!(sender.unacked_count(), 0);
        assert!(sender
            .take_events()
            .iter()
            .any(|e| matches!(e, ConnEvent::Receipt { token: 4242 })));
    }

    #[test]
    fn test_fragmented_message_reassembles_out_of_order() {
        let mut config = Config::new("Game");
        config.mtu = 400;
        let (mut sender, mut receiver) = pair(config);
        let now = Instant::now();
        let data: Vec<u8> = (0u8..=255).cycle().take(1500).collect();

        sender
            .enqueue_message(OutgoingMessage::new(
                Channel::ReliableOrdered(3),
                payload(&data),
            ))
            .unwrap();
        let datagrams = sender.pack_datagrams(now);
        assert!(datagrams.len() >= 4);

        // Deliver the fragments in reverse order.
        let mut received = Vec::new();
        for datagram in datagrams.iter().rev() {
            for mut message in receiver.handle_datagram(datagram, now) {
                received.push((message.channel, message.sequence, read_all(&mut message)));
            }
        }
        assert_eq!(received.len(), 1);
        let (channel, sequence, bytes) = &received[0];
        assert_eq!(*channel, Channel::ReliableOrdered(3));
        assert_eq!(*sequence, 0);
        assert_eq!(bytes, &data);
    }

    #[test]
    fn test_duplicate_fragment_group_after_delivery_is_acked_not_delivered() {
        let mut config = Config::new("Game");
        config.mtu = 400;
        let (mut sender, mut receiver) = pair(config);
        let now = Instant::now();
        let data = vec![5u8; 900];

        sender
            .enqueue_message(OutgoingMessage::new(
                Channel::ReliableUnordered,
                payload(&data),
            ))
            .unwrap();
        let datagrams = sender.pack_datagrams(now);
        let mut delivered = 0;
        for datagram in &datagrams {
            delivered += receiver.handle_datagram(datagram, now).count();
        }
        assert_eq!(delivered, 1);

        // The whole group arrives again, as after a spurious resend.
        receiver.pending_acks.clear();
        let mut redelivered = 0;
        for datagram in &datagrams {
            redelivered += receiver.handle_datagram(datagram, now).count();
        }
        assert_eq!(redelivered, 0);
        assert!(!receiver.pending_acks.is_empty());
    }

    #[test]
    fn test_malformed_datagram_is_diagnostic_not_fatal() {
        let (_, mut receiver) = pair(Config::new("Game"));
        let now = Instant::now();
        assert_eq!(receiver.handle_datagram(&[0x07, 1, 2], now).count(), 0);
        assert_eq!(receiver.stats().malformed, 1);
        assert!(receiver
            .take_events()
            .iter()
            .any(|e| matches!(e, ConnEvent::Diagnostic { .. })));
    }

    #[test]
    fn test_ack_length_violation_is_diagnostic() {
        let (_, mut receiver) = pair(Config::new("Game"));
        let now = Instant::now();
        let mut datagram = Vec::new();
        wire::write_envelope(&mut datagram, MessageKind::Ack, 0, 0, &[1, 2, 3, 4]);
        receiver.handle_datagram(&datagram, now).count();
        assert_eq!(receiver.stats().malformed, 1);
    }

    #[test]
    fn test_out_of_band_data_delivered_unreliably() {
        let (_, mut receiver) = pair(Config::new("Game"));
        let now = Instant::now();
        let mut oob = vec![0u8];
        oob.extend_from_slice(b"unconnected");
        let mut datagram = Vec::new();
        wire::write_envelope(&mut datagram, MessageKind::OutOfBand, 0, 0, &oob);

        let mut messages: Vec<_> = receiver.handle_datagram(&datagram, now).collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].channel, Channel::Unreliable);
        assert_eq!(read_all(&mut messages[0]), b"unconnected");
    }
}
