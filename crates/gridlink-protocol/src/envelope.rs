//! Message kinds and the user-facing message types.

use std::{collections::VecDeque, convert::TryFrom, net::SocketAddr};

use gridlink_core::{bits::BitBuffer, error::ErrorKind};

use crate::{channel::Channel, sequencing::SequenceNumber};

/// Library message kind carried in the low 3 bits of the envelope header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Application payload on a channel.
    User = 0,
    /// One chunk of an oversized application payload.
    UserFragment = 1,
    /// A run of acknowledgment groups.
    Ack = 2,
    /// Unconnected application data or NAT punch traffic.
    OutOfBand = 3,
    /// Handshake and control messages; sub-type is the payload's first byte.
    System = 4,
}

impl MessageKind {
    /// Wire value of the kind.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::User),
            1 => Ok(MessageKind::UserFragment),
            2 => Ok(MessageKind::Ack),
            3 => Ok(MessageKind::OutOfBand),
            4 => Ok(MessageKind::System),
            _ => Err(ErrorKind::InvalidMessageKind(value)),
        }
    }
}

/// Token handed back to the application when a reliable message it tagged
/// is acknowledged by the remote peer.
pub type ReceiptToken = u64;

/// A message the application has queued for sending.
///
/// The sequence number is assigned lazily at the first send attempt; resend
/// bookkeeping lives with the owning connection.
#[derive(Debug)]
pub struct OutgoingMessage {
    /// Channel determining delivery semantics.
    pub channel: Channel,
    /// Opaque application payload.
    pub payload: BitBuffer,
    /// Optional delivery-receipt token fired on acknowledgment.
    pub receipt: Option<ReceiptToken>,
}

impl OutgoingMessage {
    /// Creates a message without a delivery receipt.
    pub fn new(channel: Channel, payload: BitBuffer) -> Self {
        Self { channel, payload, receipt: None }
    }

    /// Creates a message whose acknowledgment fires a receipt event.
    pub fn with_receipt(channel: Channel, payload: BitBuffer, receipt: ReceiptToken) -> Self {
        Self { channel, payload, receipt: Some(receipt) }
    }
}

/// A fully processed message ready for the application to read.
#[derive(Debug)]
pub struct IncomingMessage {
    /// Originating remote endpoint.
    pub addr: SocketAddr,
    /// Channel the message arrived on.
    pub channel: Channel,
    /// Sequence number within the channel (0 for unreliable arrivals).
    pub sequence: SequenceNumber,
    /// Payload, read cursor at the start.
    pub payload: BitBuffer,
}

/// Zero, one or many incoming messages produced by one processing step.
///
/// Most envelopes yield at most one delivery, but an ordered arrival that
/// fills a gap cascade-releases its withheld successors.
#[derive(Debug)]
pub struct Deliveries {
    inner: DeliveriesInner,
}

#[derive(Debug)]
enum DeliveriesInner {
    Slot(Option<IncomingMessage>),
    Many(VecDeque<IncomingMessage>),
}

impl Deliveries {
    /// No message produced.
    pub fn none() -> Self {
        Self { inner: DeliveriesInner::Slot(None) }
    }

    /// Exactly one message produced.
    pub fn one(message: IncomingMessage) -> Self {
        Self { inner: DeliveriesInner::Slot(Some(message)) }
    }

    /// A cascade of messages produced.
    pub fn many(messages: VecDeque<IncomingMessage>) -> Self {
        Self { inner: DeliveriesInner::Many(messages) }
    }

    /// Number of messages held.
    pub fn len(&self) -> usize {
        match &self.inner {
            DeliveriesInner::Slot(slot) => slot.is_some() as usize,
            DeliveriesInner::Many(queue) => queue.len(),
        }
    }

    /// True when nothing was produced.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for Deliveries {
    type Item = IncomingMessage;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            DeliveriesInner::Slot(slot) => slot.take(),
            DeliveriesInner::Many(queue) => queue.pop_front(),
        }
    }
}
