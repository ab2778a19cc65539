//! Logical channel identifiers.
//!
//! A channel determines delivery semantics only; each channel is otherwise
//! an independent stream with its own 16-bit sequence-number space. There
//! are 32 identifiers: one unreliable, fifteen sequenced, one
//! reliable-unordered and fifteen reliable-ordered.

use std::convert::TryFrom;

use gridlink_core::error::ErrorKind;

/// Broad delivery behavior of a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeliveryClass {
    /// Deliver immediately, no tracking.
    Unreliable,
    /// Drop arrivals older than the newest seen; never reorder.
    Sequenced,
    /// Guaranteed delivery, any order.
    ReliableUnordered,
    /// Guaranteed delivery in send order; early arrivals are withheld.
    ReliableOrdered,
}

/// One of the 32 logical channels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Fire-and-forget.
    Unreliable,
    /// Sequenced-drop-late stream 1..=15.
    Sequenced(u8),
    /// Reliable, order not preserved.
    ReliableUnordered,
    /// Reliable, in-order stream 1..=15.
    ReliableOrdered(u8),
}

impl Channel {
    /// Stable wire identifier: 0, 1-15, 16, 17-31. Stream numbers outside
    /// 1..=15 have no wire representation.
    pub fn to_u8(self) -> u8 {
        match self {
            Channel::Unreliable => 0,
            Channel::Sequenced(stream) => {
                debug_assert!((1..=15).contains(&stream));
                stream
            }
            Channel::ReliableUnordered => 16,
            Channel::ReliableOrdered(stream) => {
                debug_assert!((1..=15).contains(&stream));
                16 + stream
            }
        }
    }

    /// The delivery class governing this channel's receive path.
    pub fn delivery(self) -> DeliveryClass {
        match self {
            Channel::Unreliable => DeliveryClass::Unreliable,
            Channel::Sequenced(_) => DeliveryClass::Sequenced,
            Channel::ReliableUnordered => DeliveryClass::ReliableUnordered,
            Channel::ReliableOrdered(_) => DeliveryClass::ReliableOrdered,
        }
    }

    /// Whether receipts must be acknowledged and unacknowledged sends resent.
    pub fn is_reliable(self) -> bool {
        matches!(self, Channel::ReliableUnordered | Channel::ReliableOrdered(_))
    }

    /// Whether the channel carries a meaningful sequence number at all.
    pub fn is_sequenced(self) -> bool {
        !matches!(self, Channel::Unreliable)
    }

    /// Iterator over every valid channel, wire order.
    pub fn all() -> impl Iterator<Item = Channel> {
        (0..gridlink_core::constants::CHANNEL_COUNT)
            .map(|id| Channel::try_from(id).expect("all ids below CHANNEL_COUNT are valid"))
    }
}

impl TryFrom<u8> for Channel {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Channel::Unreliable),
            1..=15 => Ok(Channel::Sequenced(value)),
            16 => Ok(Channel::ReliableUnordered),
            17..=31 => Ok(Channel::ReliableOrdered(value - 16)),
            _ => Err(ErrorKind::InvalidChannel(value)),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Unreliable => write!(f, "unreliable"),
            Channel::Sequenced(stream) => write!(f, "sequenced-{stream}"),
            Channel::ReliableUnordered => write!(f, "reliable-unordered"),
            Channel::ReliableOrdered(stream) => write!(f, "reliable-ordered-{stream}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_mapping_round_trips() {
        for id in 0u8..32 {
            let channel = Channel::try_from(id).unwrap();
            assert_eq!(channel.to_u8(), id);
        }
        assert!(Channel::try_from(32).is_err());
        assert!(Channel::try_from(255).is_err());
    }

    #[test]
    fn test_delivery_classes() {
        assert_eq!(Channel::Unreliable.delivery(), DeliveryClass::Unreliable);
        assert_eq!(Channel::Sequenced(7).delivery(), DeliveryClass::Sequenced);
        assert_eq!(Channel::ReliableUnordered.delivery(), DeliveryClass::ReliableUnordered);
        assert_eq!(Channel::ReliableOrdered(1).delivery(), DeliveryClass::ReliableOrdered);
    }

    #[test]
    fn test_reliability_flags() {
        assert!(!Channel::Unreliable.is_reliable());
        assert!(!Channel::Sequenced(3).is_reliable());
        assert!(Channel::ReliableUnordered.is_reliable());
        assert!(Channel::ReliableOrdered(15).is_reliable());
        assert!(!Channel::Unreliable.is_sequenced());
        assert!(Channel::Sequenced(3).is_sequenced());
    }

    #[test]
    fn test_all_yields_32_distinct_channels() {
        let channels: Vec<Channel> = Channel::all().collect();
        assert_eq!(channels.len(), 32);
        for (id, channel) in channels.iter().enumerate() {
            assert_eq!(channel.to_u8() as usize, id);
        }
    }
}
