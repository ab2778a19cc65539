//! Per-channel receive-side state.
//!
//! Each channel applies its own delivery guarantee independently:
//!
//! - Sequenced channels track the next expected number and drop late
//!   arrivals; they never reorder.
//! - Reliable channels track received numbers in a bitmap behind an
//!   "all received up to" watermark; duplicates are rejected after being
//!   acknowledged, and ordered channels withhold early arrivals until the
//!   gap closes, cascade-releasing contiguous successors.

use std::collections::HashMap;

use gridlink_protocol::sequencing::{seq_delta, ReceivedBitmap, SeqStatus, SequenceNumber};

/// Window of early sequence numbers a reliable channel tracks ahead of its
/// watermark. Arrivals beyond it are dropped unacknowledged so the sender
/// retries once the window advances.
const RELIABLE_WINDOW: usize = 1024;

// ===== Sequenced channels =====

/// Receive state for one sequenced-drop-late channel.
#[derive(Debug, Default)]
pub struct SequencedReceiveState {
    next_expected: SequenceNumber,
}

impl SequencedReceiveState {
    /// Accepts or drops an arrival. An accepted arrival advances the
    /// expected pointer past it, so later arrivals with smaller numbers are
    /// then rejected as late.
    pub fn receive(&mut self, sequence: SequenceNumber) -> bool {
        if seq_delta(sequence, self.next_expected) < 0 {
            return false;
        }
        self.next_expected = sequence.wrapping_add(1);
        true
    }
}

// ===== Reliable channels =====

/// What a reliable channel decided about an arrival.
#[derive(Debug)]
pub enum ReliableOutcome<T> {
    /// New data: acknowledge and deliver these messages (the arrival itself
    /// and, for ordered channels, any cascade-released successors).
    Deliver(Vec<(SequenceNumber, T)>),
    /// Already seen: acknowledge again to stop resends, deliver nothing.
    Duplicate,
    /// Withheld waiting for earlier numbers: acknowledge, deliver nothing.
    Withheld,
    /// Too far ahead to track: drop without acknowledging.
    TooEarly,
}

/// Receive state for one reliable channel (ordered or unordered).
#[derive(Debug)]
pub struct ReliableReceiveState<T> {
    bitmap: ReceivedBitmap,
    /// Early ordered arrivals buffered until the gap closes. Unordered
    /// channels never populate this.
    withheld: HashMap<SequenceNumber, T>,
    ordered: bool,
}

impl<T> ReliableReceiveState<T> {
    /// Creates state for an ordered or unordered reliable channel.
    pub fn new(ordered: bool) -> Self {
        Self { bitmap: ReceivedBitmap::new(RELIABLE_WINDOW), withheld: HashMap::new(), ordered }
    }

    /// The watermark: every number below it is fully accounted for.
    pub fn expected(&self) -> SequenceNumber {
        self.bitmap.expected()
    }

    /// Whether an arrival with this number would be rejected as a duplicate.
    pub fn is_accounted(&self, sequence: SequenceNumber) -> bool {
        matches!(self.bitmap.status(sequence), SeqStatus::Duplicate)
    }

    /// Number of ordered messages currently withheld.
    pub fn withheld_len(&self) -> usize {
        self.withheld.len()
    }

    /// Processes one arrival carrying `message`.
    pub fn receive(&mut self, sequence: SequenceNumber, message: T) -> ReliableOutcome<T> {
        match self.bitmap.status(sequence) {
            SeqStatus::Duplicate => ReliableOutcome::Duplicate,
            SeqStatus::TooEarly => ReliableOutcome::TooEarly,
            SeqStatus::Expected => {
                let mut released = vec![(sequence, message)];
                self.bitmap.advance();
                // Filling the gap cascade-releases contiguous successors.
                while self.bitmap.next_is_marked() {
                    let next = self.bitmap.consume_marked();
                    if let Some(withheld) = self.withheld.remove(&next) {
                        released.push((next, withheld));
                    }
                }
                ReliableOutcome::Deliver(released)
            }
            SeqStatus::Early => {
                self.bitmap.mark_early(sequence);
                if self.ordered {
                    self.withheld.insert(sequence, message);
                    ReliableOutcome::Withheld
                } else {
                    ReliableOutcome::Deliver(vec![(sequence, message)])
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequenced_drops_late_arrivals() {
        let mut state = SequencedReceiveState::default();
        assert!(state.receive(0));
        assert!(state.receive(5)); // out of order but not late: advances past 5
        assert!(!state.receive(3)); // now late
        assert!(!state.receive(5)); // duplicate of the newest is late too
        assert!(state.receive(6));
    }

    #[test]
    fn test_sequenced_wraps() {
        let mut state = SequencedReceiveState::default();
        assert!(state.receive(65534));
        assert!(state.receive(2)); // ahead across the wrap
        assert!(!state.receive(65535));
    }

    #[test]
    fn test_ordered_withholds_and_cascades() {
        let mut state: ReliableReceiveState<&str> = ReliableReceiveState::new(true);

        assert!(matches!(state.receive(1, "b"), ReliableOutcome::Withheld));
        assert!(matches!(state.receive(2, "c"), ReliableOutcome::Withheld));
        assert_eq!(state.withheld_len(), 2);

        match state.receive(0, "a") {
            ReliableOutcome::Deliver(released) => {
                let order: Vec<_> = released.iter().map(|(seq, m)| (*seq, *m)).collect();
                assert_eq!(order, [(0, "a"), (1, "b"), (2, "c")]);
            }
            other => panic!("expected delivery, got {other:?}"),
        }
        assert_eq!(state.withheld_len(), 0);
        assert_eq!(state.expected(), 3);
    }

    #[test]
    fn test_ordered_rejects_duplicates_before_and_after_delivery() {
        let mut state: ReliableReceiveState<&str> = ReliableReceiveState::new(true);
        assert!(matches!(state.receive(1, "b"), ReliableOutcome::Withheld));
        // Duplicate of a withheld message.
        assert!(matches!(state.receive(1, "b"), ReliableOutcome::Duplicate));
        assert!(matches!(state.receive(0, "a"), ReliableOutcome::Deliver(_)));
        // Duplicate of an already delivered message.
        assert!(matches!(state.receive(0, "a"), ReliableOutcome::Duplicate));
        assert!(matches!(state.receive(1, "b"), ReliableOutcome::Duplicate));
    }

    #[test]
    fn test_unordered_delivers_early_arrivals_immediately() {
        let mut state: ReliableReceiveState<&str> = ReliableReceiveState::new(false);
        match state.receive(3, "d") {
            ReliableOutcome::Deliver(released) => assert_eq!(released.len(), 1),
            other => panic!("expected delivery, got {other:?}"),
        }
        assert!(matches!(state.receive(3, "d"), ReliableOutcome::Duplicate));
        // The watermark still advances once the gap closes.
        for seq in 0..3 {
            assert!(matches!(state.receive(seq, "x"), ReliableOutcome::Deliver(_)));
        }
        assert_eq!(state.expected(), 4);
    }

    #[test]
    fn test_too_early_is_not_tracked() {
        let mut state: ReliableReceiveState<&str> = ReliableReceiveState::new(true);
        let far = RELIABLE_WINDOW as u16;
        assert!(matches!(state.receive(far, "z"), ReliableOutcome::TooEarly));
        assert_eq!(state.withheld_len(), 0);
    }
}
