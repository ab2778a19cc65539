#![warn(missing_docs)]

//! gridlink-protocol: channels, wire framing and the system message codec.
//!
//! Everything on the wire is an envelope: a kind/channel byte, a sequence
//! number, a var-int payload length and the payload. Several envelopes ride
//! back-to-back in one datagram. This crate owns that framing plus the
//! pieces directly derived from it:
//!
//! - `channel`: the 32 logical channel identifiers and their delivery classes
//! - `envelope`: message kinds and the outgoing/incoming message types
//! - `wire`: datagram encode/decode, acknowledgment and fragment payloads
//! - `system`: the tagged handshake/control message family
//! - `sequencing`: wrap-around sequence arithmetic and the received bitmap

pub mod channel;
pub mod envelope;
pub mod sequencing;
pub mod system;
pub mod wire;

pub use channel::{Channel, DeliveryClass};
pub use envelope::{Deliveries, IncomingMessage, MessageKind, OutgoingMessage};
pub use sequencing::{seq_delta, seq_newer, ReceivedBitmap, SeqStatus, SequenceNumber};
pub use system::SystemMessage;
pub use wire::Envelope;
