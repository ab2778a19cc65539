//! Error types surfaced by the transport.
//!
//! Failures inside the worker loop never cross the thread boundary as
//! errors; they are translated into diagnostics or status events. The
//! variants here cover the remaining surfaces: send-time validation,
//! socket setup, and wire decoding.

use std::io;

use thiserror::Error;

/// Result alias used throughout the gridlink crates.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Errors produced by the gridlink transport.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Underlying socket I/O failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// A single message exceeded the configured send limit. Raised to the
    /// caller at send time, distinct from network-condition failures.
    #[error("message of {size} bytes exceeds the configured limit of {limit} bytes")]
    MessageTooLarge {
        /// Encoded size of the offending message.
        size: usize,
        /// Configured maximum message size.
        limit: usize,
    },

    /// A read ran past the end of a bit buffer.
    #[error("buffer overrun: needed {requested} bits but only {available} remain")]
    BufferOverrun {
        /// Bits the read required.
        requested: usize,
        /// Bits left between the read cursor and the write cursor.
        available: usize,
    },

    /// A var-int did not terminate within its maximum group count.
    #[error("variable-length integer exceeds maximum encoded length")]
    VarIntTooLong,

    /// A length-prefixed string did not decode as UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    /// A channel byte outside the 32 defined identifiers.
    #[error("invalid channel identifier {0}")]
    InvalidChannel(u8),

    /// An envelope kind outside the defined library message kinds.
    #[error("invalid message kind {0}")]
    InvalidMessageKind(u8),

    /// A system message sub-type byte with no defined meaning.
    #[error("invalid system message type {0}")]
    InvalidSystemType(u8),

    /// An acknowledgment payload whose length is not a multiple of the
    /// 3-byte group size.
    #[error("acknowledgment payload of {0} bytes is not a whole number of groups")]
    AckPayloadLength(usize),

    /// An envelope or system message that was structurally truncated.
    #[error("malformed message: {0}")]
    Malformed(&'static str),

    /// An operation that requires an established connection found none.
    #[error("not connected")]
    NotConnected,

    /// The transport has shut down and no longer accepts commands.
    #[error("transport is shut down")]
    ShutDown,
}
