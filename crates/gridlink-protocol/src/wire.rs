//! Datagram framing.
//!
//! One datagram carries envelopes back-to-back until the MTU is reached.
//! Each envelope is framed as:
//!
//! ```text
//! [1 byte: kind in the low 3 bits, channel id in the high 5 bits]
//! [2 bytes: sequence number, little-endian]
//! [var-int: payload byte length]
//! [payload bytes]
//! ```
//!
//! The acknowledgment payload is a flat run of 3-byte groups
//! `[channel][sequence:2]`. A fragment payload prefixes its chunk with
//! `[group id:2][var index][var total]`.

use std::{
    convert::TryFrom,
    io::{Cursor, Read},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use gridlink_core::{
    constants::{ACK_GROUP_SIZE, ENVELOPE_FIXED_HEADER},
    error::{ErrorKind, Result},
};

use crate::{channel::Channel, envelope::MessageKind, sequencing::SequenceNumber};

/// A decoded envelope, payload still opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Library message kind.
    pub kind: MessageKind,
    /// Raw channel identifier (meaningful for User/UserFragment kinds).
    pub channel_id: u8,
    /// Sequence number within the channel (0 for unsequenced kinds).
    pub sequence: SequenceNumber,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// The decoded channel, validating the raw identifier.
    pub fn channel(&self) -> Result<Channel> {
        Channel::try_from(self.channel_id)
    }

    /// Encoded size of an envelope with a payload of `payload_len` bytes.
    pub fn encoded_len(payload_len: usize) -> usize {
        ENVELOPE_FIXED_HEADER + var_u32_len(payload_len as u32) + payload_len
    }
}

/// Bytes a var-int encoding of `value` occupies.
pub fn var_u32_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0xFFF_FFFF => 4,
        _ => 5,
    }
}

/// Appends a var-int (7-bit groups, low group first) to `out`.
pub fn write_var_u32(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let group = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            out.push(group | 0x80);
        } else {
            out.push(group);
            return;
        }
    }
}

/// Reads a var-int from a cursor.
pub fn read_var_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    let mut value = 0u64;
    for group in 0..5 {
        let byte = cursor.read_u8().map_err(|_| ErrorKind::Malformed("truncated var-int"))?;
        value |= ((byte & 0x7F) as u64) << (group * 7);
        if byte & 0x80 == 0 {
            return u32::try_from(value).map_err(|_| ErrorKind::VarIntTooLong);
        }
    }
    Err(ErrorKind::VarIntTooLong)
}

/// Appends one envelope to a datagram under construction.
pub fn write_envelope(
    out: &mut Vec<u8>,
    kind: MessageKind,
    channel_id: u8,
    sequence: SequenceNumber,
    payload: &[u8],
) {
    debug_assert!(channel_id < 32);
    out.push(kind.to_u8() | (channel_id << 3));
    out.write_u16::<LittleEndian>(sequence).expect("vec write is infallible");
    write_var_u32(out, payload.len() as u32);
    out.extend_from_slice(payload);
}

/// Decodes every envelope in a received datagram.
///
/// The whole datagram is rejected on the first structural error; a datagram
/// that decodes partially was corrupt, not merely short.
pub fn decode_datagram(data: &[u8]) -> Result<Vec<Envelope>> {
    let mut cursor = Cursor::new(data);
    let mut envelopes = Vec::new();
    while (cursor.position() as usize) < data.len() {
        envelopes.push(decode_envelope(&mut cursor, data.len())?);
    }
    Ok(envelopes)
}

fn decode_envelope(cursor: &mut Cursor<&[u8]>, datagram_len: usize) -> Result<Envelope> {
    let header = cursor.read_u8().map_err(|_| ErrorKind::Malformed("truncated header"))?;
    let kind = MessageKind::try_from(header & 0x07)?;
    let channel_id = header >> 3;
    let sequence = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| ErrorKind::Malformed("truncated sequence number"))?;
    let payload_len = read_var_u32(cursor)? as usize;
    if cursor.position() as usize + payload_len > datagram_len {
        return Err(ErrorKind::Malformed("payload length exceeds datagram"));
    }
    let mut payload = vec![0u8; payload_len];
    cursor.read_exact(&mut payload).map_err(|_| ErrorKind::Malformed("truncated payload"))?;
    Ok(Envelope { kind, channel_id, sequence, payload })
}

// ===== Acknowledgment payloads =====

/// Encodes acknowledgment groups as a flat run of `[channel][seq:2]`.
pub fn encode_acks(groups: &[(u8, SequenceNumber)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(groups.len() * ACK_GROUP_SIZE);
    for &(channel_id, sequence) in groups {
        out.push(channel_id);
        out.write_u16::<LittleEndian>(sequence).expect("vec write is infallible");
    }
    out
}

/// Decodes an acknowledgment payload. A length that is not a whole number
/// of groups is a malformed-message diagnostic.
pub fn decode_acks(payload: &[u8]) -> Result<Vec<(u8, SequenceNumber)>> {
    if payload.len() % ACK_GROUP_SIZE != 0 {
        return Err(ErrorKind::AckPayloadLength(payload.len()));
    }
    let mut groups = Vec::with_capacity(payload.len() / ACK_GROUP_SIZE);
    for chunk in payload.chunks_exact(ACK_GROUP_SIZE) {
        groups.push((chunk[0], u16::from_le_bytes([chunk[1], chunk[2]])));
    }
    Ok(groups)
}

// ===== Fragment payloads =====

/// Reassembly coordinates carried by every fragment chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Fragment-group id, a per-connection incrementing counter.
    pub group: u16,
    /// Zero-based chunk index.
    pub index: u32,
    /// Total chunk count in the group.
    pub total: u32,
}

/// Builds a fragment payload: group id, var-int index and total, chunk.
pub fn encode_fragment(header: FragmentHeader, chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + 10 + chunk.len());
    out.write_u16::<LittleEndian>(header.group).expect("vec write is infallible");
    write_var_u32(&mut out, header.index);
    write_var_u32(&mut out, header.total);
    out.extend_from_slice(chunk);
    out
}

/// Splits a fragment payload into its header and chunk bytes.
pub fn decode_fragment(payload: &[u8]) -> Result<(FragmentHeader, &[u8])> {
    let mut cursor = Cursor::new(payload);
    let group = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| ErrorKind::Malformed("truncated fragment group id"))?;
    let index = read_var_u32(&mut cursor)?;
    let total = read_var_u32(&mut cursor)?;
    if total == 0 || index >= total {
        return Err(ErrorKind::Malformed("fragment index outside group"));
    }
    let chunk = &payload[cursor.position() as usize..];
    Ok((FragmentHeader { group, index, total }, chunk))
}

/// Worst-case byte overhead of a fragment envelope above its chunk: the
/// envelope header plus group id plus two var-ints.
pub fn fragment_overhead() -> usize {
    Envelope::encoded_len(0) + 2 + 5 + 5
}
