//! Fragmentation and reassembly of oversized messages.
//!
//! A message whose encoded envelope would exceed the MTU is cut into
//! fixed-size chunks sharing a fragment-group id; the final chunk may be
//! shorter. The receiver accumulates chunks into a `FragmentAssembly` keyed
//! by group id and releases the concatenated message to the normal channel
//! reliability path once every chunk has arrived. The group consumes exactly
//! one sequence number on its channel, carried by the reassembled message.

use std::{collections::HashMap, time::{Duration, Instant}};

use gridlink_protocol::{channel::Channel, sequencing::SequenceNumber};
use tracing::warn;

/// Cuts a payload into chunks of at most `chunk_size` bytes.
pub fn split_chunks(payload: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    debug_assert!(chunk_size > 0);
    payload.chunks(chunk_size).map(|chunk| chunk.to_vec()).collect()
}

/// Reassembly state for one fragment group.
#[derive(Debug)]
pub struct FragmentAssembly {
    channel: Channel,
    sequence: SequenceNumber,
    chunks: Vec<Option<Vec<u8>>>,
    received: u32,
    first_chunk_at: Instant,
}

impl FragmentAssembly {
    /// Starts an assembly when the first chunk of a group arrives.
    pub fn new(
        channel: Channel,
        sequence: SequenceNumber,
        total: u32,
        now: Instant,
    ) -> Self {
        Self {
            channel,
            sequence,
            chunks: vec![None; total as usize],
            received: 0,
            first_chunk_at: now,
        }
    }

    /// The channel the reassembled message belongs to.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// The channel sequence number the whole group consumes.
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Expected chunk count.
    pub fn total(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Stores one chunk. Duplicate indices are ignored. Returns true once
    /// every chunk is present.
    pub fn insert(&mut self, index: u32, chunk: &[u8]) -> bool {
        if let Some(slot) = self.chunks.get_mut(index as usize) {
            if slot.is_none() {
                *slot = Some(chunk.to_vec());
                self.received += 1;
            }
        }
        self.is_complete()
    }

    /// Whether every chunk has arrived.
    pub fn is_complete(&self) -> bool {
        self.received as usize == self.chunks.len()
    }

    /// When the group's first chunk arrived, for eviction sweeps.
    pub fn first_chunk_at(&self) -> Instant {
        self.first_chunk_at
    }

    /// Concatenates the chunks in index order. Only valid once complete.
    pub fn reassemble(self) -> Vec<u8> {
        debug_assert!(self.is_complete());
        let mut out = Vec::with_capacity(self.chunks.iter().map(|c| c.as_ref().map_or(0, Vec::len)).sum());
        for chunk in self.chunks.into_iter().flatten() {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Evicts assemblies whose first chunk is older than `timeout`. A peer that
/// sends a partial group and goes silent would otherwise hold its buffers
/// until connection teardown.
pub fn evict_stale(
    assemblies: &mut HashMap<u16, FragmentAssembly>,
    timeout: Duration,
    now: Instant,
) {
    let stale: Vec<u16> = assemblies
        .iter()
        .filter(|(_, assembly)| now.duration_since(assembly.first_chunk_at()) > timeout)
        .map(|(&group, _)| group)
        .collect();
    if !stale.is_empty() {
        warn!("evicting {} incomplete fragment group(s) older than {:?}", stale.len(), timeout);
        for group in stale {
            assemblies.remove(&group);
        }
    }
}
