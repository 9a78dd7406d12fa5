//! # Fragmenter
//!
//! Splits a JPEG header or scan into link packets of at most
//! [`FRAGMENT_MAX_DATA_SIZE`] data bytes each. Block ids count up from 0 and
//! only the last fragment carries the final-block flag. An empty input still
//! yields one (final, empty) fragment.

use super::packet::{Packet, PacketType, FRAGMENT_MAX_DATA_SIZE};

/// Number of fragments needed for `len` bytes
pub fn fragment_count(len: usize) -> usize {
    len.div_ceil(FRAGMENT_MAX_DATA_SIZE).max(1)
}

/// Iterator over the fragments of one payload
#[derive(Debug, Clone)]
pub struct Fragmenter<'a> {
    packet_type: PacketType,
    data: &'a [u8],
    offset: usize,
    block_id: u8,
    done: bool,
}

impl<'a> Fragmenter<'a> {
    /// # Arguments
    ///
    /// * `packet_type` - [`PacketType::InitialHeaderData`] or [`PacketType::FrameData`]
    /// * `data` - bytes to split
    pub fn new(packet_type: PacketType, data: &'a [u8]) -> Self {
        Self {
            packet_type,
            data,
            offset: 0,
            block_id: 0,
            done: false,
        }
    }
}

impl Iterator for Fragmenter<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        if self.done {
            return None;
        }
        let remaining = self.data.len() - self.offset;
        let final_block = remaining <= FRAGMENT_MAX_DATA_SIZE;
        let n = remaining.min(FRAGMENT_MAX_DATA_SIZE);
        let chunk = &self.data[self.offset..self.offset + n];

        let packet = Packet::fragment(self.packet_type, self.block_id, chunk, final_block).ok()?;
        self.offset += n;
        self.block_id = self.block_id.wrapping_add(1);
        self.done = final_block;
        Some(packet)
    }
}
