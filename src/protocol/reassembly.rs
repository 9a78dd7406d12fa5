//! # Frame Reassembly
//!
//! Receive-side counterpart of [`super::fragment::Fragmenter`]. Fragments are
//! copied to `block_id * 245` (header) or `block_id * 245 + header_len`
//! (scan data) in the active framebuffer. The JPEG header arrives once per
//! session and is replicated into every slot, so each slot holds a complete
//! JPEG stream once its scan data lands.
//!
//! ## Slot Hand-off
//!
//! ```text
//!  reassembler ──writes──▶ slot[current]
//!  FrameComplete ──▶ image task: take_current() ──▶ decodes slot[prev]
//!                                   current ^= 1  ──▶ next frame fills the other slot
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::packet::{Packet, PacketType, FRAGMENT_MAX_DATA_SIZE};
use crate::error::{FpvLinkError, Result};

/// Bytes per framebuffer slot
pub const FRAME_BUFFER_SIZE: usize = 16 * 1024;

/// Number of framebuffer slots
pub const FRAME_BUFFER_COUNT: usize = 2;

/// Typed index of a framebuffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One framebuffer
#[derive(Debug)]
pub struct FrameSlot {
    data: Box<[u8]>,
    len: usize,
}

impl FrameSlot {
    fn new() -> Self {
        Self {
            data: vec![0u8; FRAME_BUFFER_SIZE].into_boxed_slice(),
            len: 0,
        }
    }

    /// Valid bytes: header plus the scan data of the last completed frame
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Double-buffered frame storage shared by the reassembler and image task
#[derive(Debug)]
pub struct FrameBuffers {
    slots: [Mutex<FrameSlot>; FRAME_BUFFER_COUNT],
    current: AtomicUsize,
}

impl Default for FrameBuffers {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffers {
    pub fn new() -> Self {
        Self {
            slots: [Mutex::new(FrameSlot::new()), Mutex::new(FrameSlot::new())],
            current: AtomicUsize::new(0),
        }
    }

    /// Slot currently being filled
    pub fn current(&self) -> SlotId {
        SlotId(self.current.load(Ordering::Acquire))
    }

    /// Switch the active slot and return the one that was active
    pub fn take_current(&self) -> SlotId {
        SlotId(self.current.fetch_xor(1, Ordering::AcqRel))
    }

    /// Lock a slot for reading or writing
    pub fn lock(&self, slot: SlotId) -> MutexGuard<'_, FrameSlot> {
        // Slot data stays consistent across a panicked holder
        self.slots[slot.0].lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Outcome of feeding one fragment to the [`Reassembler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyEvent {
    /// Fragment copied, more to come
    Stored,
    /// Final header fragment seen, header replicated into every slot
    HeaderComplete { header_len: usize },
    /// Final scan fragment seen, `slot` now holds a complete JPEG stream
    FrameComplete { slot: SlotId, frame_len: usize },
}

/// Fragment sink writing into [`FrameBuffers`]
#[derive(Debug)]
pub struct Reassembler {
    buffers: std::sync::Arc<FrameBuffers>,
    header_len: usize,
    header_end: usize,
    frame_end: usize,
}

impl Reassembler {
    pub fn new(buffers: std::sync::Arc<FrameBuffers>) -> Self {
        Self {
            buffers,
            header_len: 0,
            header_end: 0,
            frame_end: 0,
        }
    }

    /// Length of the replicated JPEG header (0 until one completes)
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Copy one fragment into place
    ///
    /// # Arguments
    ///
    /// * `packet` - decrypted INITIAL_HEADER_DATA or FRAME_DATA packet
    ///
    /// # Errors
    ///
    /// Returns a protocol error for other packet types, a payload without
    /// block id, or data that would land outside the slot.
    pub fn accept(&mut self, packet: &Packet) -> Result<ReassemblyEvent> {
        let Some((&block_id, data)) = packet.payload.split_first() else {
            return Err(FpvLinkError::Protocol("Fragment without block id".to_string()));
        };
        let block_offset = block_id as usize * FRAGMENT_MAX_DATA_SIZE;

        match packet.header.packet_type {
            PacketType::InitialHeaderData => {
                let end = self.write(block_offset, data)?;
                self.header_end = self.header_end.max(end);
                if !packet.header.final_block {
                    return Ok(ReassemblyEvent::Stored);
                }
                self.header_len = self.header_end;
                self.header_end = 0;
                self.frame_end = self.header_len;
                self.replicate_header();
                Ok(ReassemblyEvent::HeaderComplete {
                    header_len: self.header_len,
                })
            }
            PacketType::FrameData => {
                let end = self.write(self.header_len + block_offset, data)?;
                self.frame_end = self.frame_end.max(end);
                if !packet.header.final_block {
                    return Ok(ReassemblyEvent::Stored);
                }
                let slot = self.buffers.current();
                let frame_len = self.frame_end;
                self.buffers.lock(slot).len = frame_len;
                self.frame_end = self.header_len;
                Ok(ReassemblyEvent::FrameComplete { slot, frame_len })
            }
            other => Err(FpvLinkError::Protocol(format!(
                "Not a fragment packet: {:?}",
                other
            ))),
        }
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<usize> {
        let end = offset + data.len();
        if end > FRAME_BUFFER_SIZE {
            return Err(FpvLinkError::Protocol(format!(
                "Fragment out of range: {}..{} exceeds {}",
                offset, end, FRAME_BUFFER_SIZE
            )));
        }
        let mut slot = self.buffers.lock(self.buffers.current());
        slot.data[offset..end].copy_from_slice(data);
        Ok(end)
    }

    fn replicate_header(&self) {
        let source = self.buffers.current();
        let src = self.buffers.lock(source);
        for index in (0..FRAME_BUFFER_COUNT).filter(|&i| i != source.0) {
            let mut dst = self.buffers.lock(SlotId(index));
            dst.data[..self.header_len].copy_from_slice(&src.data[..self.header_len]);
            dst.len = self.header_len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::fragment::Fragmenter;
    use std::sync::Arc;

    fn feed(reassembler: &mut Reassembler, packet_type: PacketType, data: &[u8]) -> Vec<ReassemblyEvent> {
        Fragmenter::new(packet_type, data)
            .map(|p| reassembler.accept(&p).unwrap())
            .collect()
    }

    #[test]
    fn test_take_current_toggles() {
        let buffers = FrameBuffers::new();
        assert_eq!(buffers.current(), SlotId(0));
        assert_eq!(buffers.take_current(), SlotId(0));
        assert_eq!(buffers.current(), SlotId(1));
        assert_eq!(buffers.take_current(), SlotId(1));
        assert_eq!(buffers.current(), SlotId(0));
    }

    #[test]
    fn test_header_replicated_into_every_slot() {
        let buffers = Arc::new(FrameBuffers::new());
        let mut reassembler = Reassembler::new(buffers.clone());
        let header: Vec<u8> = (0..600).map(|i| (i % 256) as u8).collect();

        let events = feed(&mut reassembler, PacketType::InitialHeaderData, &header);
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], ReassemblyEvent::HeaderComplete { header_len: 600 });

        for index in 0..FRAME_BUFFER_COUNT {
            let slot = buffers.lock(SlotId(index));
            assert_eq!(&slot.data[..600], header.as_slice());
        }
    }

    #[test]
    fn test_header_then_three_fragments() {
        let buffers = Arc::new(FrameBuffers::new());
        let mut reassembler = Reassembler::new(buffers.clone());
        let header = [0x11u8; 36];
        let scan: Vec<u8> = (0..600).map(|i| (i * 7 % 256) as u8).collect();

        feed(&mut reassembler, PacketType::InitialHeaderData, &header);
        let events = feed(&mut reassembler, PacketType::FrameData, &scan);

        assert_eq!(events.len(), 3);
        let completions: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ReassemblyEvent::FrameComplete { .. }))
            .collect();
        assert_eq!(completions.len(), 1);
        assert_eq!(
            events[2],
            ReassemblyEvent::FrameComplete {
                slot: SlotId(0),
                frame_len: 36 + 600
            }
        );

        let slot = buffers.lock(SlotId(0));
        assert_eq!(slot.len(), 636);
        assert_eq!(&slot.as_bytes()[..36], &header);
        assert_eq!(&slot.as_bytes()[36..], scan.as_slice());
    }

    #[test]
    fn test_next_frame_fills_other_slot() {
        let buffers = Arc::new(FrameBuffers::new());
        let mut reassembler = Reassembler::new(buffers.clone());
        feed(&mut reassembler, PacketType::InitialHeaderData, &[0xAA; 10]);
        feed(&mut reassembler, PacketType::FrameData, &[1; 50]);

        let done = buffers.take_current();
        let events = feed(&mut reassembler, PacketType::FrameData, &[2; 20]);

        assert_eq!(
            events[0],
            ReassemblyEvent::FrameComplete {
                slot: SlotId(1),
                frame_len: 30
            }
        );
        assert_eq!(buffers.lock(done).len(), 60);
        let next = buffers.lock(SlotId(1));
        assert_eq!(&next.as_bytes()[..10], &[0xAA; 10]);
        assert_eq!(&next.as_bytes()[10..], &[2; 20]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let buffers = Arc::new(FrameBuffers::new());
        let mut reassembler = Reassembler::new(buffers);
        let packet = Packet::fragment(PacketType::FrameData, 70, &[0; 100], false).unwrap();

        assert!(reassembler.accept(&packet).is_err());
    }

    #[test]
    fn test_non_fragment_rejected() {
        let mut reassembler = Reassembler::new(Arc::new(FrameBuffers::new()));
        assert!(reassembler.accept(&Packet::with_byte(PacketType::SwitchChannel, 3)).is_err());
        assert!(reassembler.accept(&Packet::control(PacketType::FrameData)).is_err());
    }
}
