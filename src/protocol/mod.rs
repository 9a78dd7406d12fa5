//! # Link Protocol
//!
//! Datagram format shared by both nodes and the fragmentation scheme that
//! carries JPEG frames across the 250-byte radio MTU.
//!
//! ## Architecture
//!
//! ```text
//! camera frame ──▶ Fragmenter ──▶ [Packet; n] ──▶ radio ──▶ Reassembler ──▶ FrameBuffers
//! ```

pub mod fragment;
pub mod packet;
pub mod reassembly;

pub use fragment::{fragment_count, Fragmenter};
pub use packet::{
    Packet, PacketHeader, PacketType, FRAGMENT_MAX_DATA_SIZE, PACKET_HEADER_SIZE,
    PACKET_MAX_PAYLOAD_SIZE, RADIO_MTU,
};
pub use reassembly::{FrameBuffers, Reassembler, ReassemblyEvent, SlotId};
