//! # Link Packet Format
//!
//! Fixed 4-byte header followed by up to 246 payload bytes, sized to fit a
//! single 250-byte radio frame.
//!
//! ```text
//! +------+-------+-----------+----------+----------------------+
//! | type | flags | data_size | reserved | payload[data_size]   |
//! +------+-------+-----------+----------+----------------------+
//!   u8     u8      u8          u8 (0)
//! flags: bit0 = encrypted, bit1 = final block
//! ```

use crate::error::{FpvLinkError, Result};

/// Largest datagram the radio transport carries
pub const RADIO_MTU: usize = 250;

/// Packet header size on the wire
pub const PACKET_HEADER_SIZE: usize = 4;

/// Largest payload after the header
pub const PACKET_MAX_PAYLOAD_SIZE: usize = RADIO_MTU - PACKET_HEADER_SIZE;

/// Largest image data per fragment (payload minus the block id byte)
pub const FRAGMENT_MAX_DATA_SIZE: usize = PACKET_MAX_PAYLOAD_SIZE - 1;

/// Header flag: payload passed through the encryption gate
pub const FLAG_ENCRYPTED: u8 = 0x01;

/// Header flag: last fragment of a payload
pub const FLAG_FINAL_BLOCK: u8 = 0x02;

/// Ping payload: microsecond timestamp
pub const PING_PAYLOAD_SIZE: usize = 8;

/// Fixed-capacity payload buffer
pub type Payload = heapless::Vec<u8, PACKET_MAX_PAYLOAD_SIZE>;

/// Fixed-capacity encoded datagram
pub type Datagram = heapless::Vec<u8, RADIO_MTU>;

/// Packet type carried in header byte 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Frame received, camera may capture the next one
    Ack = 0,
    /// Negative acknowledgement (reserved)
    Nak = 1,
    /// JPEG header and tables, sent once per session
    InitialHeaderData = 2,
    /// JPEG scan data of one frame
    FrameData = 3,
    /// Generic telemetry (reserved)
    Telemetry = 4,
    /// Round-trip probe, echoed by the camera node
    Ping = 5,
    /// Move both nodes to the channel in payload byte 0
    SwitchChannel = 6,
    /// Camera node TX power in percent, payload byte 0
    TxPowerUpdate = 7,
    /// Camera LED state, payload byte 0
    EnableLed = 8,
}

impl TryFrom<u8> for PacketType {
    type Error = FpvLinkError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Ack,
            1 => Self::Nak,
            2 => Self::InitialHeaderData,
            3 => Self::FrameData,
            4 => Self::Telemetry,
            5 => Self::Ping,
            6 => Self::SwitchChannel,
            7 => Self::TxPowerUpdate,
            8 => Self::EnableLed,
            other => {
                return Err(FpvLinkError::Protocol(format!(
                    "Unknown packet type: 0x{:02X}",
                    other
                )))
            }
        })
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub encrypted: bool,
    pub final_block: bool,
    pub data_size: u8,
}

impl PacketHeader {
    /// Create a header with both flags clear
    ///
    /// # Errors
    ///
    /// Returns a protocol error if `data_size` exceeds [`PACKET_MAX_PAYLOAD_SIZE`].
    pub fn new(packet_type: PacketType, data_size: usize) -> Result<Self> {
        if data_size > PACKET_MAX_PAYLOAD_SIZE {
            return Err(FpvLinkError::Protocol(format!(
                "Payload too large: {} bytes (max {})",
                data_size, PACKET_MAX_PAYLOAD_SIZE
            )));
        }
        Ok(Self {
            packet_type,
            encrypted: false,
            final_block: false,
            data_size: data_size as u8,
        })
    }

    /// Pack into the 4-byte wire form
    pub fn encode(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut flags = 0;
        if self.encrypted {
            flags |= FLAG_ENCRYPTED;
        }
        if self.final_block {
            flags |= FLAG_FINAL_BLOCK;
        }
        [self.packet_type as u8, flags, self.data_size, 0]
    }

    /// Unpack from the first 4 bytes of `bytes`
    ///
    /// # Errors
    ///
    /// Returns a protocol error if fewer than 4 bytes are given, the type is
    /// unknown, or `data_size` exceeds the maximum payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(FpvLinkError::Protocol(format!(
                "Header too short: {} bytes",
                bytes.len()
            )));
        }
        let packet_type = PacketType::try_from(bytes[0])?;
        let data_size = bytes[2];
        if data_size as usize > PACKET_MAX_PAYLOAD_SIZE {
            return Err(FpvLinkError::Protocol(format!(
                "Invalid data size: {}",
                data_size
            )));
        }
        Ok(Self {
            packet_type,
            encrypted: bytes[1] & FLAG_ENCRYPTED != 0,
            final_block: bytes[1] & FLAG_FINAL_BLOCK != 0,
            data_size,
        })
    }

    /// Whole header as one little-endian word, for single-compare checks
    pub fn as_u32(&self) -> u32 {
        u32::from_le_bytes(self.encode())
    }
}

/// One link packet: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Payload,
}

impl Packet {
    /// Build a packet around `payload`
    ///
    /// # Errors
    ///
    /// Returns a protocol error if `payload` exceeds [`PACKET_MAX_PAYLOAD_SIZE`].
    pub fn new(packet_type: PacketType, payload: &[u8]) -> Result<Self> {
        let header = PacketHeader::new(packet_type, payload.len())?;
        let payload = Payload::from_slice(payload)
            .map_err(|_| FpvLinkError::Protocol("Payload too large".to_string()))?;
        Ok(Self { header, payload })
    }

    /// Header-only packet (ACK and friends)
    pub fn control(packet_type: PacketType) -> Self {
        Self {
            header: PacketHeader {
                packet_type,
                encrypted: false,
                final_block: false,
                data_size: 0,
            },
            payload: Payload::new(),
        }
    }

    /// Packet carrying a single argument byte
    pub fn with_byte(packet_type: PacketType, value: u8) -> Self {
        let mut packet = Self::control(packet_type);
        // capacity is never zero, push cannot fail
        let _ = packet.payload.push(value);
        packet.header.data_size = 1;
        packet
    }

    /// Ping carrying the sender's microsecond timestamp
    pub fn ping(timestamp_us: u64) -> Self {
        let mut packet = Self::control(PacketType::Ping);
        let _ = packet.payload.extend_from_slice(&timestamp_us.to_le_bytes());
        packet.header.data_size = PING_PAYLOAD_SIZE as u8;
        packet
    }

    /// Image fragment: block id byte followed by `data`
    ///
    /// # Errors
    ///
    /// Returns a protocol error if `data` exceeds [`FRAGMENT_MAX_DATA_SIZE`].
    pub fn fragment(packet_type: PacketType, block_id: u8, data: &[u8], final_block: bool) -> Result<Self> {
        if data.len() > FRAGMENT_MAX_DATA_SIZE {
            return Err(FpvLinkError::Protocol(format!(
                "Fragment too large: {} bytes (max {})",
                data.len(),
                FRAGMENT_MAX_DATA_SIZE
            )));
        }
        let mut packet = Self::control(packet_type);
        let _ = packet.payload.push(block_id);
        let _ = packet.payload.extend_from_slice(data);
        packet.header.data_size = packet.payload.len() as u8;
        packet.header.final_block = final_block;
        Ok(packet)
    }

    /// Timestamp of a ping packet, if this is one
    pub fn ping_timestamp(&self) -> Option<u64> {
        if self.header.packet_type != PacketType::Ping || self.payload.len() < PING_PAYLOAD_SIZE {
            return None;
        }
        let mut raw = [0u8; PING_PAYLOAD_SIZE];
        raw.copy_from_slice(&self.payload[..PING_PAYLOAD_SIZE]);
        Some(u64::from_le_bytes(raw))
    }

    /// Serialize header and payload into one datagram
    pub fn encode(&self) -> Datagram {
        let mut out = Datagram::new();
        let _ = out.extend_from_slice(&self.header.encode());
        let _ = out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a received datagram
    ///
    /// Trailing bytes past `data_size` are ignored.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for a bad header or a datagram shorter than
    /// its declared payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = PacketHeader::decode(bytes)?;
        let end = PACKET_HEADER_SIZE + header.data_size as usize;
        if bytes.len() < end {
            return Err(FpvLinkError::Protocol(format!(
                "Truncated packet: expected {} bytes, got {}",
                end,
                bytes.len()
            )));
        }
        let payload = Payload::from_slice(&bytes[PACKET_HEADER_SIZE..end])
            .map_err(|_| FpvLinkError::Protocol("Payload too large".to_string()))?;
        Ok(Self { header, payload })
    }

    /// Encoded size in bytes
    pub fn wire_len(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_constants() {
        assert_eq!(PACKET_MAX_PAYLOAD_SIZE, 246);
        assert_eq!(FRAGMENT_MAX_DATA_SIZE, 245);
    }

    #[test]
    fn test_header_round_trip() {
        let header = PacketHeader {
            packet_type: PacketType::FrameData,
            encrypted: true,
            final_block: false,
            data_size: 200,
        };
        let bytes = header.encode();
        assert_eq!(bytes, [3, FLAG_ENCRYPTED, 200, 0]);
        assert_eq!(PacketHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_size_boundaries() {
        for size in [0usize, PACKET_MAX_PAYLOAD_SIZE] {
            let mut header = PacketHeader::new(PacketType::InitialHeaderData, size).unwrap();
            header.final_block = true;
            let decoded = PacketHeader::decode(&header.encode()).unwrap();
            assert_eq!(decoded, header);
            assert_eq!(decoded.data_size as usize, size);
        }
        assert!(PacketHeader::new(PacketType::FrameData, PACKET_MAX_PAYLOAD_SIZE + 1).is_err());
    }

    #[test]
    fn test_header_rejects_oversize_field() {
        assert!(PacketHeader::decode(&[3, 0, 247, 0]).is_err());
    }

    #[test]
    fn test_header_rejects_unknown_type() {
        let err = PacketHeader::decode(&[0x42, 0, 0, 0]).unwrap_err();
        assert!(err.to_string().contains("0x42"));
    }

    #[test]
    fn test_header_as_u32() {
        let ack = Packet::control(PacketType::Ack);
        assert_eq!(ack.header.as_u32(), 0);

        let mut header = PacketHeader::new(PacketType::Ping, 8).unwrap();
        header.final_block = true;
        assert_eq!(header.as_u32(), 0x0008_0205);
    }

    #[test]
    fn test_ping_timestamp() {
        let ping = Packet::ping(1_234_567_890);
        assert_eq!(ping.header.data_size, 8);
        let decoded = Packet::decode(&ping.encode()).unwrap();
        assert_eq!(decoded.ping_timestamp(), Some(1_234_567_890));

        assert_eq!(Packet::control(PacketType::Ack).ping_timestamp(), None);
    }

    #[test]
    fn test_fragment_layout() {
        let packet = Packet::fragment(PacketType::FrameData, 7, &[1, 2, 3], true).unwrap();
        assert_eq!(packet.encode().as_slice(), &[3, FLAG_FINAL_BLOCK, 4, 0, 7, 1, 2, 3]);
        assert_eq!(packet.wire_len(), 8);
    }

    #[test]
    fn test_fragment_too_large() {
        let data = [0u8; FRAGMENT_MAX_DATA_SIZE + 1];
        assert!(Packet::fragment(PacketType::FrameData, 0, &data, false).is_err());
    }

    #[test]
    fn test_decode_truncated() {
        assert!(Packet::decode(&[PacketType::SwitchChannel as u8, 0, 1, 0]).is_err());
        let packet = Packet::decode(&[PacketType::SwitchChannel as u8, 0, 1, 0, 11, 99]).unwrap();
        assert_eq!(packet.payload.as_slice(), &[11]);
    }
}
