//! # Link-Quality Sniffer
//!
//! The radio reports RSSI only for raw management frames, so link quality
//! is taken from the vendor-specific action frames that carry our datagrams.
//!
//! ## Frame Layout
//!
//! ```text
//! offset  0  frame control (2) | duration (2) | addr1 (6) | addr2 (6) | addr3 (6) | seq (2)
//! offset 24  category = 0x7f (vendor specific)
//! offset 25  OUI (3) | random (4)
//! offset 32  element id = 221 | length | OUI (3)
//! offset 37  vendor type = 4 | version
//! offset 39  body
//! ```

use tracing::trace;

/// Offset of the action category byte
pub const CATEGORY_OFFSET: usize = 24;

/// Vendor-specific action category
pub const CATEGORY_VENDOR_SPECIFIC: u8 = 0x7f;

/// Offset of the vendor element id
pub const ELEMENT_ID_OFFSET: usize = 32;

/// Vendor-specific information element id
pub const VENDOR_ELEMENT_ID: u8 = 221;

/// Offset of the vendor type byte
pub const VENDOR_TYPE_OFFSET: usize = 37;

/// Vendor type of link datagrams
pub const VENDOR_TYPE_LINK: u8 = 4;

/// Offset of the frame body
pub const BODY_OFFSET: usize = 39;

/// RSSI reported before the first frame is seen, in dBm
pub const DEFAULT_RSSI: i8 = -98;

const VENDOR_OUI: [u8; 3] = [0x18, 0xfe, 0x34];

/// Whether `frame` is a vendor action frame carrying a link datagram
pub fn is_link_frame(frame: &[u8]) -> bool {
    frame.len() > VENDOR_TYPE_OFFSET
        && frame[CATEGORY_OFFSET] == CATEGORY_VENDOR_SPECIFIC
        && frame[ELEMENT_ID_OFFSET] == VENDOR_ELEMENT_ID
        && frame[VENDOR_TYPE_OFFSET] == VENDOR_TYPE_LINK
}

/// Wrap `body` in a vendor action frame from `src` to `dst`
pub fn build_link_frame(src: [u8; 6], dst: [u8; 6], body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(BODY_OFFSET + body.len());
    frame.extend_from_slice(&[0xd0, 0x00, 0x00, 0x00]);
    frame.extend_from_slice(&dst);
    frame.extend_from_slice(&src);
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(&[0xc0, 0x44]);
    frame.push(CATEGORY_VENDOR_SPECIFIC);
    frame.extend_from_slice(&VENDOR_OUI);
    frame.extend_from_slice(&[0xa9, 0x8c, 0xe3, 0xfd]);
    frame.push(VENDOR_ELEMENT_ID);
    frame.push(body.len().min(u8::MAX as usize) as u8);
    frame.extend_from_slice(&VENDOR_OUI);
    frame.push(VENDOR_TYPE_LINK);
    frame.push(0x01);
    frame.extend_from_slice(body);
    frame
}

/// Tracks the RSSI of sniffed link frames
#[derive(Debug, Clone)]
pub struct RssiSniffer {
    last_rssi: i8,
}

impl Default for RssiSniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RssiSniffer {
    pub fn new() -> Self {
        Self {
            last_rssi: DEFAULT_RSSI,
        }
    }

    pub fn last_rssi(&self) -> i8 {
        self.last_rssi
    }

    /// Inspect one sniffed frame
    ///
    /// # Returns
    ///
    /// The new RSSI if `frame` is a link frame and its RSSI differs from
    /// the last one seen, `None` otherwise
    pub fn observe(&mut self, frame: &[u8], rssi: i8) -> Option<i8> {
        if !is_link_frame(frame) || rssi == self.last_rssi {
            return None;
        }
        trace!("Link RSSI {} -> {} dBm", self.last_rssi, rssi);
        self.last_rssi = rssi;
        Some(rssi)
    }
}
