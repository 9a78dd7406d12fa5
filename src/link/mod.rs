//! # Link Nodes
//!
//! Task-level behaviour of the two link endpoints.
//!
//! This module handles:
//! - The receiver event queue and its dispatcher
//! - RX parsing on both nodes
//! - Frame decoding and decode statistics on the receiver
//! - Frame pacing, capture and transmission on the camera node

pub mod events;
pub mod image;
pub mod receiver;
pub mod transmitter;

pub use events::{event_channel, EventSender, LinkEvent};
pub use image::{spawn_frame_stats, FrameStats, ImageTask};
pub use receiver::{register_store_events, spawn_net_stats, EventDispatcher, LinkClock, LinkCounters, RxParser};
pub use transmitter::{
    find_scan_offset, spawn_transmitter, spawn_watchdog, CameraTask, ForceUpdateWatchdog, FrameCredits,
    OutboundPacket, TxParser,
};
