//! # FPV Link Library
//!
//! Low-latency digital FPV video over a connectionless 2.4 GHz datagram radio.
//!
//! A camera node streams JPEG frames, fragmented to fit the 250-byte radio
//! MTU, to a receiver node that reassembles and decodes them tile by tile.
//! The receiver also runs the link: channel selection, TX power, and RTT and
//! RSSI statistics, all over the same packet protocol.

pub mod camera;
pub mod config;
pub mod crypto;
pub mod display;
pub mod error;
pub mod jpeg;
pub mod link;
pub mod protocol;
pub mod radio;
pub mod scanner;
pub mod serial;
pub mod store;
pub mod telemetry;
