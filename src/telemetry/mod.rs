//! # Telemetry Module
//!
//! Periodic link statistics written as JSON Lines.
//!
//! This module handles:
//! - Sampling channel, RSSI, RTT, data rate and decode statistics
//! - Writing to rotating log files
//! - Managing file rotation (max N records per file)
//! - Retaining only last M files

pub mod logger;
pub mod types;

pub use logger::{spawn_telemetry, TelemetryLogger};
pub use types::TelemetryRecord;
