//! Telemetry record types

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::link::FrameStats;
use crate::store::{ObservableStore, ValueId};

/// One line of the telemetry log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// RFC3339 UTC timestamp
    pub timestamp: String,
    pub channel: u8,
    /// Link RSSI in dBm
    pub rssi: i32,
    pub rtt_ms: u32,
    /// Received bytes per second
    pub rx_rate: u32,
    pub fps: u32,
    pub frame_time_ms: u32,
}

impl TelemetryRecord {
    /// Snapshot the link statistics as of now
    pub fn capture(store: &ObservableStore, stats: &FrameStats) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            channel: store.get(ValueId::CurrentChannel).min(u8::MAX as u32) as u8,
            rssi: store.get_i32(ValueId::RxRssi),
            rtt_ms: store.get(ValueId::RttValue),
            rx_rate: store.get(ValueId::DataRxRate),
            fps: stats.fps(),
            frame_time_ms: stats.avg_frame_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use std::time::Duration;

    #[test]
    fn test_capture_reads_store_and_stats() {
        let store = ObservableStore::with_receiver_defaults(&StoreConfig::default(), 4, 60, 60).unwrap();
        store.set(ValueId::RttValue, 12).unwrap();
        store.set(ValueId::DataRxRate, 190_000).unwrap();
        let stats = FrameStats::new();
        stats.record(Duration::from_millis(11));
        stats.roll();

        let record = TelemetryRecord::capture(&store, &stats);

        assert_eq!(record.channel, 4);
        assert_eq!(record.rssi, -98);
        assert_eq!(record.rtt_ms, 12);
        assert_eq!(record.rx_rate, 190_000);
        assert_eq!(record.fps, 1);
        assert_eq!(record.frame_time_ms, 11);
        assert!(chrono::DateTime::parse_from_rfc3339(&record.timestamp).is_ok());
    }

    #[test]
    fn test_serializes_as_flat_object() {
        let record = TelemetryRecord {
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            channel: 6,
            rssi: -61,
            rtt_ms: 9,
            rx_rate: 1024,
            fps: 24,
            frame_time_ms: 11,
        };

        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["channel"], 6);
        assert_eq!(json["rssi"], -61);
        assert_eq!(json["frame_time_ms"], 11);
    }
}
