//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, and so does every section, so an empty file
//! is a valid configuration equal to [`Config::default`].

use serde::de::Error;
use serde::Deserialize;
use std::fmt::Display;
use std::fs;
use std::path::Path;

use crate::error::{FpvLinkError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub osd: OsdConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Radio configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    /// Boot channel, used when no scan runs
    #[serde(default = "default_channel")]
    pub channel: u8,

    /// Regulatory domain, decides the channel count
    #[serde(default = "default_country")]
    pub country: String,

    /// Receiver node TX power in percent
    #[serde(default = "default_tx_power")]
    pub tx_power_1: u8,

    /// Camera node TX power in percent
    #[serde(default = "default_tx_power")]
    pub tx_power_2: u8,

    #[serde(default)]
    pub scan_on_boot: bool,
}

/// Link state machine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,

    /// How long a producer waits for room in the event queue
    #[serde(default = "default_event_send_timeout_ms")]
    pub event_send_timeout_ms: u64,

    #[serde(default = "default_packet_queue_size")]
    pub packet_queue_size: usize,

    #[serde(default = "default_net_stats_interval_ms")]
    pub net_stats_interval_ms: u64,

    /// Pause between announcing a channel switch and applying it
    #[serde(default = "default_channel_switch_settle_ms")]
    pub channel_switch_settle_ms: u64,
}

/// Camera node configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_max_frame_credits")]
    pub max_frame_credits: usize,

    /// Watchdog period until the first channel switch
    #[serde(default = "default_initial_force_update_ms")]
    pub initial_force_update_ms: u64,

    /// Watchdog period after a channel switch
    #[serde(default = "default_force_update_ms")]
    pub force_update_ms: u64,
}

/// Channel scanner configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    /// Share of a neighbour channel's noise added to a channel's weight
    #[serde(default = "default_neighbor_coefficient")]
    pub neighbor_coefficient: f32,
}

/// JPEG decode pipeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DecoderConfig {
    /// Work pool for decoder tables and stream buffer
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_tile_queue_size")]
    pub tile_queue_size: usize,

    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

/// On-screen display configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OsdConfig {
    #[serde(default = "default_osd_update_interval_ms")]
    pub update_interval_ms: u64,
}

/// Observable value store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    #[serde(default = "default_max_callbacks")]
    pub max_callbacks: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Pairing and key storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PairingConfig {
    /// Pairing pin level at boot
    #[serde(default)]
    pub pair_on_boot: bool,

    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_key_name")]
    pub key: String,

    #[serde(default = "default_pairing_port")]
    pub serial_port: String,

    #[serde(default = "default_pairing_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_channel() -> u8 { 6 }
fn default_country() -> String { "GB".to_string() }
fn default_tx_power() -> u8 { 60 }

fn default_event_queue_size() -> usize { 32 }
fn default_event_send_timeout_ms() -> u64 { 5 }
fn default_packet_queue_size() -> usize { 32 }
fn default_net_stats_interval_ms() -> u64 { 1000 }
fn default_channel_switch_settle_ms() -> u64 { 50 }

fn default_max_frame_credits() -> usize { 5 }
fn default_initial_force_update_ms() -> u64 { 60_000 }
fn default_force_update_ms() -> u64 { 100 }

fn default_neighbor_coefficient() -> f32 { 0.75 }

fn default_pool_size() -> usize { 3100 }
fn default_tile_queue_size() -> usize { 32 }
fn default_stats_interval_ms() -> u64 { 1000 }

fn default_osd_update_interval_ms() -> u64 { 500 }

fn default_max_items() -> usize { 64 }
fn default_max_callbacks() -> usize { 5 }
fn default_poll_interval_ms() -> u64 { 100 }

fn default_storage_dir() -> String { "./keys".to_string() }
fn default_namespace() -> String { "storage".to_string() }
fn default_key_name() -> String { "sync_keys".to_string() }
fn default_pairing_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_pairing_baud_rate() -> u32 { 9600 }
fn default_response_timeout_ms() -> u64 { 2000 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 1000 }
fn default_log_format() -> String { "jsonl".to_string() }

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            country: default_country(),
            tx_power_1: default_tx_power(),
            tx_power_2: default_tx_power(),
            scan_on_boot: false,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            event_queue_size: default_event_queue_size(),
            event_send_timeout_ms: default_event_send_timeout_ms(),
            packet_queue_size: default_packet_queue_size(),
            net_stats_interval_ms: default_net_stats_interval_ms(),
            channel_switch_settle_ms: default_channel_switch_settle_ms(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            max_frame_credits: default_max_frame_credits(),
            initial_force_update_ms: default_initial_force_update_ms(),
            force_update_ms: default_force_update_ms(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            neighbor_coefficient: default_neighbor_coefficient(),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            tile_queue_size: default_tile_queue_size(),
            stats_interval_ms: default_stats_interval_ms(),
        }
    }
}

impl Default for OsdConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_osd_update_interval_ms(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_callbacks: default_max_callbacks(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            pair_on_boot: false,
            storage_dir: default_storage_dir(),
            namespace: default_namespace(),
            key: default_key_name(),
            serial_port: default_pairing_port(),
            baud_rate: default_pairing_baud_rate(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            log_interval_ms: default_log_interval_ms(),
            format: default_log_format(),
        }
    }
}

fn config_error(msg: impl Display) -> FpvLinkError {
    FpvLinkError::Config(toml::de::Error::custom(msg))
}

fn check_interval(name: &str, value: u64, max: u64) -> Result<()> {
    if value == 0 || value > max {
        return Err(config_error(format!("{} must be between 1 and {}", name, max)));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fpv_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Radio
        if self.radio.channel == 0 || self.radio.channel > 14 {
            return Err(config_error("radio channel must be between 1 and 14"));
        }
        if self.radio.country.len() != 2 {
            return Err(config_error("radio country must be a two-letter code"));
        }
        for (name, value) in [("tx_power_1", self.radio.tx_power_1), ("tx_power_2", self.radio.tx_power_2)] {
            if value == 0 || value > 100 {
                return Err(config_error(format!("{} must be between 1 and 100", name)));
            }
        }

        // Link
        if self.link.event_queue_size == 0 || self.link.packet_queue_size == 0 {
            return Err(config_error("link queue sizes must be greater than 0"));
        }
        if self.link.event_send_timeout_ms > 1000 {
            return Err(config_error("event_send_timeout_ms must be at most 1000"));
        }
        check_interval("net_stats_interval_ms", self.link.net_stats_interval_ms, 60_000)?;
        if self.link.channel_switch_settle_ms > 10_000 {
            return Err(config_error("channel_switch_settle_ms must be at most 10000"));
        }

        // Camera
        if self.camera.max_frame_credits == 0 || self.camera.max_frame_credits > 32 {
            return Err(config_error("max_frame_credits must be between 1 and 32"));
        }
        check_interval("initial_force_update_ms", self.camera.initial_force_update_ms, 600_000)?;
        check_interval("force_update_ms", self.camera.force_update_ms, 600_000)?;

        // Scanner
        if !(0.0..=1.0).contains(&self.scanner.neighbor_coefficient) {
            return Err(config_error("neighbor_coefficient must be between 0.0 and 1.0"));
        }

        // Decoder
        if self.decoder.pool_size < crate::jpeg::SEGMENT_BUFFER_SIZE {
            return Err(config_error(format!(
                "decoder pool_size must be at least {}",
                crate::jpeg::SEGMENT_BUFFER_SIZE
            )));
        }
        if self.decoder.tile_queue_size == 0 {
            return Err(config_error("tile_queue_size must be greater than 0"));
        }
        check_interval("stats_interval_ms", self.decoder.stats_interval_ms, 60_000)?;

        check_interval("osd update_interval_ms", self.osd.update_interval_ms, 60_000)?;

        // Store
        if self.store.max_items == 0 || self.store.max_callbacks == 0 {
            return Err(config_error("store max_items and max_callbacks must be greater than 0"));
        }
        check_interval("poll_interval_ms", self.store.poll_interval_ms, 10_000)?;

        // Pairing
        if self.pairing.storage_dir.is_empty() || self.pairing.namespace.is_empty() || self.pairing.key.is_empty() {
            return Err(config_error("pairing storage_dir, namespace and key cannot be empty"));
        }
        if self.pairing.pair_on_boot && self.pairing.serial_port.is_empty() {
            return Err(config_error("pairing serial_port cannot be empty when pair_on_boot is set"));
        }
        if self.pairing.baud_rate == 0 {
            return Err(config_error("pairing baud_rate must be greater than 0"));
        }
        check_interval("response_timeout_ms", self.pairing.response_timeout_ms, 60_000)?;

        // Telemetry
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(config_error("telemetry log_dir cannot be empty when enabled"));
        }
        check_interval("log_interval_ms", self.telemetry.log_interval_ms, 60_000)?;
        if self.telemetry.max_records_per_file == 0 {
            return Err(config_error("max_records_per_file must be greater than 0"));
        }
        if self.telemetry.max_files_to_keep == 0 {
            return Err(config_error("max_files_to_keep must be greater than 0"));
        }
        if self.telemetry.format != "jsonl" {
            return Err(config_error("log format must be 'jsonl' (only supported format)"));
        }

        Ok(())
    }
}
