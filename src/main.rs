//! # FPV Link
//!
//! Runs the camera node and the receiver node in one process over a
//! loopback radio.
//!
//! The camera replays a test pattern; the receiver decodes it and reports
//! tiles and OSD text through the log.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fpv_link::camera::{Camera, ReplayCamera};
use fpv_link::config::Config;
use fpv_link::crypto::cipher::DynEncryptionGate;
use fpv_link::crypto::pairing::format_mac;
use fpv_link::crypto::{Aes128Cipher, BlockCipher, EncryptionGate, FileKeyStorage, KeyManager, PairingRole};
use fpv_link::display::{spawn_display_task, LogDisplay, Osd};
use fpv_link::link::{
    event_channel, register_store_events, spawn_frame_stats, spawn_net_stats, spawn_transmitter, spawn_watchdog,
    CameraTask, EventDispatcher, ForceUpdateWatchdog, FrameCredits, FrameStats, ImageTask, LinkClock, LinkCounters,
    RxParser, TxParser,
};
use fpv_link::protocol::{FrameBuffers, Reassembler};
use fpv_link::radio::power::percent_to_quarter_dbm;
use fpv_link::radio::{loopback_pair, LinkSender, RadioDriver};
use fpv_link::scanner::{channel_count_for_country, ChannelScanner, SimulatedScanDriver};
use fpv_link::serial::{open_pairing_port, TokioSerialPort};
use fpv_link::store::ObservableStore;
use fpv_link::telemetry::{spawn_telemetry, TelemetryLogger};

/// Configuration used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Frame the camera node replays
const TEST_PATTERN_PATH: &str = "assets/test_pattern_qvga.jpg";

/// Locally administered MACs of the two loopback radios
const RECEIVER_MAC: [u8; 6] = [0x02, 0x46, 0x50, 0x56, 0x00, 0x01];
const CAMERA_MAC: [u8; 6] = [0x02, 0x46, 0x50, 0x56, 0x00, 0x02];

/// RSSI the receiver sees for the camera's frames
const DEMO_LINK_RSSI: i8 = -61;

/// Inbound queue depth of each loopback radio
const RADIO_QUEUE_SIZE: usize = 64;

/// Load the configuration from `path`, or the defaults when the default
/// file is absent
fn load_config(path: Option<String>) -> Result<Config> {
    match path {
        Some(path) => Config::load(&path).with_context(|| format!("Failed to load config from {}", path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load(DEFAULT_CONFIG_PATH).with_context(|| format!("Failed to load {}", DEFAULT_CONFIG_PATH))
        }
        None => Ok(Config::default()),
    }
}

/// Console logging plus a daily log file when telemetry is enabled
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());

    let (file_layer, guard) = if config.telemetry.enabled {
        let appender = tracing_appender::rolling::daily(&config.telemetry.log_dir, "fpv-link.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

/// Main entry point
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration and set up logging
///    - Load the link keys, or pair over serial when requested
///    - Create the loopback radio pair and the receiver's value store
///    - Scan for the quietest channel when enabled
///
/// 2. **Receiver node**
///    - RX parser, event dispatcher and network statistics timer
///    - Image task, display task and OSD
///
/// 3. **Camera node**
///    - TX parser, camera task, transmitter and force-update watchdog
///
/// 4. **Shutdown** on Ctrl+C
///
/// # Errors
///
/// Returns error if:
/// - The configuration is invalid
/// - Key storage or pairing fails
/// - The test pattern cannot be read
/// - The channel scan fails
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(std::env::args().nth(1))?;
    let _log_guard = init_logging(&config);

    info!("FPV Link v{} starting...", env!("CARGO_PKG_VERSION"));

    // Both nodes share the one key blob
    let keys = KeyManager::new(FileKeyStorage::new(&config.pairing.storage_dir), &config.pairing);
    let pairing = if config.pairing.pair_on_boot {
        let mut port = open_pairing_port(&config.pairing.serial_port, config.pairing.baud_rate)?;
        keys.load_or_pair(true, Some(&mut port), PairingRole::Initiator, RECEIVER_MAC)
            .await?
    } else {
        keys.load_or_pair::<TokioSerialPort>(false, None, PairingRole::Initiator, RECEIVER_MAC)
            .await?
    };
    info!("Link keys ready, peer {}", format_mac(&pairing.peer_mac));
    let cipher: Box<dyn BlockCipher> = Box::new(Aes128Cipher::new(&pairing.aes_key));
    let gate: Arc<DynEncryptionGate> = Arc::new(EncryptionGate::new(cipher));

    let ((rx_radio, rx_radio_events), (cam_radio, cam_radio_events)) =
        loopback_pair((RECEIVER_MAC, CAMERA_MAC), config.radio.channel, RADIO_QUEUE_SIZE);
    cam_radio.set_link_rssi(DEMO_LINK_RSSI);
    rx_radio.set_max_tx_power(percent_to_quarter_dbm(config.radio.tx_power_1))?;
    cam_radio.set_max_tx_power(percent_to_quarter_dbm(config.radio.tx_power_2))?;

    // Receiver node
    let store = Arc::new(ObservableStore::with_receiver_defaults(
        &config.store,
        config.radio.channel,
        config.radio.tx_power_1,
        config.radio.tx_power_2,
    )?);
    let (events, events_rx) = event_channel(
        config.link.event_queue_size,
        Duration::from_millis(config.link.event_send_timeout_ms),
    );
    register_store_events(&store, events.clone())?;

    let frame_stats = Arc::new(FrameStats::new());
    let osd = Osd::new(LogDisplay::new("osd"), store.clone(), frame_stats.clone())?;
    tokio::spawn(osd.run(Duration::from_millis(config.osd.update_interval_ms)));
    store.spawn_notifier(Duration::from_millis(config.store.poll_interval_ms));

    if config.radio.scan_on_boot {
        let driver = SimulatedScanDriver::urban(channel_count_for_country(&config.radio.country))
            .with_dwell(Duration::from_millis(100));
        let scanner = ChannelScanner::new(driver, config.scanner.neighbor_coefficient);
        let channel = scanner
            .scan_for_best_channel(&store)
            .await
            .context("Channel scan failed")?;
        info!("Scan picked channel {}", channel);
    }

    let rx_driver: Arc<dyn RadioDriver> = rx_radio.clone();
    let rx_sender = LinkSender::new(rx_driver, Some(gate.clone()));
    let buffers = Arc::new(FrameBuffers::new());
    let frame_ready = Arc::new(Notify::new());
    let counters = Arc::new(LinkCounters::default());
    let clock = LinkClock::new();

    let rx_parser = RxParser::new(
        Reassembler::new(buffers.clone()),
        rx_sender.clone(),
        store.clone(),
        events.clone(),
        frame_ready.clone(),
        counters.clone(),
        clock,
    );
    tokio::spawn(rx_parser.run(rx_radio_events));

    let dispatcher = EventDispatcher::new(
        rx_sender,
        store.clone(),
        counters,
        clock,
        Duration::from_millis(config.link.channel_switch_settle_ms),
    );
    tokio::spawn(dispatcher.run(events_rx));
    spawn_net_stats(events.clone(), Duration::from_millis(config.link.net_stats_interval_ms));

    let (tiles_tx, tiles_rx) = mpsc::channel(config.decoder.tile_queue_size);
    spawn_display_task(LogDisplay::new("video"), tiles_rx);
    let image = ImageTask::new(
        buffers,
        frame_ready,
        events,
        config.decoder.pool_size,
        tiles_tx,
        frame_stats.clone(),
    );
    tokio::spawn(image.run());
    spawn_frame_stats(frame_stats.clone(), Duration::from_millis(config.decoder.stats_interval_ms));

    // Camera node
    let camera: Arc<dyn Camera> = Arc::new(
        ReplayCamera::from_file(TEST_PATTERN_PATH)
            .with_context(|| format!("Failed to load {}", TEST_PATTERN_PATH))?,
    );
    let cam_driver: Arc<dyn RadioDriver> = cam_radio.clone();
    let cam_sender = LinkSender::new(cam_driver, Some(gate));
    let credits = Arc::new(FrameCredits::new(config.camera.max_frame_credits));
    let watchdog = Arc::new(ForceUpdateWatchdog::new(Duration::from_millis(
        config.camera.initial_force_update_ms,
    )));

    let tx_parser = TxParser::new(
        cam_sender.clone(),
        credits.clone(),
        watchdog.clone(),
        camera.clone(),
        Duration::from_millis(config.camera.force_update_ms),
    );
    tokio::spawn(tx_parser.run(cam_radio_events));
    spawn_watchdog(watchdog.clone(), credits.clone());

    let (packets_tx, packets_rx) = mpsc::channel(config.link.packet_queue_size);
    spawn_transmitter(cam_sender, packets_rx);
    let camera_task = CameraTask::new(camera, credits, watchdog, packets_tx);
    tokio::spawn(async move {
        if let Err(e) = camera_task.run().await {
            error!("Camera node stopped: {}", e);
        }
    });

    if config.telemetry.enabled {
        match TelemetryLogger::new(&config.telemetry) {
            Ok(logger) => {
                spawn_telemetry(
                    logger,
                    store.clone(),
                    frame_stats.clone(),
                    Duration::from_millis(config.telemetry.log_interval_ms),
                );
            }
            Err(e) => warn!("Telemetry logging disabled: {}", e),
        }
    }

    info!("Link running on channel {}", rx_radio.channel());
    info!("Press Ctrl+C to exit");

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    info!(
        "Frames decoded: {}, datagrams delivered: {} / {}, dropped: {} / {}",
        frame_stats.total_frames(),
        cam_radio.delivered(),
        rx_radio.delivered(),
        cam_radio.dropped(),
        rx_radio.dropped(),
    );

    Ok(())
}
