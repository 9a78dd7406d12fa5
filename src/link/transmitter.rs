//! # Camera Node Link
//!
//! Frame pacing, RX parsing and transmission for the node that owns the camera.
//!
//! ## Frame Pacing
//!
//! ```text
//! ACK ──────────────────┐
//! watchdog expiry ──────┴─▶ FrameCredits ──▶ camera task ──▶ packet queue ──▶ transmitter task
//! ```
//!
//! Every ACK from the receiver releases one frame. If no ACK arrives before
//! the watchdog expires, the watchdog releases one instead so a lost ACK
//! never stalls the video.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::camera::Camera;
use crate::error::{FpvLinkError, Result};
use crate::protocol::{Fragmenter, Packet, PacketType};
use crate::radio::power::percent_to_quarter_dbm;
use crate::radio::{LinkSender, RadioEvent};

/// Counting permit gating frame captures
#[derive(Debug)]
pub struct FrameCredits {
    permits: Semaphore,
    max: usize,
}

impl FrameCredits {
    /// Empty credit pool holding at most `max` credits
    pub fn new(max: usize) -> Self {
        Self {
            permits: Semaphore::new(0),
            max,
        }
    }

    /// Release one frame; a full pool ignores the grant
    pub fn grant(&self) {
        if self.permits.available_permits() < self.max {
            self.permits.add_permits(1);
        }
    }

    /// Wait for and consume one credit
    pub async fn take(&self) -> Result<()> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FpvLinkError::Transport("Frame credits closed".to_string()))?;
        permit.forget();
        Ok(())
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Timer granting a frame credit when no ACK arrives in time
///
/// The watchdog is dormant until [`start`](Self::start) or the first
/// [`reset`](Self::reset).
#[derive(Debug)]
pub struct ForceUpdateWatchdog {
    period_ms: AtomicU64,
    running: AtomicBool,
    kick: Notify,
}

impl ForceUpdateWatchdog {
    pub fn new(period: Duration) -> Self {
        Self {
            period_ms: AtomicU64::new(period.as_millis() as u64),
            running: AtomicBool::new(false),
            kick: Notify::new(),
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        self.kick.notify_one();
    }

    /// Restart the countdown, starting a dormant watchdog
    pub fn reset(&self) {
        self.start();
    }

    /// Change the period and restart the countdown
    pub fn set_period(&self, period: Duration) {
        self.period_ms
            .store(period.as_millis() as u64, Ordering::Release);
        self.start();
    }
}

/// Spawn the watchdog timer feeding `credits`
pub fn spawn_watchdog(watchdog: Arc<ForceUpdateWatchdog>, credits: Arc<FrameCredits>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if !watchdog.is_running() {
                watchdog.kick.notified().await;
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(watchdog.period()) => {
                    trace!("No ACK within {:?}, forcing a frame", watchdog.period());
                    credits.grant();
                }
                _ = watchdog.kick.notified() => {}
            }
        }
    })
}

/// Packet waiting for the transmitter task
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    pub packet: Packet,
    pub encrypt: bool,
}

/// Parses everything the radio delivers to the camera node
pub struct TxParser {
    sender: LinkSender,
    credits: Arc<FrameCredits>,
    watchdog: Arc<ForceUpdateWatchdog>,
    camera: Arc<dyn Camera>,
    force_update: Duration,
}

impl TxParser {
    /// # Arguments
    ///
    /// * `sender` - Sender for ping echoes, also the radio to reconfigure
    /// * `credits` - Frame credits released by ACKs
    /// * `watchdog` - Force-update watchdog
    /// * `camera` - Camera whose LED the receiver may drive
    /// * `force_update` - Watchdog period after the first channel switch
    pub fn new(
        sender: LinkSender,
        credits: Arc<FrameCredits>,
        watchdog: Arc<ForceUpdateWatchdog>,
        camera: Arc<dyn Camera>,
        force_update: Duration,
    ) -> Self {
        Self {
            sender,
            credits,
            watchdog,
            camera,
            force_update,
        }
    }

    /// Handle one radio event
    ///
    /// # Errors
    ///
    /// Returns the driver error of a failed echo or reconfiguration.
    pub async fn handle(&mut self, event: RadioEvent) -> Result<()> {
        let RadioEvent::Datagram(bytes) = event else {
            return Ok(());
        };
        let mut packet = match Packet::decode(&bytes) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Unparseable datagram: {}", e);
                return Ok(());
            }
        };
        if !self.sender.open(&mut packet) {
            debug!("Cannot decrypt {:?} packet", packet.header.packet_type);
            return Ok(());
        }

        match packet.header.packet_type {
            PacketType::Ack => {
                self.watchdog.reset();
                self.credits.grant();
            }
            PacketType::Ping => self.sender.send(packet, false).await?,
            PacketType::SwitchChannel => {
                let channel = first_byte(&packet)?;
                let radio = self.sender.radio();
                radio.set_channel(channel)?;
                radio.modify_peer_channel(channel)?;
                self.watchdog.set_period(self.force_update);
                info!("Following receiver to channel {}", channel);
            }
            PacketType::TxPowerUpdate => {
                let percent = first_byte(&packet)?;
                self.sender
                    .radio()
                    .set_max_tx_power(percent_to_quarter_dbm(percent))?;
                debug!("TX power {}%", percent);
            }
            PacketType::EnableLed => self.camera.set_led(first_byte(&packet)? != 0)?,
            other => trace!("Ignoring {:?} packet", other),
        }
        Ok(())
    }

    /// Parse radio events until the radio goes away
    pub async fn run(mut self, mut radio_events: mpsc::Receiver<RadioEvent>) {
        debug!("TX parser started");
        while let Some(event) = radio_events.recv().await {
            if let Err(e) = self.handle(event).await {
                debug!("Packet handling failed: {}", e);
            }
        }
        debug!("Radio event queue closed, TX parser exiting");
    }
}

fn first_byte(packet: &Packet) -> Result<u8> {
    packet.payload.first().copied().ok_or_else(|| {
        FpvLinkError::Protocol(format!("Empty {:?} packet", packet.header.packet_type))
    })
}

/// Offset just past the first SOS marker (`FF DA`) of a JPEG frame
///
/// Everything before it is the header the receiver keeps for every frame.
pub fn find_scan_offset(frame: &[u8]) -> Option<usize> {
    frame.windows(2).position(|w| w == [0xFF, 0xDA]).map(|i| i + 2)
}

/// Camera capture loop
pub struct CameraTask {
    camera: Arc<dyn Camera>,
    credits: Arc<FrameCredits>,
    watchdog: Arc<ForceUpdateWatchdog>,
    packets: mpsc::Sender<OutboundPacket>,
    header_len: usize,
}

impl CameraTask {
    pub fn new(
        camera: Arc<dyn Camera>,
        credits: Arc<FrameCredits>,
        watchdog: Arc<ForceUpdateWatchdog>,
        packets: mpsc::Sender<OutboundPacket>,
    ) -> Self {
        Self {
            camera,
            credits,
            watchdog,
            packets,
            header_len: 0,
        }
    }

    async fn queue(&self, packet_type: PacketType, data: &[u8], encrypt: bool) -> Result<()> {
        for packet in Fragmenter::new(packet_type, data) {
            self.packets
                .send(OutboundPacket { packet, encrypt })
                .await
                .map_err(|_| FpvLinkError::Transport("Packet queue closed".to_string()))?;
        }
        Ok(())
    }

    /// Send the JPEG header of the first frame, encrypted
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame has no SOS marker.
    pub async fn initial_sync(&mut self) -> Result<()> {
        self.credits.take().await?;
        let frame = self.camera.capture().await?;
        self.header_len = find_scan_offset(&frame)
            .ok_or_else(|| FpvLinkError::Protocol("Camera frame has no SOS marker".to_string()))?;
        self.queue(PacketType::InitialHeaderData, &frame[..self.header_len], true)
            .await?;
        info!("JPEG header sent ({} bytes)", self.header_len);

        self.credits.grant();
        self.watchdog.start();
        Ok(())
    }

    /// Capture and queue one frame's scan data, without header and EOI
    pub async fn send_frame(&mut self) -> Result<()> {
        self.credits.take().await?;
        let frame = self.camera.capture().await?;
        if frame.len() < self.header_len + 2 {
            warn!("Short camera frame ({} bytes)", frame.len());
            return Ok(());
        }
        let scan = &frame[self.header_len..frame.len() - 2];
        trace!("Frame scan {} bytes", scan.len());
        self.queue(PacketType::FrameData, scan, false).await
    }

    /// Run the initial sync, then stream frames forever
    pub async fn run(mut self) -> Result<()> {
        debug!("Camera task started");
        self.initial_sync().await?;
        loop {
            if let Err(e) = self.send_frame().await {
                if matches!(e, FpvLinkError::Transport(_)) {
                    error!("Camera task stopped: {}", e);
                    return Err(e);
                }
                debug!("Frame skipped: {}", e);
            }
        }
    }
}

/// Spawn the task draining the packet queue into the radio
pub fn spawn_transmitter(sender: LinkSender, mut packets: mpsc::Receiver<OutboundPacket>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Transmitter task started");
        while let Some(OutboundPacket { packet, encrypt }) = packets.recv().await {
            if let Err(e) = sender.send(packet, encrypt).await {
                debug!("Packet lost: {}", e);
            }
        }
        debug!("Packet queue closed, transmitter exiting");
    })
}
