//! # Receiver Node Link
//!
//! RX parsing and event dispatch for the node that displays the video.
//!
//! ## Tasks
//!
//! ```text
//! radio events ──▶ RxParser ──┬─▶ Reassembler ──▶ frame_ready (image task)
//!                             ├─▶ RTT_VALUE from ping echoes
//!                             └─▶ RSSI_UPDATE ─┐
//! net-stats timer ──▶ PING, NET_STATS ─────────┤
//! store callbacks ──▶ SWITCH_CHANNEL, TX_POWER ┤
//! image task ──▶ FRAME_RECEIVED ───────────────┴─▶ EventDispatcher ──▶ LinkSender
//! ```

use std::sync::atomic::{AtomicI8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::events::{event_for_change, EventSender, LinkEvent};
use crate::error::Result;
use crate::protocol::{Packet, PacketType, Reassembler, ReassemblyEvent};
use crate::radio::power::percent_to_quarter_dbm;
use crate::radio::sniffer::DEFAULT_RSSI;
use crate::radio::{LinkSender, RadioEvent, RssiSniffer};
use crate::store::{ObservableStore, ValueId};

/// Microsecond clock used for ping timestamps
#[derive(Debug, Clone, Copy)]
pub struct LinkClock {
    epoch: Instant,
}

impl Default for LinkClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

/// Counters shared between the RX parser and the dispatcher
#[derive(Debug)]
pub struct LinkCounters {
    /// Datagram bytes received since boot
    pub total_rx: AtomicU64,
    /// Last RSSI reported by the sniffer
    pub latest_rssi: AtomicI8,
}

impl Default for LinkCounters {
    fn default() -> Self {
        Self {
            total_rx: AtomicU64::new(0),
            latest_rssi: AtomicI8::new(DEFAULT_RSSI),
        }
    }
}

/// Parses everything the radio delivers to the receiver node
pub struct RxParser {
    reassembler: Reassembler,
    sender: LinkSender,
    store: Arc<ObservableStore>,
    events: EventSender,
    frame_ready: Arc<Notify>,
    counters: Arc<LinkCounters>,
    sniffer: RssiSniffer,
    clock: LinkClock,
}

impl RxParser {
    /// # Arguments
    ///
    /// * `reassembler` - Fragment sink
    /// * `sender` - Used to open encrypted packets
    /// * `store` - Receives RTT_VALUE
    /// * `events` - Receives RSSI_UPDATE
    /// * `frame_ready` - Notified once per completed frame
    /// * `counters` - Byte and RSSI counters shared with the dispatcher
    /// * `clock` - Clock the ping timestamps were taken from
    pub fn new(
        reassembler: Reassembler,
        sender: LinkSender,
        store: Arc<ObservableStore>,
        events: EventSender,
        frame_ready: Arc<Notify>,
        counters: Arc<LinkCounters>,
        clock: LinkClock,
    ) -> Self {
        Self {
            reassembler,
            sender,
            store,
            events,
            frame_ready,
            counters,
            sniffer: RssiSniffer::new(),
            clock,
        }
    }

    /// Handle one radio event
    pub fn handle(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Datagram(bytes) => {
                self.counters
                    .total_rx
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                match Packet::decode(&bytes) {
                    Ok(packet) => self.parse(packet),
                    Err(e) => debug!("Unparseable datagram: {}", e),
                }
            }
            RadioEvent::Sniffed { frame, rssi } => {
                if let Some(rssi) = self.sniffer.observe(&frame, rssi) {
                    self.counters.latest_rssi.store(rssi, Ordering::Relaxed);
                    self.events.try_send(LinkEvent::RssiUpdate);
                }
            }
        }
    }

    fn parse(&mut self, mut packet: Packet) {
        if !self.sender.open(&mut packet) {
            debug!("Cannot decrypt {:?} packet", packet.header.packet_type);
            return;
        }

        match packet.header.packet_type {
            PacketType::InitialHeaderData | PacketType::FrameData => match self.reassembler.accept(&packet) {
                Ok(ReassemblyEvent::FrameComplete { slot, frame_len }) => {
                    trace!("Frame of {} bytes complete in slot {}", frame_len, slot.index());
                    self.frame_ready.notify_one();
                }
                Ok(ReassemblyEvent::HeaderComplete { header_len }) => {
                    info!("JPEG header received ({} bytes)", header_len);
                }
                Ok(ReassemblyEvent::Stored) => {}
                Err(e) => debug!("Fragment dropped: {}", e),
            },
            PacketType::Ping => {
                let Some(sent_us) = packet.ping_timestamp() else {
                    debug!("Short ping echo");
                    return;
                };
                let rtt_ms = self.clock.now_us().saturating_sub(sent_us) / 1000;
                if let Err(e) = self.store.set(ValueId::RttValue, rtt_ms.min(u32::MAX as u64) as u32) {
                    warn!("Cannot publish RTT: {}", e);
                }
            }
            other => trace!("Ignoring {:?} packet", other),
        }
    }

    /// Parse radio events until the radio goes away
    pub async fn run(mut self, mut radio_events: mpsc::Receiver<RadioEvent>) {
        debug!("RX parser started");
        while let Some(event) = radio_events.recv().await {
            self.handle(event);
        }
        debug!("Radio event queue closed, RX parser exiting");
    }
}

/// Executes [`LinkEvent`]s on the receiver node
pub struct EventDispatcher {
    sender: LinkSender,
    store: Arc<ObservableStore>,
    counters: Arc<LinkCounters>,
    clock: LinkClock,
    last_total_rx: u64,
    settle: Duration,
}

impl EventDispatcher {
    /// # Arguments
    ///
    /// * `sender` - Stop-and-wait sender to the camera node
    /// * `store` - Source of channel and power settings, sink of link stats
    /// * `counters` - Counters fed by the RX parser
    /// * `clock` - Clock for outgoing ping timestamps
    /// * `settle` - Delay between announcing and applying a channel switch
    pub fn new(
        sender: LinkSender,
        store: Arc<ObservableStore>,
        counters: Arc<LinkCounters>,
        clock: LinkClock,
        settle: Duration,
    ) -> Self {
        Self {
            sender,
            store,
            counters,
            clock,
            last_total_rx: 0,
            settle,
        }
    }

    /// Execute one event
    ///
    /// # Errors
    ///
    /// Returns the transport or store error that stopped the event.
    pub async fn handle(&mut self, event: LinkEvent) -> Result<()> {
        match event {
            LinkEvent::FrameReceived => self.sender.send(Packet::control(PacketType::Ack), false).await?,
            LinkEvent::Ping => self.sender.send(Packet::ping(self.clock.now_us()), false).await?,
            LinkEvent::NetStats => {
                let total = self.counters.total_rx.load(Ordering::Relaxed);
                let rate = total.wrapping_sub(self.last_total_rx);
                self.last_total_rx = total;
                self.store
                    .set(ValueId::DataRxRate, rate.min(u32::MAX as u64) as u32)?;
            }
            LinkEvent::RssiUpdate => {
                let rssi = self.counters.latest_rssi.load(Ordering::Relaxed);
                self.store.set_i32(ValueId::RxRssi, rssi as i32)?;
            }
            LinkEvent::SwitchChannel => {
                let channel = self.store.get(ValueId::CurrentChannel) as u8;
                self.sender
                    .send(Packet::with_byte(PacketType::SwitchChannel, channel), false)
                    .await?;
                tokio::time::sleep(self.settle).await;
                let radio = self.sender.radio();
                radio.set_channel(channel)?;
                radio.modify_peer_channel(channel)?;
                info!("Switched to channel {}", channel);
            }
            LinkEvent::UpdateTxPower1 => {
                let percent = self.store.get(ValueId::TxPower1) as u8;
                self.sender
                    .radio()
                    .set_max_tx_power(percent_to_quarter_dbm(percent))?;
                debug!("Local TX power {}%", percent);
            }
            LinkEvent::UpdateTxPower2 => {
                let percent = self.store.get(ValueId::TxPower2) as u8;
                self.sender
                    .send(Packet::with_byte(PacketType::TxPowerUpdate, percent), false)
                    .await?;
                debug!("Remote TX power {}%", percent);
            }
        }
        Ok(())
    }

    /// Execute events until every producer is gone
    pub async fn run(mut self, mut events: mpsc::Receiver<LinkEvent>) {
        debug!("Event dispatcher started");
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(event).await {
                debug!("{:?} failed: {}", event, e);
            }
        }
        debug!("Event queue closed, dispatcher exiting");
    }
}

/// Forward store changes that need link action into the event queue
///
/// # Errors
///
/// Returns a store error if the callback table is full.
pub fn register_store_events(store: &ObservableStore, events: EventSender) -> Result<()> {
    store.register_callback(move |id| {
        if let Some(event) = event_for_change(id) {
            events.try_send(event);
        }
    })
}

/// Spawn the timer queueing PING and NET_STATS every `period`
pub fn spawn_net_stats(events: EventSender, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            events.send(LinkEvent::Ping).await;
            events.send(LinkEvent::NetStats).await;
        }
    })
}
