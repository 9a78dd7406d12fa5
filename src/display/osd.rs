//! # On-Screen Display
//!
//! Link statistics drawn on the receiver's status display.
//!
//! While the channel scan runs and no frame has been decoded yet, the OSD
//! shows `Check...` and the channel being scanned. Once video starts it
//! switches to the statistics screen:
//!
//! ```text
//! RSSi: -61
//! RTT:  0012
//! kBs:  187
//! P1%:  60
//! P2%:  60
//! Ch:   04
//! FPS:  24
//! Tfr:  011
//! ```
//!
//! Store changes only flag a field for redraw; FPS and frame time are
//! redrawn on every update tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::Display;
use crate::error::Result;
use crate::link::FrameStats;
use crate::store::{ObservableStore, ValueId};

const LABELS: [(&str, u16); 8] = [
    ("RSSi:", 0),
    ("RTT:", 16),
    ("kBs:", 32),
    ("P1%:", 48),
    ("P2%:", 64),
    ("Ch:", 80),
    ("FPS:", 96),
    ("Tfr:", 112),
];

const RSSI_POS: (u16, u16) = (40, 0);
const RTT_POS: (u16, u16) = (32, 16);
const DATA_RATE_POS: (u16, u16) = (32, 32);
const TX_POWER_1_POS: (u16, u16) = (32, 48);
const TX_POWER_2_POS: (u16, u16) = (32, 64);
const CHANNEL_POS: (u16, u16) = (32, 80);
const FPS_POS: (u16, u16) = (32, 96);
const FRAME_TIME_POS: (u16, u16) = (32, 112);

const SCAN_CHANNEL_POS: (u16, u16) = (32, 20);

/// Fields waiting to be redrawn
#[derive(Debug)]
pub struct OsdFlags {
    rssi: AtomicBool,
    rtt: AtomicBool,
    data_rate: AtomicBool,
    tx_power: AtomicBool,
    channel: AtomicBool,
    scan: Notify,
}

impl Default for OsdFlags {
    fn default() -> Self {
        Self {
            rssi: AtomicBool::new(false),
            rtt: AtomicBool::new(false),
            data_rate: AtomicBool::new(false),
            tx_power: AtomicBool::new(true),
            channel: AtomicBool::new(true),
            scan: Notify::new(),
        }
    }
}

impl OsdFlags {
    /// Flag the field showing `id`
    pub fn mark(&self, id: ValueId) {
        match id {
            ValueId::ScanChannel => self.scan.notify_one(),
            ValueId::CurrentChannel => self.channel.store(true, Ordering::Release),
            ValueId::RttValue => self.rtt.store(true, Ordering::Release),
            ValueId::DataRxRate => self.data_rate.store(true, Ordering::Release),
            ValueId::RxRssi => self.rssi.store(true, Ordering::Release),
            ValueId::TxPower1 | ValueId::TxPower2 => self.tx_power.store(true, Ordering::Release),
        }
    }

    fn take(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::AcqRel)
    }
}

/// OSD renderer over a [`Display`]
pub struct Osd<D: Display> {
    display: D,
    store: Arc<ObservableStore>,
    stats: Arc<FrameStats>,
    flags: Arc<OsdFlags>,
}

impl<D: Display> Osd<D> {
    /// Create the OSD and subscribe it to store changes
    ///
    /// # Errors
    ///
    /// Returns a store error if the callback table is full.
    pub fn new(display: D, store: Arc<ObservableStore>, stats: Arc<FrameStats>) -> Result<Self> {
        let flags = Arc::new(OsdFlags::default());
        let sink = flags.clone();
        store.register_callback(move |id| sink.mark(id))?;
        Ok(Self {
            display,
            store,
            stats,
            flags,
        })
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn flags(&self) -> &Arc<OsdFlags> {
        &self.flags
    }

    /// Boot screen shown while scanning
    pub fn draw_boot(&mut self) -> Result<()> {
        self.display.clear()?;
        self.display.draw_text("Check...", 0, 0)?;
        self.display.draw_text("Ch:", 0, 20)
    }

    /// Show the channel being scanned
    pub fn draw_scan_channel(&mut self) -> Result<()> {
        self.draw_boot()?;
        let channel = self.store.get(ValueId::ScanChannel);
        self.display
            .draw_text(&channel.to_string(), SCAN_CHANNEL_POS.0, SCAN_CHANNEL_POS.1)
    }

    /// Clear the screen and draw every label
    pub fn draw_labels(&mut self) -> Result<()> {
        self.display.clear()?;
        for (label, y) in LABELS {
            self.display.draw_text(label, 0, y)?;
        }
        Ok(())
    }

    fn text(&mut self, pos: (u16, u16), text: String) -> Result<()> {
        self.display.draw_text(&text, pos.0, pos.1)
    }

    /// Redraw flagged values plus FPS and frame time
    pub fn render(&mut self) -> Result<()> {
        if OsdFlags::take(&self.flags.rssi) {
            let rssi = self.store.get_i32(ValueId::RxRssi);
            self.text(RSSI_POS, format!("{}", rssi))?;
        }
        if OsdFlags::take(&self.flags.tx_power) {
            let p1 = self.store.get(ValueId::TxPower1);
            let p2 = self.store.get(ValueId::TxPower2);
            self.text(TX_POWER_1_POS, format!("{:02}", p1))?;
            self.text(TX_POWER_2_POS, format!("{:02}", p2))?;
        }
        if OsdFlags::take(&self.flags.rtt) {
            let rtt = self.store.get(ValueId::RttValue);
            self.text(RTT_POS, format!("{:04}", rtt))?;
        }
        if OsdFlags::take(&self.flags.data_rate) {
            let kbs = self.store.get(ValueId::DataRxRate) / 1024;
            self.text(DATA_RATE_POS, format!("{:03}", kbs))?;
        }
        if OsdFlags::take(&self.flags.channel) {
            let channel = self.store.get(ValueId::CurrentChannel);
            self.text(CHANNEL_POS, format!("{:02}", channel))?;
        }
        let fps = self.stats.fps();
        let frame_ms = self.stats.avg_frame_ms();
        self.text(FPS_POS, format!("{:02}", fps))?;
        self.text(FRAME_TIME_POS, format!("{:03}", frame_ms))
    }

    /// Show scan progress until the first frame is decoded, then keep the
    /// statistics screen up to date every `period`
    pub async fn run(mut self, period: Duration) {
        if let Err(e) = self.draw_boot() {
            debug!("OSD draw failed: {}", e);
        }

        let flags = self.flags.clone();
        let mut poll = tokio::time::interval(Duration::from_millis(10));
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while self.stats.total_frames() == 0 {
            tokio::select! {
                _ = flags.scan.notified() => {
                    if let Err(e) = self.draw_scan_channel() {
                        debug!("OSD draw failed: {}", e);
                    }
                }
                _ = poll.tick() => {}
            }
        }

        info!("Video up, switching OSD to link statistics");
        if let Err(e) = self.draw_labels() {
            debug!("OSD draw failed: {}", e);
        }
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.render() {
                debug!("OSD draw failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::display::FrameCanvas;
    use std::sync::Mutex;

    fn osd_on<D: Display>(display: D) -> Osd<D> {
        let store = Arc::new(ObservableStore::with_receiver_defaults(&StoreConfig::default(), 6, 60, 45).unwrap());
        store.dispatch_pending();
        Osd::new(display, store, Arc::new(FrameStats::new())).unwrap()
    }

    fn osd() -> Osd<FrameCanvas> {
        osd_on(FrameCanvas::new(8, 8))
    }

    #[test]
    fn test_labels() {
        let mut osd = osd();
        osd.draw_labels().unwrap();

        let canvas = osd.display();
        assert_eq!(canvas.text_at(0, 0), Some("RSSi:"));
        assert_eq!(canvas.text_at(0, 48), Some("P1%:"));
        assert_eq!(canvas.text_at(0, 112), Some("Tfr:"));
    }

    #[test]
    fn test_first_render_draws_channel_and_power() {
        let mut osd = osd();
        osd.render().unwrap();

        let canvas = osd.display();
        assert_eq!(canvas.text_at(32, 80), Some("06"));
        assert_eq!(canvas.text_at(32, 48), Some("60"));
        assert_eq!(canvas.text_at(32, 64), Some("45"));
        assert_eq!(canvas.text_at(32, 96), Some("00"));
        assert_eq!(canvas.text_at(32, 112), Some("000"));
        assert_eq!(canvas.text_at(40, 0), None);
        assert_eq!(canvas.text_at(32, 16), None);
    }

    #[test]
    fn test_changes_redraw_with_formats() {
        let mut osd = osd();
        osd.render().unwrap();

        osd.store.set(ValueId::RttValue, 7).unwrap();
        osd.store.set(ValueId::DataRxRate, 5 * 1024 + 100).unwrap();
        osd.store.set_i32(ValueId::RxRssi, -61).unwrap();
        osd.store.set(ValueId::CurrentChannel, 11).unwrap();
        osd.store.dispatch_pending();
        osd.render().unwrap();

        let canvas = osd.display();
        assert_eq!(canvas.text_at(32, 16), Some("0007"));
        assert_eq!(canvas.text_at(32, 32), Some("005"));
        assert_eq!(canvas.text_at(40, 0), Some("-61"));
        assert_eq!(canvas.text_at(32, 80), Some("11"));
    }

    #[test]
    fn test_frame_stats_drawn_every_render() {
        let mut osd = osd();
        osd.stats.record(Duration::from_millis(9));
        osd.stats.roll();
        osd.render().unwrap();

        assert_eq!(osd.display().text_at(32, 96), Some("01"));
        assert_eq!(osd.display().text_at(32, 112), Some("009"));
    }

    #[test]
    fn test_scan_channel_screen() {
        let mut osd = osd();
        osd.store.set(ValueId::ScanChannel, 7).unwrap();
        osd.draw_scan_channel().unwrap();

        let canvas = osd.display();
        assert_eq!(canvas.text_at(0, 0), Some("Check..."));
        assert_eq!(canvas.text_at(0, 20), Some("Ch:"));
        assert_eq!(canvas.text_at(32, 20), Some("7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_switches_screens_after_first_frame() {
        let canvas = Arc::new(Mutex::new(FrameCanvas::new(8, 8)));
        let osd = osd_on(canvas.clone());
        let store = osd.store.clone();
        let stats = osd.stats.clone();
        let handle = tokio::spawn(osd.run(Duration::from_millis(500)));

        store.set(ValueId::ScanChannel, 3).unwrap();
        store.dispatch_pending();
        tokio::time::sleep(Duration::from_millis(20)).await;
        {
            let canvas = canvas.lock().unwrap();
            assert_eq!(canvas.text_at(0, 0), Some("Check..."));
            assert_eq!(canvas.text_at(32, 20), Some("3"));
        }

        stats.record(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(600)).await;
        {
            let canvas = canvas.lock().unwrap();
            assert_eq!(canvas.text_at(0, 0), Some("RSSi:"));
            assert_eq!(canvas.text_at(32, 80), Some("06"));
            assert_eq!(canvas.text_at(32, 20), None);
        }

        handle.abort();
    }
}
