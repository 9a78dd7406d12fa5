//! # Image Pipeline
//!
//! Decodes completed frames on the receiver and feeds tiles to the display.
//!
//! ## Flow
//!
//! ```text
//! FrameComplete ──▶ frame_ready.notify ──▶ take_current() ──▶ FRAME_RECEIVED
//!                                                 │
//!                                                 ▼
//!                               JpegDecoder ──▶ Tile ──try_send──▶ display task
//! ```
//!
//! Tiles that do not fit the queue are dropped; the display never stalls
//! the decoder.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::events::{EventSender, LinkEvent};
use crate::display::Tile;
use crate::jpeg::{JpegDecoder, JpegError, SliceSource};
use crate::protocol::{FrameBuffers, SlotId};

/// Decode rate and timing, rolled over once per stats interval
#[derive(Debug, Default)]
pub struct FrameStats {
    frames: AtomicU32,
    frame_time_us: AtomicU64,
    fps: AtomicU32,
    avg_frame_ms: AtomicU32,
    total_frames: AtomicU64,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one decoded frame
    pub fn record(&self, decode_time: Duration) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.frame_time_us
            .fetch_add(decode_time.as_micros() as u64, Ordering::Relaxed);
        self.total_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the counters of the elapsed interval and start a new one
    pub fn roll(&self) {
        let frames = self.frames.swap(0, Ordering::Relaxed);
        let time_ms = self.frame_time_us.swap(0, Ordering::Relaxed) / 1000;
        let avg = if frames == 0 { 0 } else { (time_ms / frames as u64) as u32 };
        self.fps.store(frames, Ordering::Relaxed);
        self.avg_frame_ms.store(avg, Ordering::Relaxed);
    }

    /// Frames decoded during the last interval
    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    /// Mean decode time during the last interval, 0 without frames
    pub fn avg_frame_ms(&self) -> u32 {
        self.avg_frame_ms.load(Ordering::Relaxed)
    }

    /// Frames decoded since boot
    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Relaxed)
    }
}

/// Spawn the timer rolling `stats` every `period`
pub fn spawn_frame_stats(stats: Arc<FrameStats>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            stats.roll();
            trace!("FPS {} avg {} ms", stats.fps(), stats.avg_frame_ms());
        }
    })
}

/// Receiver-side frame decoder
pub struct ImageTask {
    buffers: Arc<FrameBuffers>,
    frame_ready: Arc<Notify>,
    events: EventSender,
    decoder: JpegDecoder,
    tiles: mpsc::Sender<Tile>,
    stats: Arc<FrameStats>,
    dropped_tiles: u64,
}

impl ImageTask {
    /// # Arguments
    ///
    /// * `buffers` - Frame slots shared with the reassembler
    /// * `frame_ready` - Notified once per completed frame
    /// * `events` - Queue receiving FRAME_RECEIVED
    /// * `pool_size` - Decoder table pool in bytes
    /// * `tiles` - Display queue
    /// * `stats` - Frame statistics to update
    pub fn new(
        buffers: Arc<FrameBuffers>,
        frame_ready: Arc<Notify>,
        events: EventSender,
        pool_size: usize,
        tiles: mpsc::Sender<Tile>,
        stats: Arc<FrameStats>,
    ) -> Self {
        Self {
            buffers,
            frame_ready,
            events,
            decoder: JpegDecoder::new(pool_size),
            tiles,
            stats,
            dropped_tiles: 0,
        }
    }

    /// Tiles lost to a full display queue
    pub fn dropped_tiles(&self) -> u64 {
        self.dropped_tiles
    }

    /// Decode the JPEG stream held in `slot`, queueing every tile
    pub fn decode_slot(&mut self, slot: SlotId) -> Result<(), JpegError> {
        let frame = self.buffers.lock(slot);
        let mut src = SliceSource::new(frame.as_bytes());
        self.decoder.prepare(&mut src)?;

        let tiles = &self.tiles;
        let dropped = &mut self.dropped_tiles;
        self.decoder.decompress(&mut src, |rect, pixels| {
            match Tile::new(*rect, pixels) {
                Some(tile) => {
                    if tiles.try_send(tile).is_err() {
                        *dropped += 1;
                    }
                }
                None => *dropped += 1,
            }
            true
        })
    }

    /// Handle one frame notification
    pub async fn process_frame(&mut self) {
        let slot = self.buffers.take_current();
        self.events.send(LinkEvent::FrameReceived).await;

        let start = Instant::now();
        match self.decode_slot(slot) {
            Ok(()) => self.stats.record(start.elapsed()),
            Err(e) => debug!("Frame in slot {} dropped: {}", slot.index(), e),
        }
    }

    /// Decode frames as they complete, forever
    pub async fn run(mut self) {
        debug!("Image task started");
        loop {
            self.frame_ready.notified().await;
            self.process_frame().await;
        }
    }
}
