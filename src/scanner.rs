//! # Channel Scanner
//!
//! Sweeps every channel of the regulatory domain, sums the access point
//! noise on each, and picks the quietest channel once bleed from the
//! neighbouring channels is taken into account.
//!
//! ## Weight
//!
//! ```text
//! noise(i)  = -sum(rssi of every AP on channel i)
//! weight(i) = noise(i) + k * (noise(i - 1) + noise(i + 1))
//! ```
//!
//! Edge channels only have one neighbour. Lower weight is better.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::error::{FpvLinkError, Result};
use crate::store::{ObservableStore, ValueId};

/// Fewest channels a regulatory domain may have
pub const MIN_CHANNELS: u8 = 2;

/// Most channels a regulatory domain may have
pub const MAX_CHANNELS: u8 = 14;

/// Access point seen during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApRecord {
    /// Signal strength in dBm
    pub rssi: i8,
}

/// Radio side of a channel sweep
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChannelScanDriver: Send + Sync {
    /// Channels in the current regulatory domain, numbered from 1
    fn channel_count(&self) -> u8;

    /// Active scan of one channel
    async fn scan_channel(&self, channel: u8) -> Result<Vec<ApRecord>>;
}

/// Per-channel scan result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStats {
    pub channel: u8,
    pub ap_count: u16,
    /// Sum of negated AP RSSI values
    pub noise: i32,
    pub weight: i32,
}

/// Fill in `weight` for every channel from its own and its neighbours' noise
pub fn compute_weights(stats: &mut [ChannelStats], neighbor_coefficient: f32) {
    let noise: Vec<f32> = stats.iter().map(|s| s.noise as f32).collect();
    let last = noise.len().saturating_sub(1);

    for (i, s) in stats.iter_mut().enumerate() {
        let prev = if i > 0 { noise[i - 1] } else { 0.0 };
        let next = if i < last { noise[i + 1] } else { 0.0 };
        s.weight = (noise[i] + neighbor_coefficient * (prev + next)) as i32;
    }
}

/// Channel with the lowest weight; on a tie the later channel wins
pub fn select_best(stats: &[ChannelStats]) -> Option<u8> {
    stats
        .iter()
        .fold(None::<&ChannelStats>, |best, s| match best {
            Some(b) if b.weight < s.weight => Some(b),
            _ => Some(s),
        })
        .map(|s| s.channel)
}

/// Number of channels in the regulatory domain of `country`
pub fn channel_count_for_country(country: &str) -> u8 {
    match country.to_ascii_uppercase().as_str() {
        "JP" => 14,
        "US" | "CA" => 11,
        _ => 13,
    }
}

/// Sweep-and-select driver
pub struct ChannelScanner<D: ChannelScanDriver> {
    driver: D,
    neighbor_coefficient: f32,
}

impl<D: ChannelScanDriver> ChannelScanner<D> {
    pub fn new(driver: D, neighbor_coefficient: f32) -> Self {
        Self {
            driver,
            neighbor_coefficient,
        }
    }

    /// Scan every channel and collect its statistics
    ///
    /// SCAN_CHANNEL is published before each channel is scanned.
    ///
    /// # Errors
    ///
    /// Returns a scan error for a channel count outside 2..=14, or the
    /// driver's error for a failed channel scan.
    pub async fn survey(&self, store: &ObservableStore) -> Result<Vec<ChannelStats>> {
        let count = self.driver.channel_count();
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&count) {
            return Err(FpvLinkError::Scan(format!(
                "Unsupported channel count {} (expected {}..={})",
                count, MIN_CHANNELS, MAX_CHANNELS
            )));
        }
        info!("Scanning {} channels", count);

        let mut stats = Vec::with_capacity(count as usize);
        for channel in 1..=count {
            store.set(ValueId::ScanChannel, channel as u32)?;
            let records = self.driver.scan_channel(channel).await?;
            let noise = records.iter().fold(0i32, |acc, ap| acc - ap.rssi as i32);
            debug!("Channel {}: {} APs, noise {}", channel, records.len(), noise);
            stats.push(ChannelStats {
                channel,
                ap_count: records.len().min(u16::MAX as usize) as u16,
                noise,
                weight: 0,
            });
        }

        compute_weights(&mut stats, self.neighbor_coefficient);
        Ok(stats)
    }

    /// Scan, pick the quietest channel and publish it as CURRENT_CHANNEL
    ///
    /// # Errors
    ///
    /// See [`survey`](Self::survey). Callers treat any error as fatal.
    pub async fn scan_for_best_channel(&self, store: &ObservableStore) -> Result<u8> {
        let stats = self.survey(store).await?;
        let best = select_best(&stats).ok_or_else(|| FpvLinkError::Scan("No channel scanned".to_string()))?;
        if let Some(s) = stats.iter().find(|s| s.channel == best) {
            info!(
                "Best channel {} ({} APs, noise {}, weight {})",
                best, s.ap_count, s.noise, s.weight
            );
        }
        store.set(ValueId::CurrentChannel, best as u32)?;
        Ok(best)
    }
}

/// Scan driver returning fixed AP lists
#[derive(Debug, Clone, Default)]
pub struct SimulatedScanDriver {
    channel_count: u8,
    aps: BTreeMap<u8, Vec<ApRecord>>,
    dwell: Duration,
}

impl SimulatedScanDriver {
    pub fn new(channel_count: u8) -> Self {
        Self {
            channel_count,
            aps: BTreeMap::new(),
            dwell: Duration::ZERO,
        }
    }

    /// Place access points with the given RSSI values on `channel`
    pub fn with_aps(mut self, channel: u8, rssi: &[i8]) -> Self {
        self.aps
            .entry(channel)
            .or_default()
            .extend(rssi.iter().map(|&rssi| ApRecord { rssi }));
        self
    }

    /// Time spent on each channel
    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }

    /// Typical 2.4 GHz neighbourhood: busy 1/6/11, a few stragglers
    pub fn urban(channel_count: u8) -> Self {
        Self::new(channel_count)
            .with_aps(1, &[-45, -60, -72, -80])
            .with_aps(3, &[-85])
            .with_aps(6, &[-40, -55, -67, -70, -88])
            .with_aps(9, &[-90])
            .with_aps(11, &[-50, -62, -75])
            .with_aps(13, &[-82])
    }
}

#[async_trait]
impl ChannelScanDriver for SimulatedScanDriver {
    fn channel_count(&self) -> u8 {
        self.channel_count
    }

    async fn scan_channel(&self, channel: u8) -> Result<Vec<ApRecord>> {
        if !self.dwell.is_zero() {
            tokio::time::sleep(self.dwell).await;
        }
        Ok(self.aps.get(&channel).cloned().unwrap_or_default())
    }
}
