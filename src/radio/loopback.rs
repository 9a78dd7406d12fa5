//! # Loopback Radio
//!
//! In-memory pair of radios connecting two nodes in one process. A datagram
//! reaches the peer only while both radios are tuned to the same channel,
//! and each delivery is followed by a sniffed vendor frame carrying the
//! link RSSI, as a promiscuous-mode radio would report it.

use std::sync::atomic::{AtomicI8, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::sniffer::{build_link_frame, DEFAULT_RSSI};
use super::{CompletionHandle, RadioDriver, RadioEvent};
use crate::error::{FpvLinkError, Result};

#[derive(Debug)]
struct Endpoint {
    mac: [u8; 6],
    channel: AtomicU8,
    events: mpsc::Sender<RadioEvent>,
}

/// One side of a loopback link
#[derive(Debug)]
pub struct LoopbackRadio {
    local: Arc<Endpoint>,
    peer: Arc<Endpoint>,
    peer_channel: AtomicU8,
    tx_power: AtomicI8,
    link_rssi: AtomicI8,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Create two connected radios, both tuned to `channel`
///
/// # Arguments
///
/// * `macs` - MAC addresses of the two sides
/// * `channel` - Initial channel of both radios
/// * `queue_size` - Capacity of each side's inbound event queue
///
/// # Returns
///
/// Each radio with the receiver of its inbound events
pub fn loopback_pair(
    macs: ([u8; 6], [u8; 6]),
    channel: u8,
    queue_size: usize,
) -> (
    (Arc<LoopbackRadio>, mpsc::Receiver<RadioEvent>),
    (Arc<LoopbackRadio>, mpsc::Receiver<RadioEvent>),
) {
    let (tx_a, rx_a) = mpsc::channel(queue_size);
    let (tx_b, rx_b) = mpsc::channel(queue_size);
    let a = Arc::new(Endpoint {
        mac: macs.0,
        channel: AtomicU8::new(channel),
        events: tx_a,
    });
    let b = Arc::new(Endpoint {
        mac: macs.1,
        channel: AtomicU8::new(channel),
        events: tx_b,
    });
    (
        (Arc::new(LoopbackRadio::new(a.clone(), b.clone(), channel)), rx_a),
        (Arc::new(LoopbackRadio::new(b, a, channel)), rx_b),
    )
}

impl LoopbackRadio {
    fn new(local: Arc<Endpoint>, peer: Arc<Endpoint>, channel: u8) -> Self {
        Self {
            local,
            peer,
            peer_channel: AtomicU8::new(channel),
            tx_power: AtomicI8::new(0),
            link_rssi: AtomicI8::new(DEFAULT_RSSI),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn channel(&self) -> u8 {
        self.local.channel.load(Ordering::Acquire)
    }

    pub fn peer_channel(&self) -> u8 {
        self.peer_channel.load(Ordering::Acquire)
    }

    pub fn tx_power(&self) -> i8 {
        self.tx_power.load(Ordering::Acquire)
    }

    /// RSSI the peer will observe for frames sent from this side
    pub fn set_link_rssi(&self, rssi: i8) {
        self.link_rssi.store(rssi, Ordering::Release);
    }

    /// Datagrams that reached the peer's queue
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Datagrams lost to a channel mismatch or a full peer queue
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RadioDriver for LoopbackRadio {
    async fn send(&self, datagram: &[u8], completion: CompletionHandle) -> Result<()> {
        if self.peer.events.is_closed() {
            return Err(FpvLinkError::Transport("Peer radio is gone".to_string()));
        }

        let channel = self.channel();
        let peer_channel = self.peer.channel.load(Ordering::Acquire);
        if channel != peer_channel {
            trace!("Lost datagram: channel {} != peer channel {}", channel, peer_channel);
            self.dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            let frame = build_link_frame(self.local.mac, self.peer.mac, datagram);
            let datagram = RadioEvent::Datagram(Bytes::copy_from_slice(datagram));
            let sniffed = RadioEvent::Sniffed {
                frame: Bytes::from(frame),
                rssi: self.link_rssi.load(Ordering::Acquire),
            };
            match self.peer.events.try_send(datagram) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    // Sniffed frames are best effort
                    let _ = self.peer.events.try_send(sniffed);
                }
                Err(_) => {
                    debug!("Peer queue full, datagram dropped");
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        completion.complete();
        Ok(())
    }

    fn set_channel(&self, channel: u8) -> Result<()> {
        if channel == 0 || channel > 14 {
            return Err(FpvLinkError::Transport(format!("Invalid channel {}", channel)));
        }
        self.local.channel.store(channel, Ordering::Release);
        debug!("Radio {:02X?} on channel {}", self.local.mac, channel);
        Ok(())
    }

    fn set_max_tx_power(&self, quarter_dbm: i8) -> Result<()> {
        self.tx_power.store(quarter_dbm, Ordering::Release);
        Ok(())
    }

    fn modify_peer_channel(&self, channel: u8) -> Result<()> {
        self.peer_channel.store(channel, Ordering::Release);
        Ok(())
    }

    fn own_mac(&self) -> [u8; 6] {
        self.local.mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::sniffer::{is_link_frame, BODY_OFFSET};

    const MACS: ([u8; 6], [u8; 6]) = ([0x02, 0, 0, 0, 0, 1], [0x02, 0, 0, 0, 0, 2]);

    #[tokio::test]
    async fn test_delivery_on_same_channel() {
        let ((a, _rx_a), (_b, mut rx_b)) = loopback_pair(MACS, 6, 8);
        a.set_link_rssi(-55);

        a.send(&[1, 2, 3], CompletionHandle::new()).await.unwrap();

        assert_eq!(rx_b.recv().await.unwrap(), RadioEvent::Datagram(Bytes::from_static(&[1, 2, 3])));
        match rx_b.recv().await.unwrap() {
            RadioEvent::Sniffed { frame, rssi } => {
                assert_eq!(rssi, -55);
                assert!(is_link_frame(&frame));
                assert_eq!(&frame[BODY_OFFSET..], &[1, 2, 3]);
            }
            other => panic!("Expected sniffed frame, got {:?}", other),
        }
        assert_eq!(a.delivered(), 1);
    }

    #[tokio::test]
    async fn test_channel_mismatch_drops() {
        let ((a, _rx_a), (b, mut rx_b)) = loopback_pair(MACS, 6, 8);
        b.set_channel(11).unwrap();

        a.send(&[9], CompletionHandle::new()).await.unwrap();
        assert!(rx_b.try_recv().is_err());
        assert_eq!(a.dropped(), 1);

        a.set_channel(11).unwrap();
        a.send(&[9], CompletionHandle::new()).await.unwrap();
        assert!(matches!(rx_b.try_recv(), Ok(RadioEvent::Datagram(_))));
    }

    #[tokio::test]
    async fn test_send_completes() {
        let ((a, _rx_a), (_b, _rx_b)) = loopback_pair(MACS, 1, 8);
        let completion = CompletionHandle::new();
        completion.arm();

        a.send(&[0], completion.clone()).await.unwrap();
        assert!(!completion.is_in_flight());
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer_fails() {
        let ((a, _rx_a), (_b, rx_b)) = loopback_pair(MACS, 1, 8);
        drop(rx_b);

        assert!(a.send(&[0], CompletionHandle::new()).await.is_err());
    }

    #[test]
    fn test_driver_settings() {
        let ((a, _rx_a), (b, _rx_b)) = loopback_pair(MACS, 3, 8);

        assert!(a.set_channel(0).is_err());
        a.set_max_tx_power(53).unwrap();
        a.modify_peer_channel(9).unwrap();

        assert_eq!(a.tx_power(), 53);
        assert_eq!(a.peer_channel(), 9);
        assert_eq!(a.own_mac(), MACS.0);
        assert_eq!(b.own_mac(), MACS.1);
        assert_eq!(b.channel(), 3);
    }
}
