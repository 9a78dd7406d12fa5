//! # Radio Transport
//!
//! Datagram radio abstraction and the stop-and-wait sender both nodes use.
//!
//! ## Stop-and-Wait
//!
//! ```text
//! send(p1) ── acquire permit ──▶ driver.send(p1) ──▶ ... ──▶ completion.complete() ── release
//! send(p2) ── acquire permit (blocks until p1 completes) ──▶ driver.send(p2)
//! ```
//!
//! A send the driver rejects outright releases the permit immediately.

pub mod loopback;
pub mod power;
pub mod sniffer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::crypto::cipher::DynEncryptionGate;
use crate::error::{FpvLinkError, Result};
use crate::protocol::Packet;

pub use loopback::{loopback_pair, LoopbackRadio};
pub use sniffer::RssiSniffer;

/// Something the radio delivered to this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// Datagram addressed to this node
    Datagram(Bytes),
    /// Raw management frame seen in promiscuous mode, with its RSSI in dBm
    Sniffed { frame: Bytes, rssi: i8 },
}

/// Transmit-done signal handed to the driver with each send
///
/// Completing a handle that is not armed is a no-op, so a late or duplicate
/// completion never grants a second permit.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    permit: Arc<Semaphore>,
    in_flight: Arc<AtomicBool>,
}

impl CompletionHandle {
    fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    fn arm(&self) {
        self.in_flight.store(true, Ordering::Release);
    }

    /// Report the in-flight datagram as sent
    pub fn complete(&self) {
        if self.in_flight.swap(false, Ordering::AcqRel) {
            self.permit.add_permits(1);
        }
    }

    /// Whether a send is waiting for completion
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Datagram radio driver
#[async_trait]
pub trait RadioDriver: Send + Sync {
    /// Start transmitting `datagram` to the peer
    ///
    /// The driver calls `completion.complete()` once the datagram has left.
    async fn send(&self, datagram: &[u8], completion: CompletionHandle) -> Result<()>;

    fn set_channel(&self, channel: u8) -> Result<()>;

    /// Set the TX power ceiling in 0.25 dBm units
    fn set_max_tx_power(&self, quarter_dbm: i8) -> Result<()>;

    /// Tell the driver the peer now listens on `channel`
    fn modify_peer_channel(&self, channel: u8) -> Result<()>;

    fn own_mac(&self) -> [u8; 6];
}

/// Stop-and-wait sender: at most one datagram in flight
#[derive(Clone)]
pub struct LinkSender {
    radio: Arc<dyn RadioDriver>,
    completion: CompletionHandle,
    gate: Option<Arc<DynEncryptionGate>>,
}

impl std::fmt::Debug for LinkSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSender")
            .field("in_flight", &self.completion.is_in_flight())
            .field("encryption", &self.gate.is_some())
            .finish_non_exhaustive()
    }
}

impl LinkSender {
    /// # Arguments
    ///
    /// * `radio` - Driver to send through
    /// * `gate` - Encryption gate for packets sent with `encrypt = true`
    pub fn new(radio: Arc<dyn RadioDriver>, gate: Option<Arc<DynEncryptionGate>>) -> Self {
        Self {
            radio,
            completion: CompletionHandle::new(),
            gate,
        }
    }

    pub fn radio(&self) -> &Arc<dyn RadioDriver> {
        &self.radio
    }

    /// Send one packet, waiting for the previous send to complete first
    ///
    /// # Arguments
    ///
    /// * `packet` - Packet to send
    /// * `encrypt` - Run the payload through the encryption gate
    ///
    /// # Errors
    ///
    /// Returns the driver's error if it rejects the datagram.
    pub async fn send(&self, mut packet: Packet, encrypt: bool) -> Result<()> {
        if encrypt {
            if let Some(gate) = &self.gate {
                gate.seal(&mut packet);
            }
        }
        let datagram = packet.encode();

        let permit = self
            .completion
            .permit
            .acquire()
            .await
            .map_err(|_| FpvLinkError::Transport("Sender closed".to_string()))?;
        permit.forget();
        self.completion.arm();

        trace!("TX {:?} ({} bytes)", packet.header.packet_type, datagram.len());
        if let Err(e) = self.radio.send(&datagram, self.completion.clone()).await {
            debug!("Send of {:?} failed: {}", packet.header.packet_type, e);
            self.completion.complete();
            return Err(e);
        }
        Ok(())
    }

    /// Reverse the encryption gate on a received packet
    ///
    /// # Returns
    ///
    /// `false` if the packet is flagged encrypted but cannot be opened
    pub fn open(&self, packet: &mut Packet) -> bool {
        match &self.gate {
            Some(gate) => gate.open(packet),
            None => !packet.header.encrypted,
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Radio that records sends and leaves completion to the test
    #[derive(Clone)]
    pub struct MockRadio {
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
        pub pending: Arc<Mutex<Vec<CompletionHandle>>>,
        pub channel: Arc<Mutex<u8>>,
        pub peer_channel: Arc<Mutex<u8>>,
        pub tx_power: Arc<Mutex<i8>>,
        pub auto_complete: bool,
        pub send_error: Arc<Mutex<bool>>,
    }

    impl MockRadio {
        pub fn new(auto_complete: bool) -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                pending: Arc::new(Mutex::new(Vec::new())),
                channel: Arc::new(Mutex::new(0)),
                peer_channel: Arc::new(Mutex::new(0)),
                tx_power: Arc::new(Mutex::new(0)),
                auto_complete,
                send_error: Arc::new(Mutex::new(false)),
            }
        }

        pub fn sent_packets(&self) -> Vec<Packet> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|d| Packet::decode(d).unwrap())
                .collect()
        }

        /// Fire the completion of the oldest pending send
        pub fn complete_one(&self) {
            let handle = self.pending.lock().unwrap().remove(0);
            handle.complete();
        }
    }

    #[async_trait]
    impl RadioDriver for MockRadio {
        async fn send(&self, datagram: &[u8], completion: CompletionHandle) -> Result<()> {
            if *self.send_error.lock().unwrap() {
                return Err(FpvLinkError::Transport("Mock send error".to_string()));
            }
            self.sent.lock().unwrap().push(datagram.to_vec());
            if self.auto_complete {
                completion.complete();
            } else {
                self.pending.lock().unwrap().push(completion);
            }
            Ok(())
        }

        fn set_channel(&self, channel: u8) -> Result<()> {
            *self.channel.lock().unwrap() = channel;
            Ok(())
        }

        fn set_max_tx_power(&self, quarter_dbm: i8) -> Result<()> {
            *self.tx_power.lock().unwrap() = quarter_dbm;
            Ok(())
        }

        fn modify_peer_channel(&self, channel: u8) -> Result<()> {
            *self.peer_channel.lock().unwrap() = channel;
            Ok(())
        }

        fn own_mac(&self) -> [u8; 6] {
            [0x02, 0, 0, 0, 0, 0x01]
        }
    }
}
