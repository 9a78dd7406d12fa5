//! # Receiver Link Events
//!
//! Work items for the receiver's event dispatcher. Producers are the RX
//! parser, the image task, the net-stats timer and store callbacks.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::store::ValueId;

/// Event handled by the receiver dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A complete frame was taken for decoding; acknowledge it
    FrameReceived,
    /// Send a timestamped ping for the peer to echo
    Ping,
    /// Roll the received-bytes counter into DATA_RX_RATE
    NetStats,
    /// Publish the last sniffed RSSI
    RssiUpdate,
    /// Move both nodes to CURRENT_CHANNEL
    SwitchChannel,
    /// Apply TX_POWER_1 to the local radio
    UpdateTxPower1,
    /// Send TX_POWER_2 to the camera node
    UpdateTxPower2,
}

/// Event raised by a store change, if any
pub fn event_for_change(id: ValueId) -> Option<LinkEvent> {
    match id {
        ValueId::CurrentChannel => Some(LinkEvent::SwitchChannel),
        ValueId::TxPower1 => Some(LinkEvent::UpdateTxPower1),
        ValueId::TxPower2 => Some(LinkEvent::UpdateTxPower2),
        _ => None,
    }
}

/// Producer side of the event queue
///
/// Events are best effort: a full queue drops the event after the send
/// timeout instead of stalling the producer.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<LinkEvent>,
    timeout: Duration,
}

/// Create the bounded event queue
///
/// # Arguments
///
/// * `size` - Queue capacity
/// * `timeout` - How long an async producer waits for room
pub fn event_channel(size: usize, timeout: Duration) -> (EventSender, mpsc::Receiver<LinkEvent>) {
    let (tx, rx) = mpsc::channel(size);
    (EventSender { tx, timeout }, rx)
}

impl EventSender {
    /// Queue `event`, waiting up to the send timeout
    ///
    /// # Returns
    ///
    /// `false` if the event was dropped
    pub async fn send(&self, event: LinkEvent) -> bool {
        match self.tx.send_timeout(event, self.timeout).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropped {:?}: {}", event, e);
                false
            }
        }
    }

    /// Queue `event` without waiting, for synchronous callers
    pub fn try_send(&self, event: LinkEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropped {:?}: {}", event, e);
                false
            }
        }
    }
}
