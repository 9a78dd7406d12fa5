//! # Observable Value Store
//!
//! Process-wide table of link statistics and settings (channel, TX power,
//! RTT, RSSI...) shared by the link tasks, the OSD and the telemetry logger.
//!
//! Writes are deduplicated: setting the value already stored is a no-op.
//! A changed value is flagged, and the notifier task later reports each
//! flagged id once to every registered callback.
//!
//! ## Notification Flow
//!
//! ```text
//! set(id, v) ──▶ [value != v] ──▶ value = v, updated = true
//!                                       │
//! notifier tick ──▶ dispatch_pending ───┘──▶ callback(id) for each callback
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::StoreConfig;
use crate::error::{FpvLinkError, Result};

/// Identifier of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueId {
    /// Channel currently being swept by the scanner
    ScanChannel,
    CurrentChannel,
    /// Local (receiver) TX power in percent
    TxPower1,
    /// Remote (camera) TX power in percent
    TxPower2,
    /// Round trip time in milliseconds
    RttValue,
    /// Bytes received during the last stats interval
    DataRxRate,
    /// Last sniffed RSSI in dBm, stored as `i32` bits
    RxRssi,
}

impl ValueId {
    pub const ALL: [ValueId; 7] = [
        ValueId::ScanChannel,
        ValueId::CurrentChannel,
        ValueId::TxPower1,
        ValueId::TxPower2,
        ValueId::RttValue,
        ValueId::DataRxRate,
        ValueId::RxRssi,
    ];
}

/// Change callback, invoked once per changed id
pub type ChangeCallback = Arc<dyn Fn(ValueId) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: ValueId,
    value: u32,
    updated: bool,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    callbacks: Vec<ChangeCallback>,
}

/// Thread-safe value table with change notification
pub struct ObservableStore {
    inner: Mutex<Inner>,
    max_items: usize,
    max_callbacks: usize,
}

impl std::fmt::Debug for ObservableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableStore")
            .field("max_items", &self.max_items)
            .field("max_callbacks", &self.max_callbacks)
            .finish_non_exhaustive()
    }
}

impl ObservableStore {
    /// Empty store with the configured capacities
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_items: config.max_items,
            max_callbacks: config.max_callbacks,
        }
    }

    /// Store with every id registered and the receiver node's boot values
    ///
    /// # Arguments
    ///
    /// * `config` - Store capacities
    /// * `channel` - Boot channel
    /// * `tx_power_1` - Local TX power in percent
    /// * `tx_power_2` - Remote TX power in percent
    pub fn with_receiver_defaults(config: &StoreConfig, channel: u8, tx_power_1: u8, tx_power_2: u8) -> Result<Self> {
        let store = Self::new(config);
        for id in ValueId::ALL {
            store.register(id)?;
        }
        store.set(ValueId::CurrentChannel, channel as u32)?;
        store.set(ValueId::TxPower1, tx_power_1 as u32)?;
        store.set(ValueId::TxPower2, tx_power_2 as u32)?;
        store.set(ValueId::RttValue, 0)?;
        store.set(ValueId::DataRxRate, 1)?;
        store.set_i32(ValueId::RxRssi, -98)?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `id` with value 0; registering twice is a no-op
    ///
    /// # Errors
    ///
    /// Returns a store error if the table is full.
    pub fn register(&self, id: ValueId) -> Result<()> {
        let mut inner = self.lock();
        if inner.entries.iter().any(|e| e.id == id) {
            return Ok(());
        }
        if inner.entries.len() >= self.max_items {
            return Err(FpvLinkError::Store(format!("Cannot register {:?}: store is full", id)));
        }
        inner.entries.push(Entry {
            id,
            value: 0,
            updated: false,
        });
        Ok(())
    }

    /// Current value, 0 if `id` was never registered
    pub fn get(&self, id: ValueId) -> u32 {
        self.lock().entries.iter().find(|e| e.id == id).map_or(0, |e| e.value)
    }

    pub fn get_i32(&self, id: ValueId) -> i32 {
        self.get(id) as i32
    }

    /// Store `value` and flag the change
    ///
    /// # Returns
    ///
    /// `true` if the stored value changed
    ///
    /// # Errors
    ///
    /// Returns a store error if `id` was never registered.
    pub fn set(&self, id: ValueId, value: u32) -> Result<bool> {
        let mut inner = self.lock();
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| FpvLinkError::Store(format!("{:?} is not registered", id)))?;
        if entry.value == value {
            return Ok(false);
        }
        trace!("{:?}: {} -> {}", id, entry.value, value);
        entry.value = value;
        entry.updated = true;
        Ok(true)
    }

    pub fn set_i32(&self, id: ValueId, value: i32) -> Result<bool> {
        self.set(id, value as u32)
    }

    /// Add a change callback
    ///
    /// # Errors
    ///
    /// Returns a store error once `max_callbacks` are registered.
    pub fn register_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(ValueId) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        if inner.callbacks.len() >= self.max_callbacks {
            return Err(FpvLinkError::Store("Callback table is full".to_string()));
        }
        inner.callbacks.push(Arc::new(callback));
        Ok(())
    }

    /// Report every flagged id to every callback and clear the flags
    ///
    /// Callbacks run after the lock is released and may call back into
    /// the store.
    ///
    /// # Returns
    ///
    /// Number of ids reported
    pub fn dispatch_pending(&self) -> usize {
        let (changed, callbacks) = {
            let mut inner = self.lock();
            let changed: Vec<ValueId> = inner
                .entries
                .iter_mut()
                .filter(|e| e.updated)
                .map(|e| {
                    e.updated = false;
                    e.id
                })
                .collect();
            (changed, inner.callbacks.clone())
        };

        for &id in &changed {
            for callback in &callbacks {
                callback(id);
            }
        }
        changed.len()
    }

    /// Spawn the polling task that calls [`dispatch_pending`](Self::dispatch_pending)
    pub fn spawn_notifier(self: &Arc<Self>, poll_interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            debug!("Store notifier started ({:?} poll)", poll_interval);
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                store.dispatch_pending();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> ObservableStore {
        let store = ObservableStore::new(&StoreConfig::default());
        for id in ValueId::ALL {
            store.register(id).unwrap();
        }
        store
    }

    fn recorder(store: &ObservableStore) -> Arc<Mutex<Vec<ValueId>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store
            .register_callback(move |id| sink.lock().unwrap().push(id))
            .unwrap();
        seen
    }

    #[test]
    fn test_get_unknown_is_zero() {
        let store = ObservableStore::new(&StoreConfig::default());
        assert_eq!(store.get(ValueId::RttValue), 0);
    }

    #[test]
    fn test_set_unknown_is_error() {
        let store = ObservableStore::new(&StoreConfig::default());
        assert!(store.set(ValueId::RttValue, 5).is_err());
    }

    #[test]
    fn test_set_dedupes() {
        let store = store();
        assert!(store.set(ValueId::CurrentChannel, 11).unwrap());
        assert!(!store.set(ValueId::CurrentChannel, 11).unwrap());
        assert_eq!(store.get(ValueId::CurrentChannel), 11);
    }

    #[test]
    fn test_one_notification_per_change() {
        let store = store();
        let seen = recorder(&store);

        store.set(ValueId::TxPower1, 70).unwrap();
        store.set(ValueId::TxPower1, 80).unwrap();
        store.set(ValueId::RttValue, 3).unwrap();
        assert_eq!(store.dispatch_pending(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![ValueId::TxPower1, ValueId::RttValue]);

        // Same value again: nothing to report
        store.set(ValueId::TxPower1, 80).unwrap();
        assert_eq!(store.dispatch_pending(), 0);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_every_callback_notified() {
        let store = store();
        let a = recorder(&store);
        let b = recorder(&store);

        store.set(ValueId::DataRxRate, 4096).unwrap();
        store.dispatch_pending();

        assert_eq!(*a.lock().unwrap(), vec![ValueId::DataRxRate]);
        assert_eq!(*b.lock().unwrap(), vec![ValueId::DataRxRate]);
    }

    #[test]
    fn test_callback_limit() {
        let config = StoreConfig {
            max_callbacks: 2,
            ..StoreConfig::default()
        };
        let store = ObservableStore::new(&config);
        store.register_callback(|_| {}).unwrap();
        store.register_callback(|_| {}).unwrap();
        assert!(store.register_callback(|_| {}).is_err());
    }

    #[test]
    fn test_item_limit() {
        let config = StoreConfig {
            max_items: 1,
            ..StoreConfig::default()
        };
        let store = ObservableStore::new(&config);
        store.register(ValueId::RxRssi).unwrap();
        store.register(ValueId::RxRssi).unwrap();
        assert!(store.register(ValueId::RttValue).is_err());
    }

    #[test]
    fn test_callback_may_reenter_store() {
        let store = Arc::new(store());
        let inner = store.clone();
        store
            .register_callback(move |id| {
                if id == ValueId::ScanChannel {
                    inner.set(ValueId::CurrentChannel, inner.get(ValueId::ScanChannel)).unwrap();
                }
            })
            .unwrap();

        store.set(ValueId::ScanChannel, 9).unwrap();
        store.dispatch_pending();
        assert_eq!(store.get(ValueId::CurrentChannel), 9);
    }

    #[test]
    fn test_receiver_defaults() {
        let store = ObservableStore::with_receiver_defaults(&StoreConfig::default(), 6, 60, 60).unwrap();

        assert_eq!(store.get(ValueId::CurrentChannel), 6);
        assert_eq!(store.get(ValueId::TxPower1), 60);
        assert_eq!(store.get(ValueId::TxPower2), 60);
        assert_eq!(store.get(ValueId::DataRxRate), 1);
        assert_eq!(store.get_i32(ValueId::RxRssi), -98);
        assert_eq!(store.get(ValueId::ScanChannel), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifier_task_dispatches() {
        let store = Arc::new(store());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        store
            .register_callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let handle = store.spawn_notifier(Duration::from_millis(100));
        store.set(ValueId::RttValue, 12).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        handle.abort();
    }
}
