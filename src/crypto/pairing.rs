//! # Pairing
//!
//! One-shot key exchange over a wired serial link, plus persistence of the
//! exchanged keys.
//!
//! ## Handshake
//!
//! ```text
//!   receiver (initiator)                     camera (responder)
//!   random keys, mac = own MAC
//!   ───────────── 54-byte blob ────────────▶ store blob (mac = initiator MAC)
//!   ◀──────────── 6-byte MAC ─────────────── own MAC
//!   mac = responder MAC, store blob
//! ```
//!
//! Pairing runs when the pairing pin reads high at boot; otherwise the keys
//! stored by the last pairing are loaded.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PairingConfig;
use crate::error::{FpvLinkError, Result};
use crate::serial::SerialPortIO;

/// MAC address length
pub const MAC_SIZE: usize = 6;

/// Key length
pub const KEY_SIZE: usize = 16;

/// Serialized [`PairingData`] length
pub const PAIRING_DATA_SIZE: usize = MAC_SIZE + 3 * KEY_SIZE;

/// Keys and peer address shared by a paired node couple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PairingData {
    pub peer_mac: [u8; MAC_SIZE],
    pub local_master_key: [u8; KEY_SIZE],
    pub primary_master_key: [u8; KEY_SIZE],
    pub aes_key: [u8; KEY_SIZE],
}

impl PairingData {
    /// Fresh random keys, with `own_mac` in the MAC field for the peer to use
    pub fn random(own_mac: [u8; MAC_SIZE]) -> Self {
        let mut rng = rand::thread_rng();
        let mut data = Self {
            peer_mac: own_mac,
            ..Self::default()
        };
        rng.fill_bytes(&mut data.local_master_key);
        rng.fill_bytes(&mut data.primary_master_key);
        rng.fill_bytes(&mut data.aes_key);
        data
    }

    pub fn to_bytes(&self) -> [u8; PAIRING_DATA_SIZE] {
        let mut out = [0u8; PAIRING_DATA_SIZE];
        out[..6].copy_from_slice(&self.peer_mac);
        out[6..22].copy_from_slice(&self.local_master_key);
        out[22..38].copy_from_slice(&self.primary_master_key);
        out[38..54].copy_from_slice(&self.aes_key);
        out
    }

    /// # Errors
    ///
    /// Returns a pairing error unless `bytes` is exactly 54 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PAIRING_DATA_SIZE {
            return Err(FpvLinkError::Pairing(format!(
                "Invalid pairing blob size: {} (expected {})",
                bytes.len(),
                PAIRING_DATA_SIZE
            )));
        }
        let mut data = Self::default();
        data.peer_mac.copy_from_slice(&bytes[..6]);
        data.local_master_key.copy_from_slice(&bytes[6..22]);
        data.primary_master_key.copy_from_slice(&bytes[22..38]);
        data.aes_key.copy_from_slice(&bytes[38..54]);
        Ok(data)
    }
}

/// Which side of the handshake this node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingRole {
    /// Generates keys (receiver node)
    Initiator,
    /// Accepts keys (camera node)
    Responder,
}

/// Persistent blob storage keyed by namespace and name
#[cfg_attr(test, automock)]
pub trait KeyStorage: Send + Sync {
    /// Stored blob, or `None` if nothing was saved under this name
    fn load(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    fn save(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;
}

/// [`KeyStorage`] backed by one JSON file per namespace
#[derive(Debug, Clone)]
pub struct FileKeyStorage {
    dir: PathBuf,
}

impl FileKeyStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{}.json", namespace))
    }

    fn read_namespace(&self, namespace: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let path = self.path(namespace);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl KeyStorage for FileKeyStorage {
    fn load(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read_namespace(namespace)?.remove(key))
    }

    fn save(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.read_namespace(namespace)?;
        entries.insert(key.to_string(), value.to_vec());
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(namespace), serde_json::to_string_pretty(&entries)?)?;
        debug!("Saved {}/{} ({} bytes)", namespace, key, value.len());
        Ok(())
    }
}

/// Run the initiator side of the handshake
///
/// # Arguments
///
/// * `port` - Pairing serial link
/// * `own_mac` - This node's radio MAC, sent to the responder
/// * `response_timeout` - How long to wait for the responder's MAC
///
/// # Returns
///
/// The generated keys with the responder's MAC filled in
pub async fn pair_as_initiator<P: SerialPortIO + ?Sized>(
    port: &mut P,
    own_mac: [u8; MAC_SIZE],
    response_timeout: Duration,
) -> Result<PairingData> {
    let mut data = PairingData::random(own_mac);
    port.write_all(&data.to_bytes()).await?;
    port.flush().await?;

    let mut peer_mac = [0u8; MAC_SIZE];
    tokio::time::timeout(response_timeout, port.read_exact(&mut peer_mac))
        .await
        .map_err(|_| FpvLinkError::Pairing("Timed out waiting for peer MAC".to_string()))??;

    data.peer_mac = peer_mac;
    info!("Paired with {}", format_mac(&peer_mac));
    Ok(data)
}

/// Run the responder side of the handshake
///
/// # Returns
///
/// The received keys; the MAC field holds the initiator's MAC
pub async fn pair_as_responder<P: SerialPortIO + ?Sized>(
    port: &mut P,
    own_mac: [u8; MAC_SIZE],
    response_timeout: Duration,
) -> Result<PairingData> {
    let mut blob = [0u8; PAIRING_DATA_SIZE];
    tokio::time::timeout(response_timeout, port.read_exact(&mut blob))
        .await
        .map_err(|_| FpvLinkError::Pairing("Timed out waiting for pairing blob".to_string()))??;
    let data = PairingData::from_bytes(&blob)?;

    port.write_all(&own_mac).await?;
    port.flush().await?;

    info!("Paired with {}", format_mac(&data.peer_mac));
    Ok(data)
}

/// Loads, pairs and persists node keys
pub struct KeyManager<S: KeyStorage> {
    storage: S,
    namespace: String,
    key: String,
    response_timeout: Duration,
}

impl<S: KeyStorage> KeyManager<S> {
    pub fn new(storage: S, config: &PairingConfig) -> Self {
        Self {
            storage,
            namespace: config.namespace.clone(),
            key: config.key.clone(),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
        }
    }

    /// Load stored keys
    ///
    /// A missing or malformed blob is replaced by an all-zero blob, which is
    /// saved so the next boot finds a valid entry.
    pub fn load(&self) -> Result<PairingData> {
        let stored = self.storage.load(&self.namespace, &self.key)?;
        match stored.as_deref().map(PairingData::from_bytes) {
            Some(Ok(data)) => {
                debug!("Loaded keys for peer {}", format_mac(&data.peer_mac));
                Ok(data)
            }
            Some(Err(e)) => {
                warn!("Stored keys unusable ({}), resetting to zero keys", e);
                self.save(&PairingData::default())?;
                Ok(PairingData::default())
            }
            None => {
                warn!("No keys stored under {}/{}, link runs with zero keys", self.namespace, self.key);
                self.save(&PairingData::default())?;
                Ok(PairingData::default())
            }
        }
    }

    pub fn save(&self, data: &PairingData) -> Result<()> {
        self.storage.save(&self.namespace, &self.key, &data.to_bytes())
    }

    /// Pair over `port` in the given role and force-save the result
    pub async fn pair<P: SerialPortIO + ?Sized>(
        &self,
        port: &mut P,
        role: PairingRole,
        own_mac: [u8; MAC_SIZE],
    ) -> Result<PairingData> {
        let data = match role {
            PairingRole::Initiator => pair_as_initiator(port, own_mac, self.response_timeout).await?,
            PairingRole::Responder => pair_as_responder(port, own_mac, self.response_timeout).await?,
        };
        self.save(&data)?;
        Ok(data)
    }

    /// Boot-time key selection
    ///
    /// # Arguments
    ///
    /// * `pair_requested` - Pairing pin level (high requests pairing)
    /// * `port` - Pairing link, required only when pairing is requested
    ///
    /// # Errors
    ///
    /// Returns a pairing error if pairing is requested without a port.
    pub async fn load_or_pair<P: SerialPortIO + ?Sized>(
        &self,
        pair_requested: bool,
        port: Option<&mut P>,
        role: PairingRole,
        own_mac: [u8; MAC_SIZE],
    ) -> Result<PairingData> {
        if !pair_requested {
            return self.load();
        }
        let port = port.ok_or_else(|| FpvLinkError::Pairing("Pairing requested without a serial port".to_string()))?;
        info!("Pairing requested, running handshake as {:?}", role);
        self.pair(port, role, own_mac).await
    }
}

/// Colon-separated hex MAC
pub fn format_mac(mac: &[u8; MAC_SIZE]) -> String {
    mac.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use crate::serial::StreamPort;
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use std::io;
    use tempfile::TempDir;

    const RX_MAC: [u8; 6] = [0x24, 0x0A, 0xC4, 0x00, 0x00, 0x01];
    const TX_MAC: [u8; 6] = [0x24, 0x0A, 0xC4, 0x00, 0x00, 0x02];

    /// Port that never delivers a byte
    struct SilentPort;

    #[async_trait]
    impl SerialPortIO for SilentPort {
        async fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        async fn read_exact(&mut self, _buf: &mut [u8]) -> io::Result<()> {
            std::future::pending().await
        }
    }

    fn test_config() -> PairingConfig {
        PairingConfig {
            namespace: "storage".to_string(),
            key: "sync_keys".to_string(),
            response_timeout_ms: 2000,
            ..PairingConfig::default()
        }
    }

    #[test]
    fn test_blob_layout() {
        let data = PairingData {
            peer_mac: RX_MAC,
            local_master_key: [1; 16],
            primary_master_key: [2; 16],
            aes_key: [3; 16],
        };
        let bytes = data.to_bytes();

        assert_eq!(bytes.len(), 54);
        assert_eq!(&bytes[..6], &RX_MAC);
        assert_eq!(bytes[6], 1);
        assert_eq!(bytes[22], 2);
        assert_eq!(bytes[53], 3);
        assert_eq!(PairingData::from_bytes(&bytes).unwrap(), data);
        assert!(PairingData::from_bytes(&bytes[..53]).is_err());
    }

    #[test]
    fn test_random_keys_differ() {
        let a = PairingData::random(RX_MAC);
        let b = PairingData::random(RX_MAC);

        assert_eq!(a.peer_mac, RX_MAC);
        assert_ne!(a.aes_key, b.aes_key);
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac(&RX_MAC), "24:0A:C4:00:00:01");
    }

    #[tokio::test]
    async fn test_initiator_and_responder_agree() {
        let mut rx_port = MockSerialPort::new();
        rx_port.queue_rx(&TX_MAC);
        let initiator = pair_as_initiator(&mut rx_port, RX_MAC, Duration::from_secs(1)).await.unwrap();

        let sent = rx_port.get_written_data();
        assert_eq!(sent[0].len(), PAIRING_DATA_SIZE);
        assert_eq!(&sent[0][..6], &RX_MAC);

        let mut tx_port = MockSerialPort::new();
        tx_port.queue_rx(&sent[0]);
        let responder = pair_as_responder(&mut tx_port, TX_MAC, Duration::from_secs(1)).await.unwrap();

        assert_eq!(tx_port.get_written_data(), vec![TX_MAC.to_vec()]);
        assert_eq!(initiator.peer_mac, TX_MAC);
        assert_eq!(responder.peer_mac, RX_MAC);
        assert_eq!(initiator.aes_key, responder.aes_key);
        assert_eq!(initiator.local_master_key, responder.local_master_key);
        assert_eq!(initiator.primary_master_key, responder.primary_master_key);
    }

    #[tokio::test]
    async fn test_handshake_over_stream() {
        let (a, b) = tokio::io::duplex(128);
        let mut rx_port = StreamPort::new(a);
        let mut tx_port = StreamPort::new(b);

        let (initiator, responder) = tokio::join!(
            pair_as_initiator(&mut rx_port, RX_MAC, Duration::from_secs(1)),
            pair_as_responder(&mut tx_port, TX_MAC, Duration::from_secs(1)),
        );
        let (initiator, responder) = (initiator.unwrap(), responder.unwrap());

        assert_eq!(initiator.peer_mac, TX_MAC);
        assert_eq!(responder.peer_mac, RX_MAC);
        assert_eq!(initiator.aes_key, responder.aes_key);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initiator_times_out() {
        let mut port = SilentPort;
        let result = pair_as_initiator(&mut port, RX_MAC, Duration::from_millis(2000)).await;

        assert!(matches!(result, Err(FpvLinkError::Pairing(msg)) if msg.contains("Timed out")));
    }

    #[tokio::test]
    async fn test_responder_write_error() {
        let mut port = MockSerialPort::new();
        port.queue_rx(&PairingData::random(RX_MAC).to_bytes());
        port.set_write_error(io::ErrorKind::BrokenPipe);

        let result = pair_as_responder(&mut port, TX_MAC, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(FpvLinkError::Io(_))));
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = FileKeyStorage::new(dir.path().join("keys"));

        assert_eq!(storage.load("storage", "sync_keys").unwrap(), None);
        storage.save("storage", "sync_keys", &[1, 2, 3]).unwrap();
        storage.save("storage", "other", &[4]).unwrap();

        assert_eq!(storage.load("storage", "sync_keys").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(storage.load("storage", "other").unwrap(), Some(vec![4]));
        assert!(dir.path().join("keys").join("storage.json").exists());
    }

    #[test]
    fn test_file_storage_corrupt_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("storage.json"), "not json").unwrap();
        let storage = FileKeyStorage::new(dir.path());

        assert!(matches!(storage.load("storage", "sync_keys"), Err(FpvLinkError::Json(_))));
    }

    #[test]
    fn test_load_existing_keys() {
        let data = PairingData::random(TX_MAC);
        let mut storage = MockKeyStorage::new();
        storage
            .expect_load()
            .with(eq("storage"), eq("sync_keys"))
            .times(1)
            .returning(move |_, _| Ok(Some(data.to_bytes().to_vec())));
        storage.expect_save().never();

        let manager = KeyManager::new(storage, &test_config());
        assert_eq!(manager.load().unwrap(), data);
    }

    #[test]
    fn test_load_absent_saves_zero_blob() {
        let mut storage = MockKeyStorage::new();
        storage.expect_load().times(1).returning(|_, _| Ok(None));
        storage
            .expect_save()
            .with(eq("storage"), eq("sync_keys"), eq(vec![0u8; PAIRING_DATA_SIZE]))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let manager = KeyManager::new(storage, &test_config());
        assert_eq!(manager.load().unwrap(), PairingData::default());
    }

    #[tokio::test]
    async fn test_load_or_pair_pairs_and_saves() {
        let dir = TempDir::new().unwrap();
        let manager = KeyManager::new(FileKeyStorage::new(dir.path()), &test_config());
        let mut port = MockSerialPort::new();
        port.queue_rx(&TX_MAC);

        let paired = manager
            .load_or_pair(true, Some(&mut port), PairingRole::Initiator, RX_MAC)
            .await
            .unwrap();

        assert_eq!(paired.peer_mac, TX_MAC);
        assert_eq!(manager.load().unwrap(), paired);
    }

    #[tokio::test]
    async fn test_load_or_pair_without_port() {
        let dir = TempDir::new().unwrap();
        let manager = KeyManager::new(FileKeyStorage::new(dir.path()), &test_config());

        let result = manager
            .load_or_pair::<MockSerialPort>(true, None, PairingRole::Responder, TX_MAC)
            .await;
        assert!(matches!(result, Err(FpvLinkError::Pairing(_))));
    }
}
