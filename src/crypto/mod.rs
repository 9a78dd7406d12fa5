//! # Link Security
//!
//! Payload encryption gate and the pairing handshake that distributes its key.

pub mod cipher;
pub mod pairing;

pub use cipher::{Aes128Cipher, BlockCipher, EncryptionGate, BLOCK_SIZE};
pub use pairing::{FileKeyStorage, KeyManager, KeyStorage, PairingData, PairingRole};
