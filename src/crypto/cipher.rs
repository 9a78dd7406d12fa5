//! # Encryption Gate
//!
//! Runs the first 16 payload bytes of a packet through a block cipher.
//! Header bytes and payload bytes past the first block travel in the clear.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::protocol::Packet;

/// Cipher block and key size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Single-block cipher primitive
pub trait BlockCipher: Send + Sync {
    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]);
    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]);
}

impl<C: BlockCipher + ?Sized> BlockCipher for Box<C> {
    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        (**self).encrypt_block(block)
    }

    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        (**self).decrypt_block(block)
    }
}

/// Gate over a runtime-selected cipher
pub type DynEncryptionGate = EncryptionGate<Box<dyn BlockCipher>>;

/// AES-128 in single-block mode
#[derive(Clone)]
pub struct Aes128Cipher {
    inner: Aes128,
}

impl std::fmt::Debug for Aes128Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes128Cipher").finish_non_exhaustive()
    }
}

impl Aes128Cipher {
    pub fn new(key: &[u8; BLOCK_SIZE]) -> Self {
        Self {
            inner: Aes128::new(&GenericArray::from(*key)),
        }
    }
}

impl BlockCipher for Aes128Cipher {
    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let mut b = GenericArray::from(*block);
        self.inner.encrypt_block(&mut b);
        block.copy_from_slice(&b);
    }

    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let mut b = GenericArray::from(*block);
        self.inner.decrypt_block(&mut b);
        block.copy_from_slice(&b);
    }
}

/// Applies a [`BlockCipher`] to packet payloads
pub struct EncryptionGate<C: BlockCipher> {
    cipher: C,
}

impl<C: BlockCipher> EncryptionGate<C> {
    pub fn new(cipher: C) -> Self {
        Self { cipher }
    }

    /// Encrypt the first payload block in place and set the encrypted flag
    ///
    /// Payloads shorter than one block are left untouched and unflagged.
    ///
    /// # Returns
    ///
    /// `true` if the packet was encrypted
    pub fn seal(&self, packet: &mut Packet) -> bool {
        let Some(block) = first_block(packet) else {
            return false;
        };
        self.cipher.encrypt_block(block);
        packet.header.encrypted = true;
        true
    }

    /// Reverse [`seal`](Self::seal) on a packet flagged as encrypted
    ///
    /// Unflagged packets pass through unchanged. A flagged packet too short
    /// to hold a block is left as is and reported as `false`.
    pub fn open(&self, packet: &mut Packet) -> bool {
        if !packet.header.encrypted {
            return true;
        }
        let Some(block) = first_block(packet) else {
            return false;
        };
        self.cipher.decrypt_block(block);
        packet.header.encrypted = false;
        true
    }
}

fn first_block(packet: &mut Packet) -> Option<&mut [u8; BLOCK_SIZE]> {
    packet.payload.get_mut(..BLOCK_SIZE)?.try_into().ok()
}
