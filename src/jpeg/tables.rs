//! # Quantization and Huffman Tables
//!
//! Builds decode tables from DQT/DHT segments and accounts their memory
//! against the decoder pool.

use super::JpegError;

/// Zigzag-order to raster-order conversion table
pub const ZIGZAG: [u8; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5,
    12, 19, 26, 33, 40, 48, 41, 34, 27, 20, 13, 6, 7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Input scale factors of the Arai algorithm, scaled by 8192
pub const IPSF: [u16; 64] = [
    8192, 11362, 10703, 9632, 8192, 6436, 4433, 2260,
    11362, 15760, 14846, 13361, 11362, 8927, 6149, 3134,
    10703, 14846, 13984, 12585, 10703, 8409, 5792, 2953,
    9632, 13361, 12585, 11326, 9632, 7568, 5213, 2657,
    8192, 11362, 10703, 9632, 8192, 6436, 4433, 2260,
    6436, 8927, 8409, 7568, 6436, 5057, 3483, 1775,
    4433, 6149, 5792, 5213, 4433, 3483, 2399, 1223,
    2260, 3134, 2953, 2657, 2260, 1775, 1223, 623,
];

/// Ordered dither offsets added to luma, one row of 32 per frame phase
pub const BAYER: [[i8; 32]; 8] = [
    [0, 4, 1, 5, 0, 4, 1, 5, -2, 2, -1, 3, -2, 2, -1, 3, 1, 5, 0, 4, 1, 5, 0, 4, -1, 3, -2, 2, -1, 3, -2, 2],
    [1, 5, 0, 4, 1, 5, 0, 4, -1, 3, -2, 2, -1, 3, -2, 2, 0, 4, 1, 5, 0, 4, 1, 5, -2, 2, -1, 3, -2, 2, -1, 3],
    [2, -1, 3, -2, 2, -1, 3, -2, 5, 0, 4, 1, 5, 0, 4, 1, 3, -2, 2, -1, 3, -2, 2, -1, 4, 1, 5, 0, 4, 1, 5, 0],
    [3, -2, 2, -1, 3, -2, 2, -1, 4, 1, 5, 0, 4, 1, 5, 0, 2, -1, 3, -2, 2, -1, 3, -2, 5, 0, 4, 1, 5, 0, 4, 1],
    [4, 1, 5, 0, 4, 1, 5, 0, 2, -1, 3, -2, 2, -1, 3, -2, 5, 0, 4, 1, 5, 0, 4, 1, 3, -2, 2, -1, 3, -2, 2, -1],
    [5, 0, 4, 1, 5, 0, 4, 1, 3, -2, 2, -1, 3, -2, 2, -1, 4, 1, 5, 0, 4, 1, 5, 0, 2, -1, 3, -2, 2, -1, 3, -2],
    [-2, 2, -1, 3, -2, 2, -1, 3, 1, 5, 0, 4, 1, 5, 0, 4, -1, 3, -2, 2, -1, 3, -2, 2, 0, 4, 1, 5, 0, 4, 1, 5],
    [-1, 3, -2, 2, -1, 3, -2, 2, 0, 4, 1, 5, 0, 4, 1, 5, -2, 2, -1, 3, -2, 2, -1, 3, 1, 5, 0, 4, 1, 5, 0, 4],
];

/// Maximum number of code words in one Huffman table
pub const HUFFMAN_MAX_CODES: usize = 256;

/// Bump accountant for decoder table memory
///
/// Tracks how much of a fixed-size pool the current image's tables
/// consume. Blocks are rounded up to 4 bytes. The pool is only ever reset
/// as a whole, at the start of the next `prepare`.
#[derive(Debug, Clone)]
pub struct MemoryPool {
    capacity: usize,
    used: usize,
}

impl MemoryPool {
    /// Create an empty pool of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self { capacity, used: 0 }
    }

    /// Reserve `size` bytes, word aligned
    ///
    /// # Errors
    ///
    /// Returns [`JpegError::InsufficientMemory`] when the pool cannot hold the block
    pub fn alloc(&mut self, size: usize) -> Result<(), JpegError> {
        let size = (size + 3) & !3;
        if self.capacity - self.used < size {
            return Err(JpegError::InsufficientMemory);
        }
        self.used += size;
        Ok(())
    }

    /// Release every block
    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Bytes currently reserved
    pub fn used(&self) -> usize {
        self.used
    }

    /// Total pool size
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// De-quantization table with Arai prescaling applied, raster order
pub type QuantTable = [i32; 64];

/// Canonical Huffman table for one class/id pair
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    /// Number of code words for each bit length 1..=16
    pub bits: [u8; 16],
    /// Code words in ascending length order
    pub codes: heapless::Vec<u16, HUFFMAN_MAX_CODES>,
    /// Decoded value for each code word
    pub values: heapless::Vec<u8, HUFFMAN_MAX_CODES>,
}

impl HuffmanTable {
    /// Build the canonical code word table from a bit-length histogram
    ///
    /// # Errors
    ///
    /// Returns [`JpegError::InsufficientMemory`] if the table has more than
    /// 256 entries, or [`JpegError::Format`] if `values` is shorter than the
    /// histogram promises.
    pub fn new(bits: [u8; 16], values: &[u8]) -> Result<Self, JpegError> {
        let total: usize = bits.iter().map(|&b| b as usize).sum();
        if values.len() < total {
            return Err(JpegError::Format);
        }

        let mut codes = heapless::Vec::new();
        let mut code: u16 = 0;
        for &count in &bits {
            for _ in 0..count {
                codes.push(code).map_err(|_| JpegError::InsufficientMemory)?;
                code = code.wrapping_add(1);
            }
            code = code.wrapping_shl(1);
        }

        let values = heapless::Vec::from_slice(&values[..total])
            .map_err(|_| JpegError::InsufficientMemory)?;

        Ok(Self { bits, codes, values })
    }

    /// Look up the value for `code` among the codes of length `len` (1..=16)
    ///
    /// `first` is the index of the first code of that length.
    pub fn lookup(&self, len: usize, first: usize, code: u16) -> Option<u8> {
        let count = self.bits[len - 1] as usize;
        (first..first + count)
            .find(|&i| self.codes.get(i) == Some(&code))
            .and_then(|i| self.values.get(i).copied())
    }
}

/// Parse every table in a DQT segment
///
/// Each 65-byte entry carries a precision/id byte and 64 zigzag-ordered
/// 8-bit quantizers. Only 8-bit precision is accepted.
///
/// # Errors
///
/// - [`JpegError::Format`] for 16-bit precision or a truncated segment
/// - [`JpegError::InsufficientMemory`] when the pool is exhausted
pub fn parse_dqt(
    mut segment: &[u8],
    pool: &mut MemoryPool,
    tables: &mut [Option<QuantTable>; 4],
) -> Result<(), JpegError> {
    loop {
        if segment.len() < 65 {
            return Err(JpegError::Format);
        }
        let property = segment[0];
        if property & 0xF0 != 0 {
            return Err(JpegError::Format);
        }
        pool.alloc(64 * std::mem::size_of::<i32>())?;

        let mut table = [0i32; 64];
        for (i, &raw) in segment[1..65].iter().enumerate() {
            let z = ZIGZAG[i] as usize;
            table[z] = raw as i32 * IPSF[z] as i32;
        }
        tables[(property & 3) as usize] = Some(table);

        segment = &segment[65..];
        if segment.is_empty() {
            return Ok(());
        }
    }
}

/// Parse every table in a DHT segment
///
/// Tables are stored as `tables[id][class]` where class 0 is DC and 1 is AC.
///
/// # Errors
///
/// - [`JpegError::Format`] for a class/id other than 0 or 1, or a truncated segment
/// - [`JpegError::InsufficientMemory`] when the pool is exhausted
pub fn parse_dht(
    mut segment: &[u8],
    pool: &mut MemoryPool,
    tables: &mut [[Option<HuffmanTable>; 2]; 2],
) -> Result<(), JpegError> {
    loop {
        if segment.len() < 17 {
            return Err(JpegError::Format);
        }
        let property = segment[0];
        if property & 0xEE != 0 {
            return Err(JpegError::Format);
        }
        let class = (property >> 4) as usize;
        let id = (property & 0x0F) as usize;

        pool.alloc(16)?;
        let mut bits = [0u8; 16];
        bits.copy_from_slice(&segment[1..17]);
        let count: usize = bits.iter().map(|&b| b as usize).sum();

        pool.alloc(count * std::mem::size_of::<u16>())?;
        pool.alloc(count)?;

        let values = segment.get(17..17 + count).ok_or(JpegError::Format)?;
        tables[id][class] = Some(HuffmanTable::new(bits, values)?);

        segment = &segment[17 + count..];
        if segment.is_empty() {
            return Ok(());
        }
    }
}
