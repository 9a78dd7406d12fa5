//! # Bitstream Extractor
//!
//! Buffered byte input with JPEG entropy-coded segment rules.

use super::tables::HuffmanTable;
use super::{JpegError, SEGMENT_BUFFER_SIZE};

/// Source of compressed JPEG bytes
///
/// `read` fills as much of `buf` as it can and returns the byte count.
/// Returning 0 signals that the stream is exhausted.
pub trait JpegSource {
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

/// [`JpegSource`] over an in-memory byte slice
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl JpegSource for SliceSource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Stream buffer and bit cursor shared by header parsing and scan decoding
#[derive(Debug)]
pub struct BitReader {
    buf: [u8; SEGMENT_BUFFER_SIZE],
    pos: usize,
    end: usize,
    word: u32,
    bits: u32,
}

impl Default for BitReader {
    fn default() -> Self {
        Self::new()
    }
}

impl BitReader {
    pub fn new() -> Self {
        Self {
            buf: [0; SEGMENT_BUFFER_SIZE],
            pos: 0,
            end: 0,
            word: 0,
            bits: 0,
        }
    }

    /// Drop buffered bytes and bits before a new image
    pub fn reset(&mut self) {
        self.pos = 0;
        self.end = 0;
        self.word = 0;
        self.bits = 0;
    }

    /// Load the next `len` bytes as one contiguous header segment
    ///
    /// # Errors
    ///
    /// - [`JpegError::InsufficientBuffer`] if `len` exceeds the stream buffer
    /// - [`JpegError::Input`] if the source runs dry first
    pub fn load<S: JpegSource + ?Sized>(&mut self, src: &mut S, len: usize) -> Result<&[u8], JpegError> {
        if len > SEGMENT_BUFFER_SIZE {
            return Err(JpegError::InsufficientBuffer);
        }
        if self.end - self.pos < len {
            self.buf.copy_within(self.pos..self.end, 0);
            self.end -= self.pos;
            self.pos = 0;
            while self.end < len {
                let n = src.read(&mut self.buf[self.end..]);
                if n == 0 {
                    return Err(JpegError::Input);
                }
                self.end += n;
            }
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..start + len])
    }

    /// Next byte with no stuffing interpretation
    pub fn next_raw<S: JpegSource + ?Sized>(&mut self, src: &mut S) -> Result<u8, JpegError> {
        if self.pos == self.end {
            self.end = src.read(&mut self.buf);
            self.pos = 0;
            if self.end == 0 {
                return Err(JpegError::Input);
            }
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Next entropy-coded byte, collapsing `FF 00` into a literal 0xFF
    fn next_data<S: JpegSource + ?Sized>(&mut self, src: &mut S) -> Result<u8, JpegError> {
        let b = self.next_raw(src)?;
        if b == 0xFF && self.next_raw(src)? != 0x00 {
            return Err(JpegError::Format);
        }
        Ok(b)
    }

    /// Extract `count` bits MSB-first (1..=16)
    ///
    /// # Errors
    ///
    /// Returns [`JpegError::Format`] for a count outside 1..=16.
    pub fn bits<S: JpegSource + ?Sized>(&mut self, src: &mut S, count: u32) -> Result<u16, JpegError> {
        if count == 0 || count > 16 {
            return Err(JpegError::Format);
        }
        while self.bits < count {
            self.word = (self.word << 8) | self.next_data(src)? as u32;
            self.bits += 8;
        }
        self.bits -= count;
        Ok(((self.word >> self.bits) & ((1 << count) - 1)) as u16)
    }

    /// Decode one Huffman symbol, walking code lengths 1..=16
    ///
    /// # Errors
    ///
    /// Returns [`JpegError::Format`] if no code of any length matches.
    pub fn huffman<S: JpegSource + ?Sized>(
        &mut self,
        src: &mut S,
        table: &HuffmanTable,
    ) -> Result<u8, JpegError> {
        let mut code: u16 = 0;
        let mut first = 0usize;
        for len in 1..=16 {
            code = (code << 1) | self.bits(src, 1)?;
            if let Some(value) = table.lookup(len, first, code) {
                return Ok(value);
            }
            first += table.bits[len - 1] as usize;
        }
        Err(JpegError::Format)
    }

    /// Consume the RSTn marker expected after a restart interval
    ///
    /// Pending bits are discarded. The marker must be `FF D0`..`FF D7` with
    /// its low three bits equal to `rstn & 7`.
    pub fn restart<S: JpegSource + ?Sized>(&mut self, src: &mut S, rstn: u16) -> Result<(), JpegError> {
        self.bits = 0;
        let marker = (self.next_raw(src)? as u16) << 8 | self.next_raw(src)? as u16;
        if marker & 0xFFD8 != 0xFFD0 || marker & 7 != rstn & 7 {
            return Err(JpegError::Format);
        }
        Ok(())
    }

    /// Discard pending bits at the start of a scan
    pub fn align(&mut self) {
        self.bits = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_msb_first() {
        let data = [0b1011_0010, 0b0111_0000];
        let mut src = SliceSource::new(&data);
        let mut reader = BitReader::new();

        assert_eq!(reader.bits(&mut src, 1).unwrap(), 1);
        assert_eq!(reader.bits(&mut src, 3).unwrap(), 0b011);
        assert_eq!(reader.bits(&mut src, 6).unwrap(), 0b0010_01);
        assert_eq!(reader.bits(&mut src, 3).unwrap(), 0b110);
    }

    #[test]
    fn test_stuffed_ff_is_literal() {
        let data = [0xFF, 0x00, 0x80];
        let mut src = SliceSource::new(&data);
        let mut reader = BitReader::new();

        assert_eq!(reader.bits(&mut src, 8).unwrap(), 0xFF);
        assert_eq!(reader.bits(&mut src, 1).unwrap(), 1);
    }

    #[test]
    fn test_unstuffed_ff_is_format_error() {
        let data = [0xFF, 0xD9];
        let mut src = SliceSource::new(&data);
        let mut reader = BitReader::new();

        assert_eq!(reader.bits(&mut src, 4), Err(JpegError::Format));
    }

    #[test]
    fn test_bit_count_out_of_range() {
        let data = [0x12, 0x34, 0x56];
        let mut src = SliceSource::new(&data);
        let mut reader = BitReader::new();

        assert_eq!(reader.bits(&mut src, 0), Err(JpegError::Format));
        assert_eq!(reader.bits(&mut src, 17), Err(JpegError::Format));
        assert_eq!(reader.bits(&mut src, 32), Err(JpegError::Format));
        assert_eq!(reader.bits(&mut src, 16).unwrap(), 0x1234);
    }

    #[test]
    fn test_exhausted_input() {
        let data = [0xAA];
        let mut src = SliceSource::new(&data);
        let mut reader = BitReader::new();

        assert_eq!(reader.bits(&mut src, 8).unwrap(), 0xAA);
        assert_eq!(reader.bits(&mut src, 1), Err(JpegError::Input));
    }

    #[test]
    fn test_huffman_decode() {
        let bits = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
        let values: Vec<u8> = (0..12).collect();
        let table = HuffmanTable::new(bits, &values).unwrap();
        // 00 -> 0, 011 -> 2, 1110 -> 6, then padding ones
        let data = [0b0001_1111, 0b0111_1111];
        let mut src = SliceSource::new(&data);
        let mut reader = BitReader::new();

        assert_eq!(reader.huffman(&mut src, &table).unwrap(), 0);
        assert_eq!(reader.huffman(&mut src, &table).unwrap(), 2);
        assert_eq!(reader.huffman(&mut src, &table).unwrap(), 6);
    }

    #[test]
    fn test_huffman_no_match() {
        let bits = [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let table = HuffmanTable::new(bits, &[7]).unwrap();
        let data = [0xFF, 0x00, 0xFF, 0x00];
        let mut src = SliceSource::new(&data);
        let mut reader = BitReader::new();

        assert_eq!(reader.huffman(&mut src, &table), Err(JpegError::Format));
    }

    #[test]
    fn test_restart_marker_sequence() {
        let data = [0xFF, 0xD3, 0xFF, 0xD5];
        let mut src = SliceSource::new(&data);
        let mut reader = BitReader::new();

        assert!(reader.restart(&mut src, 11).is_ok());
        assert_eq!(reader.restart(&mut src, 4), Err(JpegError::Format));
    }

    #[test]
    fn test_load_segment_too_large() {
        let data = [0u8; 16];
        let mut src = SliceSource::new(&data);
        let mut reader = BitReader::new();

        assert_eq!(
            reader.load(&mut src, SEGMENT_BUFFER_SIZE + 1).unwrap_err(),
            JpegError::InsufficientBuffer
        );
    }

    #[test]
    fn test_load_segments_across_refills() {
        let data: Vec<u8> = (0..=255u8).cycle().take(900).collect();
        let mut src = SliceSource::new(&data);
        let mut reader = BitReader::new();

        assert_eq!(reader.load(&mut src, 300).unwrap()[299], 43);
        let second = reader.load(&mut src, 400).unwrap();
        assert_eq!(second[0], 44);
        assert_eq!(second[399], ((300 + 399) % 256) as u8);
        assert_eq!(reader.next_raw(&mut src).unwrap(), (700 % 256) as u8);
    }
}
