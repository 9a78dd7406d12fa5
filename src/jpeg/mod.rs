//! # Tiny JPEG Decoder
//!
//! Streaming baseline JPEG decompressor sized for the FPV frame path.
//!
//! This module handles:
//! - Parsing DQT/DHT/SOF0/DRI/SOS header segments into decode tables
//! - Bit-level Huffman extraction with byte-stuffing and restart markers
//! - Fixed-point (Arai) inverse DCT with a flat-block fast path
//! - YCbCr to RGB565 conversion with ordered dithering
//! - Delivering each decoded MCU as a tile through a callback
//!
//! Only baseline Huffman JPEG with 4:4:4, 4:2:2 and 4:2:0 sampling is
//! supported. Table memory is accounted against a caller-sized pool and
//! every working buffer is a fixed-size array, so decoding a frame never
//! touches the heap.

pub mod bitstream;
pub mod decoder;
pub mod idct;
pub mod tables;

pub use bitstream::{JpegSource, SliceSource};
pub use decoder::{JpegDecoder, Rect, TILE_MAX_PIXELS};

use thiserror::Error;

/// Size of the stream input buffer. Every header segment must fit in it.
pub const SEGMENT_BUFFER_SIZE: usize = 512;

/// Default decoder pool size in bytes
pub const DEFAULT_POOL_SIZE: usize = 3100;

/// Decoder result codes
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JpegError {
    /// Output callback requested cancellation
    #[error("decompression interrupted by output callback")]
    Interrupted,

    /// Input source exhausted or failed
    #[error("input stream exhausted")]
    Input,

    /// Table pool exhausted
    #[error("insufficient memory pool for decode tables")]
    InsufficientMemory,

    /// Header segment larger than the stream buffer
    #[error("insufficient stream buffer for header segment")]
    InsufficientBuffer,

    /// Decoder used out of sequence
    #[error("invalid parameter")]
    Parameter,

    /// Malformed stream (bad marker, bad stuffing, missing table)
    #[error("data format error")]
    Format,

    /// Valid JPEG that this decoder does not support (progressive, 4:1:1, grayscale)
    #[error("unsupported JPEG format")]
    UnsupportedFormat,
}
