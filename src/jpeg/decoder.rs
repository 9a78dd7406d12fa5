//! # JPEG Streaming Decoder
//!
//! Drives header parsing, MCU decoding and tile output.

use tracing::trace;

use super::bitstream::{BitReader, JpegSource};
use super::idct::{block_idct, clip8};
use super::tables::{self, HuffmanTable, MemoryPool, QuantTable, BAYER, ZIGZAG};
use super::{JpegError, DEFAULT_POOL_SIZE, SEGMENT_BUFFER_SIZE};

/// Largest tile the decoder emits (one 16x16 MCU)
pub const TILE_MAX_PIXELS: usize = 256;

/// Blocks in the largest MCU: four luma plus Cb and Cr
const MCU_MAX_BLOCKS: usize = 6;

/// Largest DC magnitude category of 8-bit baseline JPEG
const MAX_DC_CATEGORY: u8 = 11;

/// JPEG marker codes
mod markers {
    pub const SOI: [u8; 2] = [0xFF, 0xD8];
    pub const SOF0: u8 = 0xC0;
    pub const DHT: u8 = 0xC4;
    pub const DQT: u8 = 0xDB;
    pub const DRI: u8 = 0xDD;
    pub const SOS: u8 = 0xDA;
    pub const EOI: u8 = 0xD9;
}

// Chroma conversion factors (ITU-R BT.601)
const FRR: f32 = 1.402;
const FGR: f32 = 0.71414;
const FGB: f32 = 0.34414;
const FBB: f32 = 1.772;

/// Inclusive pixel rectangle of one decoded tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

impl Rect {
    pub fn width(&self) -> u16 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> u16 {
        self.bottom - self.top + 1
    }

    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }
}

/// Pack 8-bit RGB into RGB565
#[inline]
pub fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// Baseline JPEG decompressor
///
/// One decoder is reused for every frame. Call [`prepare`](Self::prepare)
/// to parse the header segments, then [`decompress`](Self::decompress) with
/// the same source to decode the scan.
///
/// # Examples
///
/// ```
/// use fpv_link::jpeg::{JpegDecoder, SliceSource};
///
/// # fn demo(jpeg: &[u8]) -> Result<(), fpv_link::jpeg::JpegError> {
/// let mut decoder = JpegDecoder::default();
/// let mut src = SliceSource::new(jpeg);
/// decoder.prepare(&mut src)?;
/// decoder.decompress(&mut src, |rect, pixels| {
///     assert_eq!(pixels.len(), rect.pixel_count());
///     true
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct JpegDecoder {
    pool: MemoryPool,
    reader: BitReader,
    quant: [Option<QuantTable>; 4],
    huffman: [[Option<HuffmanTable>; 2]; 2],
    quant_ids: [u8; 3],
    width: u16,
    height: u16,
    msx: u8,
    msy: u8,
    restart_interval: u16,
    dc: [i32; 3],
    bayer: usize,
    prepared: bool,
    mcu: [u8; MCU_MAX_BLOCKS * 64],
    work: [i32; 64],
    tile: [u16; TILE_MAX_PIXELS],
}

impl std::fmt::Debug for JpegDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JpegDecoder")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sampling", &(self.msx, self.msy))
            .field("restart_interval", &self.restart_interval)
            .field("pool_used", &self.pool.used())
            .finish_non_exhaustive()
    }
}

impl Default for JpegDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl JpegDecoder {
    /// Create a decoder whose tables must fit in `pool_size` bytes
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool: MemoryPool::new(pool_size),
            reader: BitReader::new(),
            quant: [None; 4],
            huffman: Default::default(),
            quant_ids: [0; 3],
            width: 0,
            height: 0,
            msx: 0,
            msy: 0,
            restart_interval: 0,
            dc: [0; 3],
            bayer: 0,
            prepared: false,
            mcu: [0; MCU_MAX_BLOCKS * 64],
            work: [0; 64],
            tile: [0; TILE_MAX_PIXELS],
        }
    }

    /// Image width in pixels (valid after `prepare`)
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Image height in pixels (valid after `prepare`)
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Luma blocks per MCU as (horizontal, vertical)
    pub fn sampling(&self) -> (u8, u8) {
        (self.msx, self.msy)
    }

    /// MCUs between restart markers, 0 when disabled
    pub fn restart_interval(&self) -> u16 {
        self.restart_interval
    }

    /// Pool bytes consumed by the current image
    pub fn pool_used(&self) -> usize {
        self.pool.used()
    }

    /// Parse header segments up to and including SOS
    ///
    /// All tables from a previous image are discarded first.
    ///
    /// # Errors
    ///
    /// - [`JpegError::Format`] for a missing SOI, malformed marker or missing table
    /// - [`JpegError::UnsupportedFormat`] for non-baseline frames, grayscale or
    ///   unsupported sampling
    /// - [`JpegError::InsufficientMemory`] when tables overflow the pool
    /// - [`JpegError::InsufficientBuffer`] for a segment larger than the stream buffer
    /// - [`JpegError::Input`] when the source ends inside the header
    pub fn prepare<S: JpegSource + ?Sized>(&mut self, src: &mut S) -> Result<(), JpegError> {
        self.prepared = false;
        self.pool.reset();
        self.reader.reset();
        self.quant = [None; 4];
        self.huffman = Default::default();
        self.width = 0;
        self.height = 0;
        self.msx = 0;
        self.msy = 0;
        self.restart_interval = 0;

        self.pool.alloc(SEGMENT_BUFFER_SIZE)?;

        if self.reader.load(src, 2)? != markers::SOI {
            return Err(JpegError::Format);
        }

        loop {
            let head = self.reader.load(src, 4)?;
            if head[0] != 0xFF {
                return Err(JpegError::Format);
            }
            let marker = head[1];
            let len = u16::from_be_bytes([head[2], head[3]]) as usize;
            if len <= 2 {
                return Err(JpegError::Format);
            }
            let segment = self.reader.load(src, len - 2)?;

            match marker {
                markers::SOF0 => {
                    if segment.len() < 6 {
                        return Err(JpegError::Format);
                    }
                    self.height = u16::from_be_bytes([segment[1], segment[2]]);
                    self.width = u16::from_be_bytes([segment[3], segment[4]]);
                    if segment[5] != 3 {
                        return Err(JpegError::UnsupportedFormat);
                    }
                    if segment.len() < 15 {
                        return Err(JpegError::Format);
                    }
                    for i in 0..3 {
                        let sampling = segment[7 + 3 * i];
                        if i == 0 {
                            if !matches!(sampling, 0x11 | 0x22 | 0x21) {
                                return Err(JpegError::UnsupportedFormat);
                            }
                            self.msx = sampling >> 4;
                            self.msy = sampling & 0x0F;
                        } else if sampling != 0x11 {
                            return Err(JpegError::UnsupportedFormat);
                        }
                        let id = segment[8 + 3 * i];
                        if id > 3 {
                            return Err(JpegError::UnsupportedFormat);
                        }
                        self.quant_ids[i] = id;
                    }
                }
                markers::DRI => {
                    if segment.len() < 2 {
                        return Err(JpegError::Format);
                    }
                    self.restart_interval = u16::from_be_bytes([segment[0], segment[1]]);
                }
                markers::DHT => tables::parse_dht(segment, &mut self.pool, &mut self.huffman)?,
                markers::DQT => tables::parse_dqt(segment, &mut self.pool, &mut self.quant)?,
                markers::SOS => {
                    if self.width == 0 || self.height == 0 {
                        return Err(JpegError::Format);
                    }
                    if segment.len() < 7 || segment[0] != 3 {
                        return Err(JpegError::UnsupportedFormat);
                    }
                    for i in 0..3 {
                        let selector = segment[2 + 2 * i];
                        if selector != 0x00 && selector != 0x11 {
                            return Err(JpegError::UnsupportedFormat);
                        }
                        let id = if i == 0 { 0 } else { 1 };
                        if self.huffman[id][0].is_none() || self.huffman[id][1].is_none() {
                            return Err(JpegError::Format);
                        }
                        if self.quant[self.quant_ids[i] as usize].is_none() {
                            return Err(JpegError::Format);
                        }
                    }
                    if self.msx == 0 || self.msy == 0 {
                        return Err(JpegError::Format);
                    }

                    self.reader.align();
                    self.prepared = true;
                    trace!(
                        "JPEG {}x{} sampling {}x{} restart {} pool {}/{}",
                        self.width,
                        self.height,
                        self.msx,
                        self.msy,
                        self.restart_interval,
                        self.pool.used(),
                        self.pool.capacity()
                    );
                    return Ok(());
                }
                0xC1..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF | markers::EOI => {
                    return Err(JpegError::UnsupportedFormat);
                }
                _ => {}
            }
        }
    }

    /// Decode the scan, handing each MCU tile to `output`
    ///
    /// `output` receives the tile rectangle and `rect.pixel_count()` RGB565
    /// pixels in row-major order. Returning `false` aborts decoding.
    ///
    /// # Errors
    ///
    /// - [`JpegError::Parameter`] if `prepare` has not succeeded for this image
    /// - [`JpegError::Interrupted`] if `output` returned `false`
    /// - [`JpegError::Format`] / [`JpegError::Input`] for a corrupt or short scan
    pub fn decompress<S, F>(&mut self, src: &mut S, mut output: F) -> Result<(), JpegError>
    where
        S: JpegSource + ?Sized,
        F: FnMut(&Rect, &[u16]) -> bool,
    {
        if !self.prepared {
            return Err(JpegError::Parameter);
        }
        self.prepared = false;

        self.bayer = (self.bayer + 1) & 7;
        self.dc = [0; 3];

        let mx = self.msx as u16 * 8;
        let my = self.msy as u16 * 8;
        let mut rst: u16 = 0;
        let mut rsc: u16 = 0;

        for y in (0..self.height).step_by(my as usize) {
            for x in (0..self.width).step_by(mx as usize) {
                if self.restart_interval != 0 {
                    if rst == self.restart_interval {
                        self.reader.restart(src, rsc)?;
                        rsc = rsc.wrapping_add(1);
                        self.dc = [0; 3];
                        rst = 0;
                    }
                    rst += 1;
                }

                self.load_mcu(src)?;
                let rect = self.convert_mcu(x, y);
                if !output(&rect, &self.tile[..rect.pixel_count()]) {
                    return Err(JpegError::Interrupted);
                }
            }
        }

        Ok(())
    }

    /// Decode every block of one MCU into `self.mcu`
    fn load_mcu<S: JpegSource + ?Sized>(&mut self, src: &mut S) -> Result<(), JpegError> {
        let luma_blocks = (self.msx * self.msy) as usize;

        for blk in 0..luma_blocks + 2 {
            let cmp = if blk < luma_blocks { 0 } else { blk - luma_blocks + 1 };
            let id = if cmp == 0 { 0 } else { 1 };
            let dc_table = self.huffman[id][0].as_ref().ok_or(JpegError::Format)?;
            let ac_table = self.huffman[id][1].as_ref().ok_or(JpegError::Format)?;
            let quant = self.quant[self.quant_ids[cmp] as usize]
                .as_ref()
                .ok_or(JpegError::Format)?;

            let size = self.reader.huffman(src, dc_table)?;
            if size > MAX_DC_CATEGORY {
                return Err(JpegError::Format);
            }
            if size != 0 {
                let raw = self.reader.bits(src, size as u32)?;
                self.dc[cmp] += extend(raw, size);
            }

            self.work = [0; 64];
            self.work[0] = self.dc[cmp] * quant[0] >> 8;

            let mut has_ac = false;
            let mut i = 1usize;
            while i < 64 {
                let symbol = self.reader.huffman(src, ac_table)?;
                if symbol == 0 {
                    break;
                }
                i += (symbol >> 4) as usize;
                let size = symbol & 0x0F;
                if size != 0 {
                    if i > 63 {
                        return Err(JpegError::Format);
                    }
                    let raw = self.reader.bits(src, size as u32)?;
                    let z = ZIGZAG[i] as usize;
                    self.work[z] = extend(raw, size) * quant[z] >> 8;
                    has_ac = true;
                }
                i += 1;
            }

            let block = &mut self.mcu[blk * 64..(blk + 1) * 64];
            if has_ac {
                block_idct(&mut self.work, block);
            } else {
                block.fill(clip8(self.work[0] / 256 + 128));
            }
        }

        Ok(())
    }

    /// Convert the decoded MCU at (x, y) to RGB565 in `self.tile`
    ///
    /// The tile is clipped at the right and bottom image edges and packed
    /// to the clipped width.
    fn convert_mcu(&mut self, x: u16, y: u16) -> Rect {
        let mx = self.msx as u16 * 8;
        let my = self.msy as u16 * 8;
        let rx = if x + mx <= self.width { mx } else { self.width - x };
        let ry = if y + my <= self.height { my } else { self.height - y };

        let luma_blocks = (self.msx * self.msy) as usize;
        let cb_base = luma_blocks * 64;
        let cr_base = cb_base + 64;
        let x_shift = (self.msx == 2) as u16;
        let y_shift = (self.msy == 2) as u16;
        let dither = &BAYER[self.bayer];

        let mut n = 0;
        for iy in 0..ry {
            for ix in 0..rx {
                let block = (iy / 8) as usize * self.msx as usize + (ix / 8) as usize;
                let luma = self.mcu[block * 64 + (iy % 8) as usize * 8 + (ix % 8) as usize] as i32;

                let c = ((iy >> y_shift) * 8 + (ix >> x_shift)) as usize;
                let cb = self.mcu[cb_base + c] as f32 - 128.0;
                let cr = self.mcu[cr_base + c] as f32 - 128.0;

                let gg = (FGB * cb + FGR * cr) as i32;
                let rr = (FRR * cr) as i32;
                let bb = (FBB * cb) as i32;
                let yy = dither[((iy & 3) << 3) as usize + (ix & 7) as usize] as i32 + luma;

                self.tile[n] = rgb565(clip8(yy + rr), clip8(yy - gg), clip8(yy + bb));
                n += 1;
            }
        }

        Rect {
            left: x,
            top: y,
            right: x + rx - 1,
            bottom: y + ry - 1,
        }
    }
}

/// Restore the sign of a `size`-bit magnitude category value
#[inline]
fn extend(raw: u16, size: u8) -> i32 {
    let v = raw as i32;
    let msb = 1i32 << (size - 1);
    if v & msb == 0 {
        v - ((msb << 1) - 1)
    } else {
        v
    }
}
