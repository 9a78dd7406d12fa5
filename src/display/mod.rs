//! # Display Output
//!
//! Sinks for decoded video tiles and OSD text.
//!
//! This module handles:
//! - The [`Display`] seam the video and OSD tasks draw through
//! - [`FrameCanvas`], an in-memory RGB565 framebuffer
//! - [`LogDisplay`], which reports what would be drawn through `tracing`
//! - Sharing one display between tasks through `Arc<Mutex<_>>`
//! - The display task draining the tile queue

pub mod osd;

pub use osd::{Osd, OsdFlags};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::error::{FpvLinkError, Result};
use crate::jpeg::{Rect, TILE_MAX_PIXELS};

/// One decoded MCU ready to be blitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub rect: Rect,
    pub pixels: heapless::Vec<u16, TILE_MAX_PIXELS>,
}

impl Tile {
    /// Copy a decoder tile; `None` if `pixels` does not fit a tile
    pub fn new(rect: Rect, pixels: &[u16]) -> Option<Self> {
        Some(Self {
            rect,
            pixels: heapless::Vec::from_slice(pixels).ok()?,
        })
    }
}

/// Drawing surface
pub trait Display: Send {
    /// Write a tile's pixels into its rectangle
    fn blit(&mut self, tile: &Tile) -> Result<()>;

    /// Draw `text` with its top-left corner at (`x`, `y`)
    fn draw_text(&mut self, text: &str, x: u16, y: u16) -> Result<()>;

    fn clear(&mut self) -> Result<()>;
}

impl<D: Display + ?Sized> Display for Arc<Mutex<D>> {
    fn blit(&mut self, tile: &Tile) -> Result<()> {
        self.lock().unwrap_or_else(|e| e.into_inner()).blit(tile)
    }

    fn draw_text(&mut self, text: &str, x: u16, y: u16) -> Result<()> {
        self.lock().unwrap_or_else(|e| e.into_inner()).draw_text(text, x, y)
    }

    fn clear(&mut self) -> Result<()> {
        self.lock().unwrap_or_else(|e| e.into_inner()).clear()
    }
}

/// In-memory RGB565 framebuffer with a text layer
#[derive(Debug, Clone)]
pub struct FrameCanvas {
    width: u16,
    height: u16,
    pixels: Vec<u16>,
    text: BTreeMap<(u16, u16), String>,
    tiles: u64,
}

impl FrameCanvas {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
            text: BTreeMap::new(),
            tiles: 0,
        }
    }

    pub fn pixel(&self, x: u16, y: u16) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[y as usize * self.width as usize + x as usize])
    }

    /// Text last drawn at (`x`, `y`)
    pub fn text_at(&self, x: u16, y: u16) -> Option<&str> {
        self.text.get(&(x, y)).map(String::as_str)
    }

    /// Tiles blitted since creation
    pub fn tiles_drawn(&self) -> u64 {
        self.tiles
    }
}

impl Display for FrameCanvas {
    fn blit(&mut self, tile: &Tile) -> Result<()> {
        let rect = &tile.rect;
        if rect.right >= self.width || rect.bottom >= self.height {
            return Err(FpvLinkError::Protocol(format!(
                "Tile {:?} outside {}x{} canvas",
                rect, self.width, self.height
            )));
        }
        if tile.pixels.len() != rect.pixel_count() {
            return Err(FpvLinkError::Protocol(format!(
                "Tile {:?} carries {} pixels",
                rect,
                tile.pixels.len()
            )));
        }

        let w = rect.width() as usize;
        for (row, line) in tile.pixels.chunks(w).enumerate() {
            let start = (rect.top as usize + row) * self.width as usize + rect.left as usize;
            self.pixels[start..start + w].copy_from_slice(line);
        }
        self.tiles += 1;
        Ok(())
    }

    fn draw_text(&mut self, text: &str, x: u16, y: u16) -> Result<()> {
        self.text.insert((x, y), text.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.pixels.fill(0);
        self.text.clear();
        Ok(())
    }
}

/// Display that only logs
#[derive(Debug, Default)]
pub struct LogDisplay {
    name: String,
    tiles: u64,
}

impl LogDisplay {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tiles: 0,
        }
    }
}

impl Display for LogDisplay {
    fn blit(&mut self, tile: &Tile) -> Result<()> {
        self.tiles += 1;
        trace!("[{}] tile {:?}", self.name, tile.rect);
        // Report roughly once per QVGA frame
        if self.tiles % 300 == 0 {
            debug!("[{}] {} tiles drawn", self.name, self.tiles);
        }
        Ok(())
    }

    fn draw_text(&mut self, text: &str, x: u16, y: u16) -> Result<()> {
        info!("[{}] ({:>2},{:>3}) {}", self.name, x, y, text);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        debug!("[{}] clear", self.name);
        Ok(())
    }
}

/// Spawn the task that blits every queued tile
///
/// The task ends when the tile queue closes and hands the display back.
pub fn spawn_display_task<D>(mut display: D, mut tiles: mpsc::Receiver<Tile>) -> JoinHandle<D>
where
    D: Display + 'static,
{
    tokio::spawn(async move {
        while let Some(tile) = tiles.recv().await {
            if let Err(e) = display.blit(&tile) {
                debug!("Tile dropped: {}", e);
            }
        }
        debug!("Tile queue closed, display task exiting");
        display
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(left: u16, top: u16, w: u16, h: u16, value: u16) -> Tile {
        let rect = Rect {
            left,
            top,
            right: left + w - 1,
            bottom: top + h - 1,
        };
        let pixels = vec![value; rect.pixel_count()];
        Tile::new(rect, &pixels).unwrap()
    }

    #[test]
    fn test_tile_capacity() {
        let rect = Rect { left: 0, top: 0, right: 15, bottom: 15 };
        assert!(Tile::new(rect, &[0; 256]).is_some());
        assert!(Tile::new(rect, &[0; 257]).is_none());
    }

    #[test]
    fn test_canvas_blit_places_pixels() {
        let mut canvas = FrameCanvas::new(32, 16);
        canvas.blit(&tile(8, 4, 4, 2, 0xF800)).unwrap();

        assert_eq!(canvas.pixel(8, 4), Some(0xF800));
        assert_eq!(canvas.pixel(11, 5), Some(0xF800));
        assert_eq!(canvas.pixel(12, 5), Some(0));
        assert_eq!(canvas.pixel(8, 6), Some(0));
        assert_eq!(canvas.pixel(32, 0), None);
        assert_eq!(canvas.tiles_drawn(), 1);
    }

    #[test]
    fn test_canvas_rejects_out_of_bounds_tile() {
        let mut canvas = FrameCanvas::new(16, 16);
        assert!(canvas.blit(&tile(12, 0, 8, 8, 1)).is_err());
        assert_eq!(canvas.tiles_drawn(), 0);
    }

    #[test]
    fn test_canvas_text_layer() {
        let mut canvas = FrameCanvas::new(8, 8);
        canvas.draw_text("RTT:", 0, 16).unwrap();
        canvas.draw_text("0012", 32, 16).unwrap();
        canvas.draw_text("0013", 32, 16).unwrap();

        assert_eq!(canvas.text_at(0, 16), Some("RTT:"));
        assert_eq!(canvas.text_at(32, 16), Some("0013"));

        canvas.clear().unwrap();
        assert_eq!(canvas.text_at(0, 16), None);
    }

    #[tokio::test]
    async fn test_display_task_drains_queue() {
        let (tx, rx) = mpsc::channel(4);
        let handle = spawn_display_task(FrameCanvas::new(16, 16), rx);

        tx.send(tile(0, 0, 8, 8, 7)).await.unwrap();
        tx.send(tile(8, 8, 8, 8, 9)).await.unwrap();
        drop(tx);

        let canvas = handle.await.unwrap();
        assert_eq!(canvas.tiles_drawn(), 2);
        assert_eq!(canvas.pixel(15, 15), Some(9));
    }
}
