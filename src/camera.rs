//! # Camera
//!
//! JPEG frame source of the transmitter node.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{FpvLinkError, Result};

/// JPEG camera
#[async_trait]
pub trait Camera: Send + Sync {
    /// Capture one complete JPEG frame, SOI through EOI
    async fn capture(&self) -> Result<Bytes>;

    fn set_led(&self, on: bool) -> Result<()>;
}

/// Camera that returns the same JPEG on every capture
#[derive(Debug)]
pub struct ReplayCamera {
    frame: Bytes,
    led: AtomicBool,
    captures: AtomicU64,
}

impl ReplayCamera {
    pub fn new(frame: impl Into<Bytes>) -> Self {
        Self {
            frame: frame.into(),
            led: AtomicBool::new(false),
            captures: AtomicU64::new(0),
        }
    }

    /// Load the frame to replay from a JPEG file
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a protocol error
    /// if it does not start with SOI.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        if !data.starts_with(&[0xFF, 0xD8]) {
            return Err(FpvLinkError::Protocol(format!(
                "{} is not a JPEG file",
                path.as_ref().display()
            )));
        }
        info!("Replaying {} ({} bytes)", path.as_ref().display(), data.len());
        Ok(Self::new(data))
    }

    pub fn led(&self) -> bool {
        self.led.load(Ordering::Relaxed)
    }

    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Camera for ReplayCamera {
    async fn capture(&self) -> Result<Bytes> {
        self.captures.fetch_add(1, Ordering::Relaxed);
        Ok(self.frame.clone())
    }

    fn set_led(&self, on: bool) -> Result<()> {
        debug!("Camera LED {}", if on { "on" } else { "off" });
        self.led.store(on, Ordering::Relaxed);
        Ok(())
    }
}
