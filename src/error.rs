//! # Error Types
//!
//! Custom error types for FPV Link using `thiserror`.

use thiserror::Error;

use crate::jpeg::JpegError;

/// Main error type for FPV Link
#[derive(Debug, Error)]
pub enum FpvLinkError {
    /// Wire protocol errors (malformed header, fragment out of range)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Radio transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// JPEG decode errors
    #[error("JPEG decode error: {0}")]
    Jpeg(#[from] JpegError),

    /// Pairing handshake errors
    #[error("Pairing error: {0}")]
    Pairing(String),

    /// Persistent key storage errors
    #[error("Key storage error: {0}")]
    Storage(String),

    /// Channel scan errors
    #[error("Channel scan error: {0}")]
    Scan(String),

    /// Observable value store errors
    #[error("Value store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for FPV Link
pub type Result<T> = std::result::Result<T, FpvLinkError>;
