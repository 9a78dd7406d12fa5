//! # Serial Communication Module
//!
//! Wired pairing link between the two nodes.
//!
//! This module handles:
//! - Opening the pairing port at 9600 baud, 8 data bits, even parity, 2 stop bits
//! - Exposing it through [`SerialPortIO`] for the key exchange

pub mod port_trait;

pub use port_trait::{SerialPortIO, StreamPort, TokioSerialPort};

use crate::error::{FpvLinkError, Result};
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

/// Pairing link baud rate
pub const PAIRING_BAUD_RATE: u32 = 9600;

/// Open the pairing port with the key-exchange line settings
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/ttyUSB0")
/// * `baud_rate` - Line rate, normally [`PAIRING_BAUD_RATE`]
///
/// # Returns
///
/// * `Result<TokioSerialPort>` - Opened port ready for the handshake
///
/// # Errors
///
/// Returns a transport error if the device cannot be opened
///
/// # Examples
///
/// ```no_run
/// use fpv_link::serial::{open_pairing_port, PAIRING_BAUD_RATE};
///
/// fn main() -> anyhow::Result<()> {
///     let port = open_pairing_port("/dev/ttyUSB0", PAIRING_BAUD_RATE)?;
///     Ok(())
/// }
/// ```
pub fn open_pairing_port(path: &str, baud_rate: u32) -> Result<TokioSerialPort> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::Even)
        .stop_bits(tokio_serial::StopBits::Two)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| FpvLinkError::Transport(format!("Failed to open {}: {}", path, e)))?;

    info!("Opened pairing port {} at {} baud (8E2)", path, baud_rate);
    Ok(TokioSerialPort::new(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::port_trait::mocks::MockSerialPort;
    use std::io;

    #[test]
    fn test_constants() {
        assert_eq!(PAIRING_BAUD_RATE, 9600);
    }

    #[tokio::test]
    async fn test_open_invalid_path_returns_error() {
        let result = open_pairing_port("/dev/nonexistent_serial_device_12345", PAIRING_BAUD_RATE);

        match result {
            Err(FpvLinkError::Transport(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            Err(other) => panic!("Expected Transport error, got: {:?}", other),
            Ok(_) => panic!("Expected error for missing device"),
        }
    }

    #[tokio::test]
    async fn test_mock_port_read_write() {
        let mut port = MockSerialPort::new();
        port.queue_rx(&[1, 2, 3, 4]);

        port.write_all(&[9, 9]).await.unwrap();
        port.flush().await.unwrap();
        let mut buf = [0u8; 3];
        port.read_exact(&mut buf).await.unwrap();

        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(port.get_written_data(), vec![vec![9, 9]]);

        let mut rest = [0u8; 2];
        let err = port.read_exact(&mut rest).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_mock_port_error_injection() {
        let mut port = MockSerialPort::new();
        port.set_write_error(io::ErrorKind::BrokenPipe);
        port.set_flush_error(io::ErrorKind::TimedOut);

        assert_eq!(port.write_all(&[1]).await.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(port.flush().await.unwrap_err().kind(), io::ErrorKind::TimedOut);
        assert!(port.get_written_data().is_empty());
    }

    // Integration test - only runs if a pairing cable is connected
    #[tokio::test]
    #[ignore] // Run with: cargo test -- --ignored
    async fn test_open_with_real_hardware() {
        match open_pairing_port("/dev/ttyUSB0", PAIRING_BAUD_RATE) {
            Ok(_) => println!("Opened pairing port"),
            Err(e) => println!("No pairing hardware detected: {}", e),
        }
    }
}
