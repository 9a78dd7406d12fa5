//! Byte pipe the pairing handshake runs over
//!
//! The handshake only needs ordered bytes in both directions, so any tokio
//! stream works: the serial cable in production, an in-memory duplex pipe
//! in tests.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bidirectional byte pipe
#[async_trait]
pub trait SerialPortIO: Send {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;

    /// Fill `buf` completely or fail
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// [`SerialPortIO`] over any async stream
#[derive(Debug)]
pub struct StreamPort<S> {
    stream: S,
}

/// The pairing cable
pub type TokioSerialPort = StreamPort<tokio_serial::SerialStream>;

impl<S> StreamPort<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[async_trait]
impl<S> SerialPortIO for StreamPort<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        AsyncWriteExt::write_all(&mut self.stream, data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(&mut self.stream).await
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        AsyncReadExt::read_exact(&mut self.stream, buf).await.map(|_| ())
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard};

    #[derive(Default)]
    struct MockState {
        writes: Vec<Vec<u8>>,
        rx: VecDeque<u8>,
        write_error: Option<io::ErrorKind>,
        flush_error: Option<io::ErrorKind>,
    }

    /// Scripted port: reads drain queued bytes, writes are recorded
    ///
    /// Running out of queued bytes reports `UnexpectedEof`, as a closed port
    /// would.
    #[derive(Clone, Default)]
    pub struct MockSerialPort {
        state: Arc<Mutex<MockState>>,
    }

    impl MockSerialPort {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap()
        }

        pub fn get_written_data(&self) -> Vec<Vec<u8>> {
            self.state().writes.clone()
        }

        pub fn queue_rx(&self, data: &[u8]) {
            self.state().rx.extend(data.iter().copied());
        }

        pub fn set_write_error(&self, error: io::ErrorKind) {
            self.state().write_error = Some(error);
        }

        pub fn set_flush_error(&self, error: io::ErrorKind) {
            self.state().flush_error = Some(error);
        }
    }

    #[async_trait]
    impl SerialPortIO for MockSerialPort {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let mut state = self.state();
            if let Some(kind) = state.write_error {
                return Err(io::Error::new(kind, "Mock write error"));
            }
            state.writes.push(data.to_vec());
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            match self.state().flush_error {
                Some(kind) => Err(io::Error::new(kind, "Mock flush error")),
                None => Ok(()),
            }
        }

        async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
            let mut state = self.state();
            if state.rx.len() < buf.len() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Mock rx exhausted"));
            }
            let n = buf.len();
            for (dst, src) in buf.iter_mut().zip(state.rx.drain(..n)) {
                *dst = src;
            }
            Ok(())
        }
    }
}
