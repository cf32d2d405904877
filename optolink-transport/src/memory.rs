//! In-memory transport over a tokio duplex pipe
//!
//! Connects a protocol engine to a software device without hardware.

use crate::error::{OptolinkError, OptolinkResult};
use crate::stream::{drain_ready, StreamAccessor, TransportLayer};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Default pipe buffer size
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct MemoryTransport {
    stream: Option<DuplexStream>,
    timeout: Option<Duration>,
    closed: bool,
}

impl MemoryTransport {
    /// Wrap one end of a duplex pipe
    pub fn new(stream: DuplexStream, timeout: Option<Duration>) -> Self {
        Self {
            stream: Some(stream),
            timeout,
            closed: true,
        }
    }

    /// Create a connected pair: the transport and the device side of the pipe
    pub fn pair(timeout: Option<Duration>) -> (Self, DuplexStream) {
        let (local, remote) = tokio::io::duplex(DEFAULT_CAPACITY);
        (Self::new(local, timeout), remote)
    }

    fn stream_mut(&mut self) -> OptolinkResult<&mut DuplexStream> {
        self.stream.as_mut().ok_or_else(|| {
            OptolinkError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "Memory pipe closed",
            ))
        })
    }
}

#[async_trait]
impl TransportLayer for MemoryTransport {
    async fn open(&mut self) -> OptolinkResult<()> {
        self.stream_mut()?;
        self.closed = false;
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for MemoryTransport {
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> OptolinkResult<()> {
        self.timeout = timeout;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> OptolinkResult<usize> {
        let timeout = self.timeout;
        let stream = self.stream_mut()?;
        let n = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, stream.read(buf))
                .await
                .map_err(|_| OptolinkError::Timeout)?,
            None => stream.read(buf).await,
        }
        .map_err(OptolinkError::Connection)?;
        if n == 0 {
            self.closed = true;
        }
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> OptolinkResult<usize> {
        let stream = self.stream_mut()?;
        stream.write(buf).await.map_err(OptolinkError::Connection)
    }

    async fn flush(&mut self) -> OptolinkResult<()> {
        let stream = self.stream_mut()?;
        stream.flush().await.map_err(OptolinkError::Connection)
    }

    async fn clear_input(&mut self) -> OptolinkResult<usize> {
        let stream = self.stream_mut()?;
        drain_ready(stream).map_err(OptolinkError::Connection)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> OptolinkResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.closed = true;
        Ok(())
    }
}
