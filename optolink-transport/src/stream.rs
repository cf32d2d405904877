//! Stream accessor trait for transport layer

use crate::error::{OptolinkError, OptolinkResult};
use async_trait::async_trait;
use std::time::Duration;

/// Stream accessor interface to the optical head of a heating controller
///
/// The link is half-duplex: the protocol engines write a request and then
/// read the answer. Every `read` is bounded by the configured timeout and
/// fails with [`OptolinkError::Timeout`] when nothing arrives.
#[async_trait]
pub trait StreamAccessor: Send + Sync {
    /// Set the read timeout
    ///
    /// # Arguments
    ///
    /// * `timeout` - The timeout duration. None means infinite timeout.
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> OptolinkResult<()>;

    /// Read data from the stream
    ///
    /// # Arguments
    ///
    /// * `buf` - Buffer to read into
    ///
    /// # Returns
    ///
    /// Number of bytes read, or 0 if EOF
    async fn read(&mut self, buf: &mut [u8]) -> OptolinkResult<usize>;

    /// Read exact number of bytes from the stream
    ///
    /// # Arguments
    ///
    /// * `buf` - Buffer to read into, will be filled completely
    ///
    /// # Returns
    ///
    /// Returns error if unable to read the exact number of bytes
    async fn read_exact(&mut self, mut buf: &mut [u8]) -> OptolinkResult<()> {
        while !buf.is_empty() {
            let n = self.read(buf).await?;
            if n == 0 {
                return Err(OptolinkError::Connection(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "Failed to read exact number of bytes",
                )));
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    /// Read a single byte
    async fn read_byte(&mut self) -> OptolinkResult<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).await?;
        Ok(byte[0])
    }

    /// Write data to the stream
    ///
    /// # Returns
    ///
    /// Number of bytes written
    async fn write(&mut self, buf: &[u8]) -> OptolinkResult<usize>;

    /// Write all data to the stream
    async fn write_all(&mut self, buf: &[u8]) -> OptolinkResult<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..]).await?;
            if n == 0 {
                return Err(OptolinkError::Connection(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "Failed to write all data",
                )));
            }
            written += n;
        }
        Ok(())
    }

    /// Flush any buffered data
    async fn flush(&mut self) -> OptolinkResult<()>;

    /// Discard every byte already received but not yet read
    ///
    /// # Returns
    ///
    /// Number of bytes discarded, where the transport can tell
    async fn clear_input(&mut self) -> OptolinkResult<usize>;

    /// Check if the stream is closed
    fn is_closed(&self) -> bool;

    /// Close the stream
    async fn close(&mut self) -> OptolinkResult<()>;
}

/// Transport layer trait that extends StreamAccessor
#[async_trait]
pub trait TransportLayer: StreamAccessor {
    /// Open the physical layer connection
    async fn open(&mut self) -> OptolinkResult<()>;
}

#[async_trait]
impl<T: TransportLayer + ?Sized> StreamAccessor for Box<T> {
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> OptolinkResult<()> {
        (**self).set_timeout(timeout).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> OptolinkResult<usize> {
        (**self).read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> OptolinkResult<usize> {
        (**self).write(buf).await
    }

    async fn flush(&mut self) -> OptolinkResult<()> {
        (**self).flush().await
    }

    async fn clear_input(&mut self) -> OptolinkResult<usize> {
        (**self).clear_input().await
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    async fn close(&mut self) -> OptolinkResult<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<T: TransportLayer + ?Sized> TransportLayer for Box<T> {
    async fn open(&mut self) -> OptolinkResult<()> {
        (**self).open().await
    }
}

/// Drain whatever an `AsyncRead` can deliver without waiting
pub(crate) fn drain_ready<R>(reader: &mut R) -> std::io::Result<usize>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use futures::FutureExt;
    use tokio::io::AsyncReadExt;

    let mut scratch = [0u8; 64];
    let mut discarded = 0;
    loop {
        match reader.read(&mut scratch).now_or_never() {
            Some(Ok(0)) | None => return Ok(discarded),
            Some(Ok(n)) => discarded += n,
            Some(Err(e)) => return Err(e),
        }
    }
}
