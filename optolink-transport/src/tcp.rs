//! TCP transport for network serial adapters (ser2net and similar)

use crate::error::{OptolinkError, OptolinkResult};
use crate::stream::{drain_ready, StreamAccessor, TransportLayer};
use async_trait::async_trait;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Wrapper for TcpStream that implements Debug
struct DebugTcpStream(TcpStream);

impl fmt::Debug for DebugTcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStream").finish()
    }
}

impl Deref for DebugTcpStream {
    type Target = TcpStream;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DebugTcpStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    /// `host:port` of the adapter
    pub address: String,
    pub timeout: Option<Duration>,
}

impl TcpSettings {
    /// Create new TCP settings
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Create TCP settings with timeout
    pub fn with_timeout(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout: Some(timeout),
        }
    }

    /// Parse a `tcp://host:port` URL or a bare `host:port`
    pub fn from_url(url: &str, timeout: Duration) -> OptolinkResult<Self> {
        let target = url.strip_prefix("tcp://").unwrap_or(url);
        let valid = target
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid {
            return Err(OptolinkError::Config(format!("Invalid TCP address: {}", url)));
        }
        Ok(Self::with_timeout(target, timeout))
    }
}

/// TCP transport layer implementation
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<DebugTcpStream>,
    settings: TcpSettings,
    closed: bool,
}

impl TcpTransport {
    /// Create a new TCP transport layer
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            stream: None,
            settings,
            closed: true,
        }
    }

    /// Create TCP transport from a `tcp://host:port` URL or a bare `host:port`
    pub fn from_address(address: &str) -> OptolinkResult<Self> {
        Ok(Self::new(TcpSettings::from_url(address, DEFAULT_TIMEOUT)?))
    }

    /// Create TCP transport from an already-connected TcpStream (for device-side use)
    ///
    /// # Arguments
    /// * `stream` - The already-connected TCP stream
    /// * `timeout` - Optional read/write timeout
    pub fn from_connected_stream(stream: TcpStream, timeout: Option<Duration>) -> Self {
        let address = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        Self {
            stream: Some(DebugTcpStream(stream)),
            settings: TcpSettings { address, timeout },
            closed: false,
        }
    }

    fn stream_mut(&mut self) -> OptolinkResult<&mut DebugTcpStream> {
        self.stream.as_mut().ok_or_else(|| {
            OptolinkError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "TCP stream not connected",
            ))
        })
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn open(&mut self) -> OptolinkResult<()> {
        if !self.closed {
            return Err(OptolinkError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Connection has already been opened",
            )));
        }

        let connect = TcpStream::connect(self.settings.address.as_str());
        let stream = if let Some(timeout) = self.settings.timeout {
            tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| OptolinkError::Timeout)?
                .map_err(OptolinkError::Connection)?
        } else {
            connect.await.map_err(OptolinkError::Connection)?
        };
        stream.set_nodelay(true).map_err(OptolinkError::Connection)?;

        log::info!("Connected to serial adapter at {}", self.settings.address);
        self.stream = Some(DebugTcpStream(stream));
        self.closed = false;
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for TcpTransport {
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> OptolinkResult<()> {
        self.settings.timeout = timeout;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> OptolinkResult<usize> {
        let timeout = self.settings.timeout;
        let stream = self.stream_mut()?;

        let result = if let Some(timeout) = timeout {
            tokio::time::timeout(timeout, stream.read(buf))
                .await
                .map_err(|_| OptolinkError::Timeout)?
                .map_err(OptolinkError::Connection)
        } else {
            stream.read(buf).await.map_err(OptolinkError::Connection)
        };

        match result {
            Ok(0) => {
                self.closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }

    async fn write(&mut self, buf: &[u8]) -> OptolinkResult<usize> {
        let timeout = self.settings.timeout;
        let stream = self.stream_mut()?;

        if let Some(timeout) = timeout {
            tokio::time::timeout(timeout, stream.write(buf))
                .await
                .map_err(|_| OptolinkError::Timeout)?
                .map_err(OptolinkError::Connection)
        } else {
            stream.write(buf).await.map_err(OptolinkError::Connection)
        }
    }

    async fn flush(&mut self) -> OptolinkResult<()> {
        let stream = self.stream_mut()?;
        stream.flush().await.map_err(OptolinkError::Connection)
    }

    async fn clear_input(&mut self) -> OptolinkResult<usize> {
        let stream = self.stream_mut()?;
        drain_ready(&mut stream.0).map_err(OptolinkError::Connection)
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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_from_address() {
        let transport = TcpTransport::from_address("tcp://192.168.1.20:3000").unwrap();
        assert_eq!(transport.settings.address, "192.168.1.20:3000");
        assert!(TcpTransport::from_address("tcp://nohost").is_err());
        assert!(TcpTransport::from_address("tcp://:3000").is_err());
    }

    #[tokio::test]
    async fn test_tcp_round_trip_and_clear() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[0x05, 0x05]).await.unwrap();
            let mut request = [0u8; 1];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(&[0x06]).await.unwrap();
            request[0]
        });

        let mut transport = TcpTransport::new(TcpSettings::new(address));
        transport.open().await.unwrap();
        // wait until the stale sync bytes have arrived
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.clear_input().await.unwrap(), 2);
        transport.write_all(&[0x04]).await.unwrap();
        assert_eq!(transport.read_byte().await.unwrap(), 0x06);
        assert_eq!(server.await.unwrap(), 0x04);
        transport.close().await.unwrap();
        assert!(transport.is_closed());
    }
}
