//! Serial port transport implementation

use crate::error::{OptolinkError, OptolinkResult};
use crate::stream::{StreamAccessor, TransportLayer};
use async_trait::async_trait;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialStream};

/// Default baud rate of the optical interface
pub const DEFAULT_BAUD_RATE: u32 = 4800;

/// Default per-read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Wrapper for SerialStream that implements Debug
struct DebugSerialStream(SerialStream);

impl fmt::Debug for DebugSerialStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialStream").finish()
    }
}

impl Deref for DebugSerialStream {
    type Target = SerialStream;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DebugSerialStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Serial port transport layer settings
///
/// Defaults match the optical head: 8 data bits, even parity, 2 stop bits.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
    pub flow_control: tokio_serial::FlowControl,
    pub timeout: Option<Duration>,
}

impl SerialSettings {
    /// Create new serial settings with default line parameters
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self::with_timeout(port_name, baud_rate, DEFAULT_TIMEOUT)
    }

    /// Create serial settings with timeout
    pub fn with_timeout(port_name: String, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_name,
            baud_rate,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::Two,
            parity: tokio_serial::Parity::Even,
            flow_control: tokio_serial::FlowControl::None,
            timeout: Some(timeout),
        }
    }
}

/// Serial port transport layer implementation
#[derive(Debug)]
pub struct SerialTransport {
    stream: Option<DebugSerialStream>,
    settings: SerialSettings,
    closed: bool,
}

impl SerialTransport {
    /// Create a new serial transport layer
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            stream: None,
            settings,
            closed: true,
        }
    }

    /// Create serial transport with port name and the default baud rate
    pub fn new_simple(port_name: String) -> Self {
        Self::new(SerialSettings::new(port_name, DEFAULT_BAUD_RATE))
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn stream_mut(&mut self) -> OptolinkResult<&mut DebugSerialStream> {
        self.stream.as_mut().ok_or_else(|| {
            OptolinkError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "Serial stream not connected",
            ))
        })
    }
}

#[async_trait]
impl TransportLayer for SerialTransport {
    async fn open(&mut self) -> OptolinkResult<()> {
        if !self.closed {
            return Err(OptolinkError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Connection has already been opened",
            )));
        }
        // release a port left behind by a failed read before reopening
        self.stream = None;

        let builder = tokio_serial::new(&self.settings.port_name, self.settings.baud_rate)
            .data_bits(self.settings.data_bits)
            .stop_bits(self.settings.stop_bits)
            .parity(self.settings.parity)
            .flow_control(self.settings.flow_control);

        let stream = SerialStream::open(&builder).map_err(|e| {
            OptolinkError::Connection(std::io::Error::other(format!(
                "Failed to open serial port {}: {}",
                self.settings.port_name, e
            )))
        })?;

        log::info!(
            "Opened serial port {} at {} baud",
            self.settings.port_name,
            self.settings.baud_rate
        );
        self.stream = Some(DebugSerialStream(stream));
        self.closed = false;
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for SerialTransport {
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
        let pending = stream.bytes_to_read().unwrap_or(0) as usize;
        stream
            .clear(ClearBuffer::Input)
            .map_err(|e| OptolinkError::Connection(std::io::Error::other(e)))?;
        Ok(pending)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> OptolinkResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.flush().await;
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_settings() {
        let settings = SerialSettings::new("/dev/ttyUSB0".to_string(), DEFAULT_BAUD_RATE);
        assert_eq!(settings.port_name, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 4800);
        assert_eq!(settings.parity, tokio_serial::Parity::Even);
        assert_eq!(settings.stop_bits, tokio_serial::StopBits::Two);
        assert_eq!(settings.data_bits, tokio_serial::DataBits::Eight);
    }

    #[tokio::test]
    async fn test_unopened_transport() {
        let mut transport = SerialTransport::new_simple("/dev/null-optolink".to_string());
        assert!(transport.is_closed());
        let mut buf = [0u8; 1];
        assert!(matches!(
            transport.read(&mut buf).await,
            Err(OptolinkError::Connection(_))
        ));
    }
}
