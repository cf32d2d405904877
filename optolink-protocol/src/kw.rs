//! KW protocol engine: raw, unframed, no checksum
//!
//! ```text
//! host:   0x04                       (reset to idle sync)
//! device: 0x05                       (idle sync)
//! host:   0x01 F7|F4 addr_hi addr_lo count [data...]
//! device: payload (read) | status byte (write)
//! ```

use crate::engine::{Link, LinkSettings, Protocol, ProtocolKind};
use crate::error::{OptolinkError, OptolinkResult};
use crate::request::{Request, RequestKind};
use crate::state::LinkState;
use crate::statistics::LinkStatistics;
use async_trait::async_trait;
use optolink_transport::TransportLayer;

/// Reset byte
pub const RESET: u8 = 0x04;
/// Sync byte the device emits while idle
pub const SYNC: u8 = 0x05;
/// First byte of every request
pub const REQUEST_START: u8 = 0x01;
pub const READ: u8 = 0xF7;
pub const WRITE: u8 = 0xF4;
/// Write status reported by the device on success
pub const STATUS_OK: u8 = 0x00;

/// Encode a KW request
pub fn encode_request(request: &Request) -> OptolinkResult<Vec<u8>> {
    let count = u8::try_from(request.length)
        .map_err(|_| OptolinkError::InvalidData(format!("Length {} too large", request.length)))?;
    let operation = if request.is_write() { WRITE } else { READ };
    let mut bytes = Vec::with_capacity(5 + request.payload().len());
    bytes.push(REQUEST_START);
    bytes.push(operation);
    bytes.extend_from_slice(&request.address.to_bytes());
    bytes.push(count);
    bytes.extend_from_slice(request.payload());
    Ok(bytes)
}

/// KW engine
#[derive(Debug)]
pub struct KwEngine<T> {
    link: Link<T>,
}

impl<T: TransportLayer> KwEngine<T> {
    pub fn new(transport: T, settings: LinkSettings) -> Self {
        Self {
            link: Link::new(transport, settings),
        }
    }

    pub fn state(&self) -> LinkState {
        self.link.state
    }

    /// Wait for the device's idle sync byte
    async fn synchronise(&mut self) -> OptolinkResult<()> {
        self.link.transition(LinkState::AwaitingSync)?;
        let attempts = self.link.settings.sync_attempts;
        for _ in 0..attempts {
            self.link.send(&[RESET]).await?;
            match self.link.read_byte().await {
                Ok(SYNC) => return Ok(()),
                Ok(other) => log::trace!("Ignoring 0x{:02X} while waiting for sync", other),
                Err(OptolinkError::Timeout) => {}
                Err(e) => return Err(e),
            }
        }
        Err(OptolinkError::LinkTimeout(format!(
            "No sync byte within {} attempts",
            attempts
        )))
    }

    /// Read the optional status byte that follows a write
    async fn write_status(&mut self) -> OptolinkResult<()> {
        self.link
            .transport
            .set_timeout(Some(self.link.settings.kw_status_window))
            .await?;
        let status = self.link.transport.read_byte().await;
        self.link
            .transport
            .set_timeout(Some(self.link.settings.timeout))
            .await?;
        match status {
            Ok(STATUS_OK) | Err(OptolinkError::Timeout) => Ok(()),
            Ok(code) => {
                self.link.statistics.increment_nacks();
                Err(OptolinkError::ProtocolNack(format!(
                    "Device reported write status 0x{:02X}",
                    code
                )))
            }
            Err(e) => Err(e),
        }
    }

    async fn exchange(&mut self, request: &Request) -> OptolinkResult<Vec<u8>> {
        self.link.prepare().await?;
        self.synchronise().await?;

        let bytes = encode_request(request)?;
        log::debug!("Sending KW request for {}: {:02X?}", request.command, bytes);
        self.link.send(&bytes).await?;
        self.link.statistics.increment_telegrams_sent();
        self.link.transition(LinkState::AwaitingData)?;

        let payload = match &request.kind {
            RequestKind::Read => {
                let mut payload = vec![0u8; request.length];
                self.link.read_exact(&mut payload).await?;
                self.link.statistics.increment_telegrams_received();
                payload
            }
            RequestKind::Write(data) => {
                self.write_status().await?;
                data.clone()
            }
        };
        self.link.transition(LinkState::Idle)?;
        Ok(payload)
    }
}

#[async_trait]
impl<T: TransportLayer> Protocol for KwEngine<T> {
    async fn execute(&mut self, request: &Request) -> OptolinkResult<Vec<u8>> {
        self.link.statistics.increment_exchanges();
        let mut attempt = 0;
        loop {
            match self.exchange(request).await {
                Ok(payload) => return Ok(payload),
                Err(error) => match self.link.after_failure(request, attempt, error) {
                    None => attempt += 1,
                    Some(error) => return Err(error),
                },
            }
        }
    }

    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Kw
    }

    fn statistics(&self) -> &LinkStatistics {
        &self.link.statistics
    }

    async fn close(&mut self) -> OptolinkResult<()> {
        self.link.close().await
    }
}
