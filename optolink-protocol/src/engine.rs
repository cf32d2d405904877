//! Protocol capability shared by the P300 and KW engines

use crate::error::{OptolinkError, OptolinkResult};
use crate::kw::KwEngine;
use crate::p300::P300Engine;
use crate::request::Request;
use crate::state::LinkState;
use crate::statistics::LinkStatistics;
use async_trait::async_trait;
use optolink_transport::TransportLayer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Wire protocol variant, fixed for the lifetime of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolKind {
    #[default]
    P300,
    #[serde(rename = "KW")]
    Kw,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::P300 => "P300",
            ProtocolKind::Kw => "KW",
        }
    }
}

impl FromStr for ProtocolKind {
    type Err = OptolinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P300" => Ok(ProtocolKind::P300),
            "KW" => Ok(ProtocolKind::Kw),
            other => Err(OptolinkError::Config(format!("Unknown protocol: {}", other))),
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and retry parameters of a link
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    /// Bound of a single read from the transport
    pub timeout: Duration,
    /// Times a failed exchange is restarted from `Idle`
    pub retries: u32,
    /// Reset/sync rounds before the handshake gives up
    pub sync_attempts: u32,
    /// Retransmissions of a telegram answered with NACK
    pub nack_retries: u32,
    /// How long a KW write waits for a status byte
    pub kw_status_window: Duration,
    /// How long an acknowledged P300 write waits for a confirmation telegram
    pub p300_confirmation_window: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1500),
            retries: 3,
            sync_attempts: 10,
            nack_retries: 2,
            kw_status_window: Duration::from_millis(200),
            p300_confirmation_window: Duration::from_millis(100),
        }
    }
}

/// A wire protocol able to execute one request at a time
///
/// Implementations own the transport. `execute` runs the complete exchange,
/// including resynchronisation and retries, and returns the raw payload. For
/// writes the payload sent is returned unchanged.
#[async_trait]
pub trait Protocol: Send {
    async fn execute(&mut self, request: &Request) -> OptolinkResult<Vec<u8>>;

    fn kind(&self) -> ProtocolKind;

    fn statistics(&self) -> &LinkStatistics;

    /// Close the underlying transport
    async fn close(&mut self) -> OptolinkResult<()>;
}

/// Transport, state and counters shared by both engines
#[derive(Debug)]
pub(crate) struct Link<T> {
    pub(crate) transport: T,
    pub(crate) settings: LinkSettings,
    pub(crate) state: LinkState,
    pub(crate) statistics: LinkStatistics,
}

impl<T: TransportLayer> Link<T> {
    pub(crate) fn new(transport: T, settings: LinkSettings) -> Self {
        Self {
            transport,
            settings,
            state: LinkState::Idle,
            statistics: LinkStatistics::new(),
        }
    }

    /// Open the transport if needed and discard stale input
    pub(crate) async fn prepare(&mut self) -> OptolinkResult<()> {
        if self.transport.is_closed() {
            self.transport.open().await?;
        }
        self.transport.set_timeout(Some(self.settings.timeout)).await?;
        let discarded = self.transport.clear_input().await?;
        if discarded > 0 {
            log::debug!("Discarded {} stale bytes before exchange", discarded);
            self.statistics.add_discarded_bytes(discarded);
        }
        Ok(())
    }

    pub(crate) fn transition(&mut self, new_state: LinkState) -> OptolinkResult<()> {
        self.state.validate_transition(new_state)?;
        log::trace!("Link state {} -> {}", self.state.as_str(), new_state.as_str());
        self.state = new_state;
        Ok(())
    }

    pub(crate) async fn send(&mut self, bytes: &[u8]) -> OptolinkResult<()> {
        self.transport.write_all(bytes).await?;
        self.transport.flush().await
    }

    /// Read one byte, counting timeouts
    pub(crate) async fn read_byte(&mut self) -> OptolinkResult<u8> {
        let result = self.transport.read_byte().await;
        if matches!(result, Err(OptolinkError::Timeout)) {
            self.statistics.increment_timeouts();
        }
        result
    }

    /// Read exactly `buf.len()` bytes, counting timeouts
    pub(crate) async fn read_exact(&mut self, buf: &mut [u8]) -> OptolinkResult<()> {
        let result = self.transport.read_exact(buf).await;
        if matches!(result, Err(OptolinkError::Timeout)) {
            self.statistics.increment_timeouts();
        }
        result
    }

    /// Decide whether a failed attempt is retried
    ///
    /// # Returns
    ///
    /// `None` to retry, or the final error once `attempt` has used up the
    /// retry bound. A plain read timeout becomes `LinkTimeout`.
    pub(crate) fn after_failure(
        &mut self,
        request: &Request,
        attempt: u32,
        error: OptolinkError,
    ) -> Option<OptolinkError> {
        self.state = LinkState::Idle;
        if error.is_retryable() && attempt < self.settings.retries {
            self.statistics.increment_resyncs();
            log::warn!(
                "{} {} failed ({}), resynchronising (attempt {}/{})",
                request.command,
                request.address,
                error,
                attempt + 1,
                self.settings.retries
            );
            return None;
        }
        self.statistics.increment_failed_exchanges();
        let error = match error {
            OptolinkError::Timeout => OptolinkError::LinkTimeout(format!(
                "No response for {} at {} after {} attempts",
                request.command,
                request.address,
                attempt + 1
            )),
            other => other,
        };
        Some(error)
    }

    pub(crate) async fn close(&mut self) -> OptolinkResult<()> {
        self.state = LinkState::Idle;
        self.transport.close().await
    }
}

/// Either engine, chosen once from configuration
#[derive(Debug)]
pub enum Engine<T> {
    P300(P300Engine<T>),
    Kw(KwEngine<T>),
}

impl<T: TransportLayer> Engine<T> {
    /// Create the engine for `kind` on top of `transport`
    pub fn new(kind: ProtocolKind, transport: T, settings: LinkSettings) -> Self {
        match kind {
            ProtocolKind::P300 => Engine::P300(P300Engine::new(transport, settings)),
            ProtocolKind::Kw => Engine::Kw(KwEngine::new(transport, settings)),
        }
    }
}

#[async_trait]
impl<T: TransportLayer> Protocol for Engine<T> {
    async fn execute(&mut self, request: &Request) -> OptolinkResult<Vec<u8>> {
        match self {
            Engine::P300(engine) => engine.execute(request).await,
            Engine::Kw(engine) => engine.execute(request).await,
        }
    }

    fn kind(&self) -> ProtocolKind {
        match self {
            Engine::P300(engine) => engine.kind(),
            Engine::Kw(engine) => engine.kind(),
        }
    }

    fn statistics(&self) -> &LinkStatistics {
        match self {
            Engine::P300(engine) => engine.statistics(),
            Engine::Kw(engine) => engine.statistics(),
        }
    }

    async fn close(&mut self) -> OptolinkResult<()> {
        match self {
            Engine::P300(engine) => engine.close().await,
            Engine::Kw(engine) => engine.close().await,
        }
    }
}
