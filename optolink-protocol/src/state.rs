//! Link state machine shared by the protocol engines

use crate::error::{OptolinkError, OptolinkResult};

/// State of one exchange on the link
///
/// # State Transitions
/// ```text
/// P300: Idle -> AwaitingSync -> AwaitingAck -> AwaitingResponse -> Idle
/// KW:   Idle -> AwaitingSync -> AwaitingData -> Idle
/// ```
///
/// Any state may fall back to `Idle` when an exchange fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No exchange in progress
    #[default]
    Idle,
    /// Reset sent, waiting for the device's sync byte
    AwaitingSync,
    /// Telegram sent, waiting for ACK or NACK (P300)
    AwaitingAck,
    /// Acknowledged, waiting for the response telegram (P300)
    AwaitingResponse,
    /// Request sent, waiting for raw payload or write status (KW)
    AwaitingData,
}

impl LinkState {
    pub fn is_idle(&self) -> bool {
        matches!(self, LinkState::Idle)
    }

    /// Validate state transition
    ///
    /// # Arguments
    /// * `new_state` - The target state
    ///
    /// # Returns
    /// `Ok(())` if transition is valid, `Err` otherwise
    pub fn validate_transition(&self, new_state: LinkState) -> OptolinkResult<()> {
        let valid = match (*self, new_state) {
            (_, LinkState::Idle) => true,
            (LinkState::Idle, LinkState::AwaitingSync) => true,
            (LinkState::AwaitingSync, LinkState::AwaitingAck) => true,
            (LinkState::AwaitingSync, LinkState::AwaitingData) => true,
            // NACK forces a retransmission of the same telegram
            (LinkState::AwaitingAck, LinkState::AwaitingAck) => true,
            (LinkState::AwaitingAck, LinkState::AwaitingResponse) => true,
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(OptolinkError::InvalidData(format!(
                "Invalid link state transition: {:?} -> {:?}",
                self, new_state
            )))
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Idle => "Idle",
            LinkState::AwaitingSync => "AwaitingSync",
            LinkState::AwaitingAck => "AwaitingAck",
            LinkState::AwaitingResponse => "AwaitingResponse",
            LinkState::AwaitingData => "AwaitingData",
        }
    }
}
