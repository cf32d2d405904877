use thiserror::Error;

/// Main error type for Optolink operations
#[derive(Error, Debug)]
pub enum OptolinkError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A single transport read did not complete within its bound
    #[error("Timeout")]
    Timeout,

    /// The device did not answer within the bound after all resynchronisation attempts
    #[error("Link timeout: {0}")]
    LinkTimeout(String),

    #[error("Device rejected telegram: {0}")]
    ProtocolNack(String),

    #[error("Frame corrupt: {0}")]
    FrameCorrupt(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("Value too long: {0}")]
    ValueTooLong(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Unsupported access: {0}")]
    UnsupportedAccess(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler is not running")]
    NotRunning,
}

impl OptolinkError {
    /// Whether the protocol engines restart the exchange from `Idle` on this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OptolinkError::Timeout | OptolinkError::LinkTimeout(_) | OptolinkError::FrameCorrupt(_)
        )
    }

    /// Whether the error was raised before anything reached the link
    pub fn is_codec_error(&self) -> bool {
        matches!(
            self,
            OptolinkError::ValueOutOfRange(_)
                | OptolinkError::ValueTooLong(_)
                | OptolinkError::InvalidSchedule(_)
        )
    }
}

/// Result type alias for Optolink operations
pub type OptolinkResult<T> = Result<T, OptolinkError>;
