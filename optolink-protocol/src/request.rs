//! Requests handed to the protocol engines

use crate::error::{OptolinkError, OptolinkResult};
use optolink_core::DataPointAddress;
use optolink_core::command::MAX_PAYLOAD_LENGTH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    /// Write carrying the encoded payload
    Write(Vec<u8>),
}

/// One read or write on the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: RequestKind,
    pub address: DataPointAddress,
    /// Payload length in bytes
    pub length: usize,
    /// Name of the command this request was created for
    pub command: String,
}

impl Request {
    pub fn read(command: impl Into<String>, address: DataPointAddress, length: usize) -> OptolinkResult<Self> {
        Self::check_length(length)?;
        Ok(Self {
            kind: RequestKind::Read,
            address,
            length,
            command: command.into(),
        })
    }

    pub fn write(command: impl Into<String>, address: DataPointAddress, data: Vec<u8>) -> OptolinkResult<Self> {
        Self::check_length(data.len())?;
        Ok(Self {
            length: data.len(),
            kind: RequestKind::Write(data),
            address,
            command: command.into(),
        })
    }

    pub fn is_write(&self) -> bool {
        matches!(self.kind, RequestKind::Write(_))
    }

    /// Payload of a write, empty for reads
    pub fn payload(&self) -> &[u8] {
        match &self.kind {
            RequestKind::Read => &[],
            RequestKind::Write(data) => data,
        }
    }

    fn check_length(length: usize) -> OptolinkResult<()> {
        if length == 0 || length > MAX_PAYLOAD_LENGTH {
            return Err(OptolinkError::InvalidData(format!(
                "Request length must be 1..={}, got {}",
                MAX_PAYLOAD_LENGTH, length
            )));
        }
        Ok(())
    }
}
