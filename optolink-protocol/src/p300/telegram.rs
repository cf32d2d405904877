//! P300 telegram encoding and decoding
//!
//! Layout:
//!
//! ```text
//! 0x41 | len | type | function | addr_hi | addr_lo | count | data... | checksum
//! ```
//!
//! `len` counts the bytes from `type` through the last data byte. The
//! checksum covers every byte after the start marker.

use crate::error::{OptolinkError, OptolinkResult};
use crate::p300::checksum::ChecksumCalc;
use bytes::{BufMut, BytesMut};
use optolink_core::DataPointAddress;
use std::fmt;

/// Telegram start marker
pub const START: u8 = 0x41;
/// Reset / end of communication
pub const RESET: u8 = 0x04;
/// Device is not initialised (sent in reply to a reset)
pub const NOT_INITIALISED: u8 = 0x05;
/// Synchronisation string
pub const SYNC: [u8; 3] = [0x16, 0x00, 0x00];
/// Positive acknowledge
pub const ACK: u8 = 0x06;
/// Negative acknowledge
pub const NACK: u8 = 0x15;

/// Bytes between `len` and the data: type, function, address, count
const HEADER_LENGTH: usize = 5;

/// Telegram type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelegramType {
    Request,
    Response,
    /// Device-side rejection
    Error,
}

impl TelegramType {
    pub fn from_byte(byte: u8) -> OptolinkResult<Self> {
        match byte {
            0x00 => Ok(TelegramType::Request),
            0x01 => Ok(TelegramType::Response),
            0x03 => Ok(TelegramType::Error),
            other => Err(OptolinkError::FrameCorrupt(format!(
                "Unknown telegram type 0x{:02X}",
                other
            ))),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            TelegramType::Request => 0x00,
            TelegramType::Response => 0x01,
            TelegramType::Error => 0x03,
        }
    }
}

/// Function code byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    Read,
    Write,
    Call,
}

impl FunctionCode {
    pub fn from_byte(byte: u8) -> OptolinkResult<Self> {
        match byte {
            0x01 => Ok(FunctionCode::Read),
            0x02 => Ok(FunctionCode::Write),
            0x07 => Ok(FunctionCode::Call),
            other => Err(OptolinkError::FrameCorrupt(format!(
                "Unknown function code 0x{:02X}",
                other
            ))),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            FunctionCode::Read => 0x01,
            FunctionCode::Write => 0x02,
            FunctionCode::Call => 0x07,
        }
    }
}

/// One P300 telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    pub telegram_type: TelegramType,
    pub function: FunctionCode,
    pub address: DataPointAddress,
    /// Number of payload bytes requested or written
    pub count: u8,
    pub data: Vec<u8>,
}

impl Telegram {
    /// Read request for `count` bytes at `address`
    pub fn read_request(address: DataPointAddress, count: u8) -> Self {
        Self {
            telegram_type: TelegramType::Request,
            function: FunctionCode::Read,
            address,
            count,
            data: Vec::new(),
        }
    }

    /// Write request carrying `data`
    pub fn write_request(address: DataPointAddress, data: Vec<u8>) -> OptolinkResult<Self> {
        let count = u8::try_from(data.len()).map_err(|_| {
            OptolinkError::ValueTooLong(format!("{} bytes exceed one telegram", data.len()))
        })?;
        Ok(Self {
            telegram_type: TelegramType::Request,
            function: FunctionCode::Write,
            address,
            count,
            data,
        })
    }

    /// Response to this request, as a device would send it
    pub fn response(&self, data: Vec<u8>) -> Self {
        Self {
            telegram_type: TelegramType::Response,
            function: self.function,
            address: self.address,
            count: self.count,
            data,
        }
    }

    /// Error response to this request
    pub fn error_response(&self) -> Self {
        Self {
            telegram_type: TelegramType::Error,
            function: self.function,
            address: self.address,
            count: self.count,
            data: Vec::new(),
        }
    }

    /// Encode the telegram including start marker and checksum
    pub fn encode(&self) -> OptolinkResult<Vec<u8>> {
        let len = u8::try_from(HEADER_LENGTH + self.data.len()).map_err(|_| {
            OptolinkError::ValueTooLong(format!("{} data bytes exceed one telegram", self.data.len()))
        })?;
        let mut buf = BytesMut::with_capacity(len as usize + 3);
        buf.put_u8(START);
        buf.put_u8(len);
        buf.put_u8(self.telegram_type.to_byte());
        buf.put_u8(self.function.to_byte());
        buf.put_slice(&self.address.to_bytes());
        buf.put_u8(self.count);
        buf.put_slice(&self.data);
        let checksum = ChecksumCalc::of(&buf[1..]);
        buf.put_u8(checksum);
        Ok(buf.to_vec())
    }

    /// Decode a complete telegram
    ///
    /// # Arguments
    ///
    /// * `frame` - Bytes from the start marker through the checksum
    ///
    /// # Errors
    ///
    /// `FrameCorrupt` on a wrong start marker, length, or checksum
    pub fn decode(frame: &[u8]) -> OptolinkResult<Self> {
        if frame.len() < HEADER_LENGTH + 3 {
            return Err(OptolinkError::FrameCorrupt(format!(
                "Telegram too short: {} bytes",
                frame.len()
            )));
        }
        if frame[0] != START {
            return Err(OptolinkError::FrameCorrupt(format!(
                "Invalid start byte 0x{:02X}",
                frame[0]
            )));
        }
        let len = frame[1] as usize;
        if frame.len() != len + 3 {
            return Err(OptolinkError::FrameCorrupt(format!(
                "Length byte {} does not match telegram of {} bytes",
                len,
                frame.len()
            )));
        }

        let mut calc = ChecksumCalc::new();
        calc.update_bytes(&frame[1..frame.len() - 1]);
        calc.validate(frame[frame.len() - 1])?;

        Ok(Self {
            telegram_type: TelegramType::from_byte(frame[2])?,
            function: FunctionCode::from_byte(frame[3])?,
            address: DataPointAddress::from_bytes([frame[4], frame[5]]),
            count: frame[6],
            data: frame[7..frame.len() - 1].to_vec(),
        })
    }
}

impl fmt::Display for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} {} count={} data=",
            self.telegram_type, self.function, self.address, self.count
        )?;
        for byte in &self.data {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}
