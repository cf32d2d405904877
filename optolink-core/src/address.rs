use crate::error::{OptolinkError, OptolinkResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 16-bit address of a data point on the heating controller
///
/// Addresses are conventionally written as four hex digits (`2323`) or with a
/// `0x` prefix (`0x2323`). On the wire they are transmitted high byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "AddressRepr", into = "String")]
pub struct DataPointAddress(u16);

/// Accepted configuration representations of an address
#[derive(Deserialize)]
#[serde(untagged)]
enum AddressRepr {
    Number(u16),
    Text(String),
}

impl DataPointAddress {
    /// Create an address from its numeric value
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Parse an address from hex notation
    ///
    /// Supports `"2323"`, `"0x2323"` and `"0X2323"`.
    pub fn from_string(s: &str) -> OptolinkResult<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() || digits.len() > 4 {
            return Err(OptolinkError::InvalidData(format!(
                "Invalid address format: {}",
                s
            )));
        }
        u16::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| OptolinkError::InvalidData(format!("Invalid address format: {}", s)))
    }

    /// Numeric value of the address
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Address bytes in wire order (high byte first)
    pub fn to_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// Build an address from wire-order bytes
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }
}

impl From<u16> for DataPointAddress {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl TryFrom<AddressRepr> for DataPointAddress {
    type Error = OptolinkError;

    fn try_from(repr: AddressRepr) -> Result<Self, Self::Error> {
        match repr {
            AddressRepr::Number(value) => Ok(Self(value)),
            AddressRepr::Text(text) => Self::from_string(&text),
        }
    }
}

impl From<DataPointAddress> for String {
    fn from(address: DataPointAddress) -> Self {
        address.to_string()
    }
}

impl FromStr for DataPointAddress {
    type Err = OptolinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

impl fmt::Display for DataPointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}
