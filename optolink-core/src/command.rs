//! Command table: symbolic data point definitions
//!
//! A [`CommandSpec`] describes where a data point lives on the device and how
//! its bytes are interpreted. The [`CommandTable`] is loaded once at startup
//! and is read-only afterwards.

use crate::address::DataPointAddress;
use crate::datatypes::TimerEncoding;
use crate::datatypes::timer_schedule::ENCODED_LENGTH as TIMER_LENGTH;
use crate::error::{OptolinkError, OptolinkResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Maximum payload length carried by a single telegram
pub const MAX_PAYLOAD_LENGTH: usize = u8::MAX as usize;

/// Longest serial number that still fits a `u64`
const MAX_SERIAL_DIGITS: usize = 19;

/// Interpretation of a data point's payload bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Integer,
    /// Integer divided by `scale`
    Scaled,
    Boolean,
    String,
    TimerSchedule,
    /// Integer mapped to labels
    Enumeration,
    /// BCD system time
    #[serde(rename = "datetime")]
    DateTime,
    /// Date part of a BCD system time
    Date,
    /// ASCII decimal digits shown as hex text
    SerialNumber,
    Raw,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Scaled => "scaled",
            DataType::Boolean => "boolean",
            DataType::String => "string",
            DataType::TimerSchedule => "timer_schedule",
            DataType::Enumeration => "enumeration",
            DataType::DateTime => "datetime",
            DataType::Date => "date",
            DataType::SerialNumber => "serial_number",
            DataType::Raw => "raw",
        }
    }
}

/// Allowed operations on a data point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
    #[default]
    ReadWrite,
}

impl AccessMode {
    pub fn can_read(&self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

/// Byte order of multi-byte integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

fn default_scale() -> f64 {
    1.0
}

/// Codec parameters of a data point
///
/// Kept separate from [`CommandSpec`] so ad-hoc address access can supply an
/// explicit format without a table entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueFormat {
    #[serde(rename = "type", default)]
    pub data_type: DataType,
    #[serde(default)]
    pub signed: bool,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub timer_encoding: TimerEncoding,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<i64, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

impl ValueFormat {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            signed: false,
            scale: default_scale(),
            byte_order: ByteOrder::default(),
            timer_encoding: TimerEncoding::default(),
            labels: BTreeMap::new(),
            min_value: None,
            max_value: None,
        }
    }

    /// Scaled number with the given divisor
    pub fn scaled(scale: f64) -> Self {
        Self::new(DataType::Scaled).with_scale(scale)
    }

    pub fn with_signed(mut self, signed: bool) -> Self {
        self.signed = signed;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_timer_encoding(mut self, encoding: TimerEncoding) -> Self {
        self.timer_encoding = encoding;
        self
    }

    pub fn with_label(mut self, raw: i64, label: impl Into<String>) -> Self {
        self.labels.insert(raw, label.into());
        self
    }

    pub fn with_bounds(mut self, min_value: Option<f64>, max_value: Option<f64>) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    /// Check the format against a payload length
    pub fn validate(&self, length: usize) -> OptolinkResult<()> {
        let fits = match self.data_type {
            DataType::Integer | DataType::Scaled | DataType::Enumeration | DataType::Boolean => {
                (1..=8).contains(&length)
            }
            DataType::TimerSchedule | DataType::DateTime | DataType::Date => length == TIMER_LENGTH,
            DataType::SerialNumber => (1..=MAX_SERIAL_DIGITS).contains(&length),
            // longer than 8 bytes for records such as error history entries
            DataType::String | DataType::Raw => (1..=MAX_PAYLOAD_LENGTH).contains(&length),
        };
        if !fits {
            return Err(OptolinkError::Config(format!(
                "Length {} is not valid for type {}",
                length,
                self.data_type.as_str()
            )));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(OptolinkError::Config(format!("Scale must be positive, got {}", self.scale)));
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(OptolinkError::Config(format!(
                    "min_value {} exceeds max_value {}",
                    min, max
                )));
            }
        }
        if let TimerEncoding::Quantum { minutes: 0 } = self.timer_encoding {
            return Err(OptolinkError::Config("Timer quantum must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for ValueFormat {
    fn default() -> Self {
        Self::new(DataType::Integer)
    }
}

/// Definition of one data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub address: DataPointAddress,
    pub length: usize,
    #[serde(flatten)]
    pub format: ValueFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub access: AccessMode,
}

impl CommandSpec {
    /// Constructs a validated command definition
    ///
    /// # Arguments
    ///
    /// * `name` - Unique symbolic name
    /// * `address` - Data point address on the device
    /// * `length` - Payload length in bytes
    /// * `format` - Codec parameters
    pub fn new(
        name: impl Into<String>,
        address: impl Into<DataPointAddress>,
        length: usize,
        format: ValueFormat,
    ) -> OptolinkResult<Self> {
        let spec = Self {
            name: name.into(),
            address: address.into(),
            length,
            format,
            unit: None,
            access: AccessMode::default(),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Definition for an address outside the command table
    pub fn adhoc(address: DataPointAddress, length: usize, format: ValueFormat) -> OptolinkResult<Self> {
        Self::new(format!("@{}", address), address, length, format)
    }

    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn data_type(&self) -> DataType {
        self.format.data_type
    }

    pub fn validate(&self) -> OptolinkResult<()> {
        if self.name.trim().is_empty() {
            return Err(OptolinkError::Config("Command name must not be empty".to_string()));
        }
        self.format
            .validate(self.length)
            .map_err(|e| OptolinkError::Config(format!("Command {}: {}", self.name, e)))
    }

    /// Fail with `UnsupportedAccess` unless the command is readable
    pub fn ensure_readable(&self) -> OptolinkResult<()> {
        if self.access.can_read() {
            Ok(())
        } else {
            Err(OptolinkError::UnsupportedAccess(format!("{} is write-only", self.name)))
        }
    }

    /// Fail with `UnsupportedAccess` unless the command is writable
    pub fn ensure_writable(&self) -> OptolinkResult<()> {
        if self.access.can_write() {
            Ok(())
        } else {
            Err(OptolinkError::UnsupportedAccess(format!("{} is read-only", self.name)))
        }
    }
}

/// Immutable lookup of command definitions by name and by address
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    specs: Vec<CommandSpec>,
    by_name: HashMap<String, usize>,
    by_address: HashMap<DataPointAddress, usize>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table, rejecting invalid or duplicate definitions
    pub fn from_specs(specs: impl IntoIterator<Item = CommandSpec>) -> OptolinkResult<Self> {
        let mut table = Self::new();
        for spec in specs {
            table.insert(spec)?;
        }
        Ok(table)
    }

    /// Add a definition
    ///
    /// Several names may share one address; the first one registered is
    /// returned by [`CommandTable::by_address`].
    pub fn insert(&mut self, spec: CommandSpec) -> OptolinkResult<()> {
        spec.validate()?;
        if self.by_name.contains_key(&spec.name) {
            return Err(OptolinkError::Config(format!("Duplicate command name: {}", spec.name)));
        }
        let index = self.specs.len();
        self.by_name.insert(spec.name.clone(), index);
        self.by_address.entry(spec.address).or_insert(index);
        self.specs.push(spec);
        Ok(())
    }

    /// Look up a definition by name
    pub fn get(&self, name: &str) -> OptolinkResult<&CommandSpec> {
        self.by_name
            .get(name)
            .map(|&index| &self.specs[index])
            .ok_or_else(|| OptolinkError::UnknownCommand(name.to_string()))
    }

    pub fn by_address(&self, address: DataPointAddress) -> Option<&CommandSpec> {
        self.by_address.get(&address).map(|&index| &self.specs[index])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Definitions in registration order
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.specs.iter()
    }
}
