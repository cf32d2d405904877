//! Typed values exchanged with callers

use crate::datatypes::timer_schedule::TimerSchedule;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A decoded data point value
///
/// The variant produced by decoding depends on the command's data type:
///
/// | data type        | variant                         |
/// |------------------|---------------------------------|
/// | integer          | `Integer`                       |
/// | scaled           | `Number`                        |
/// | boolean          | `Boolean`                       |
/// | string           | `Text`                          |
/// | timer_schedule   | `Schedule`                      |
/// | enumeration      | `Text` (label) or `Integer`     |
/// | datetime         | `DateTime`                      |
/// | date             | `Date`                          |
/// | serial_number    | `Text`                          |
/// | raw              | `Raw`                           |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Text(String),
    Schedule(TimerSchedule),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Raw(Vec<u8>),
}

impl TypedValue {
    /// Name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            TypedValue::Integer(_) => "integer",
            TypedValue::Number(_) => "number",
            TypedValue::Boolean(_) => "boolean",
            TypedValue::Text(_) => "text",
            TypedValue::Schedule(_) => "schedule",
            TypedValue::DateTime(_) => "datetime",
            TypedValue::Date(_) => "date",
            TypedValue::Raw(_) => "raw",
        }
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Integer(v) => Some(*v as f64),
            TypedValue::Number(v) => Some(*v),
            TypedValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Boolean(v) => Some(*v),
            TypedValue::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for TypedValue {
    fn from(value: i64) -> Self {
        TypedValue::Integer(value)
    }
}

impl From<i32> for TypedValue {
    fn from(value: i32) -> Self {
        TypedValue::Integer(value as i64)
    }
}

impl From<f64> for TypedValue {
    fn from(value: f64) -> Self {
        TypedValue::Number(value)
    }
}

impl From<bool> for TypedValue {
    fn from(value: bool) -> Self {
        TypedValue::Boolean(value)
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        TypedValue::Text(value.to_string())
    }
}

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        TypedValue::Text(value)
    }
}

impl From<TimerSchedule> for TypedValue {
    fn from(value: TimerSchedule) -> Self {
        TypedValue::Schedule(value)
    }
}

impl From<NaiveDateTime> for TypedValue {
    fn from(value: NaiveDateTime) -> Self {
        TypedValue::DateTime(value)
    }
}

impl From<NaiveDate> for TypedValue {
    fn from(value: NaiveDate) -> Self {
        TypedValue::Date(value)
    }
}

impl From<Vec<u8>> for TypedValue {
    fn from(value: Vec<u8>) -> Self {
        TypedValue::Raw(value)
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Integer(v) => write!(f, "{}", v),
            TypedValue::Number(v) => write!(f, "{}", v),
            TypedValue::Boolean(v) => write!(f, "{}", v),
            TypedValue::Text(v) => write!(f, "{}", v),
            TypedValue::Schedule(v) => write!(f, "{}", v),
            TypedValue::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
            TypedValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            TypedValue::Raw(v) => {
                for byte in v {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
        }
    }
}
