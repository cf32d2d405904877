//! Time of day used by switching-time schedules

use crate::error::{OptolinkError, OptolinkResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MINUTES_PER_DAY: u16 = 24 * 60;

/// `hh:mm` clock pattern
static CLOCK_PATTERN: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r"^\s*(\d{1,2}):(\d{2})\s*$").expect("static clock pattern is valid")
});

/// Time of day with minute resolution
///
/// Serialized as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Constructs a time of day
    ///
    /// # Arguments
    ///
    /// * `hour` - The hour from 0 to 23
    /// * `minute` - The minute from 0 to 59
    pub fn new(hour: u8, minute: u8) -> OptolinkResult<Self> {
        Self::verify(hour, "Hour", 23)?;
        Self::verify(minute, "Minute", 59)?;
        Ok(Self { hour, minute })
    }

    /// Constructs a time of day from minutes since midnight
    pub fn from_minutes(minutes: u16) -> OptolinkResult<Self> {
        if minutes >= MINUTES_PER_DAY {
            return Err(OptolinkError::InvalidData(format!(
                "Minutes since midnight out of range [0, {}), got {}",
                MINUTES_PER_DAY, minutes
            )));
        }
        Ok(Self {
            hour: (minutes / 60) as u8,
            minute: (minutes % 60) as u8,
        })
    }

    /// Parse `"HH:MM"` or `"H:MM"`
    pub fn parse(s: &str) -> OptolinkResult<Self> {
        let captures = CLOCK_PATTERN.captures(s).ok_or_else(|| {
            OptolinkError::InvalidData(format!("Incorrect time format, hh:mm expected: {}", s))
        })?;
        let hour = captures[1]
            .parse::<u8>()
            .map_err(|_| OptolinkError::InvalidData(format!("Invalid hour in {}", s)))?;
        let minute = captures[2]
            .parse::<u8>()
            .map_err(|_| OptolinkError::InvalidData(format!("Invalid minute in {}", s)))?;
        Self::new(hour, minute)
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Minutes elapsed since midnight
    pub fn minutes_since_midnight(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }

    fn verify(value: u8, name: &str, upper_bound: u8) -> OptolinkResult<()> {
        if value > upper_bound {
            Err(OptolinkError::InvalidData(format!(
                "{} is out of range [0, {}], got {}",
                name, upper_bound, value
            )))
        } else {
            Ok(())
        }
    }
}

impl FromStr for TimeOfDay {
    type Err = OptolinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = OptolinkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TimeOfDay> for String {
    fn from(time: TimeOfDay) -> Self {
        time.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}
