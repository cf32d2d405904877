//! Daily switching-time schedules (up to four on/off pairs)

use crate::datatypes::time_of_day::TimeOfDay;
use crate::error::{OptolinkError, OptolinkResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte value marking an unused switching time
pub const UNSET: u8 = 0xFF;

/// Number of on/off pairs in one daily schedule
pub const SLOTS: usize = 4;

/// Encoded length of one daily schedule in bytes
pub const ENCODED_LENGTH: usize = SLOTS * 2;

/// How a single switching time is packed into one byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerEncoding {
    /// byte = minutes since midnight / quantum
    Quantum { minutes: u8 },
    /// byte = hour * 8 + minute / 10
    Packed,
}

impl TimerEncoding {
    /// Encode a time of day, truncating to the encoding's resolution
    pub fn encode_time(&self, time: TimeOfDay) -> OptolinkResult<u8> {
        let raw = match *self {
            TimerEncoding::Quantum { minutes } => {
                if minutes == 0 {
                    return Err(OptolinkError::InvalidData(
                        "Timer quantum must be at least one minute".to_string(),
                    ));
                }
                time.minutes_since_midnight() / minutes as u16
            }
            TimerEncoding::Packed => time.hour() as u16 * 8 + time.minute() as u16 / 10,
        };
        if raw >= UNSET as u16 {
            return Err(OptolinkError::ValueOutOfRange(format!(
                "Switching time {} does not fit into one byte with {:?}",
                time, self
            )));
        }
        Ok(raw as u8)
    }

    /// Decode one switching-time byte (must not be the unset sentinel)
    pub fn decode_time(&self, raw: u8) -> OptolinkResult<TimeOfDay> {
        match *self {
            TimerEncoding::Quantum { minutes } => {
                if minutes == 0 {
                    return Err(OptolinkError::InvalidData(
                        "Timer quantum must be at least one minute".to_string(),
                    ));
                }
                TimeOfDay::from_minutes(raw as u16 * minutes as u16)
            }
            TimerEncoding::Packed => {
                let (hour, tens) = (raw / 8, raw % 8);
                if hour >= 24 || tens >= 6 {
                    return Err(OptolinkError::InvalidData(format!(
                        "Invalid packed switching time 0x{:02X}",
                        raw
                    )));
                }
                TimeOfDay::new(hour, tens * 10)
            }
        }
    }

    /// Bring a time of day down to the resolution this encoding can carry
    pub fn quantize(&self, time: TimeOfDay) -> OptolinkResult<TimeOfDay> {
        let raw = self.encode_time(time)?;
        self.decode_time(raw)
    }
}

impl Default for TimerEncoding {
    fn default() -> Self {
        TimerEncoding::Quantum { minutes: 10 }
    }
}

/// One on/off switching pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchingPair {
    pub on: TimeOfDay,
    pub off: TimeOfDay,
}

impl SwitchingPair {
    /// Create a switching pair; `on` must be strictly before `off`
    pub fn new(on: TimeOfDay, off: TimeOfDay) -> OptolinkResult<Self> {
        let pair = Self { on, off };
        pair.validate()?;
        Ok(pair)
    }

    /// Parse a pair from two `hh:mm` strings
    pub fn parse(on: &str, off: &str) -> OptolinkResult<Self> {
        Self::new(TimeOfDay::parse(on)?, TimeOfDay::parse(off)?)
    }

    fn validate(&self) -> OptolinkResult<()> {
        if self.on >= self.off {
            return Err(OptolinkError::InvalidSchedule(format!(
                "On-time {} is not before off-time {}",
                self.on, self.off
            )));
        }
        Ok(())
    }
}

impl fmt::Display for SwitchingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.on, self.off)
    }
}

/// Daily switching schedule
///
/// Holds up to [`SLOTS`] pairs. Slots keep their device position so that a
/// schedule read from the device is written back byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimerSchedule {
    slots: [Option<SwitchingPair>; SLOTS],
}

impl TimerSchedule {
    /// A schedule with all slots unset
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a schedule from pairs given in ascending time order
    ///
    /// # Errors
    /// `InvalidSchedule` if more than four pairs are supplied, a pair is
    /// inverted, or the pairs are not ascending and non-overlapping.
    pub fn new(pairs: Vec<SwitchingPair>) -> OptolinkResult<Self> {
        if pairs.len() > SLOTS {
            return Err(OptolinkError::InvalidSchedule(format!(
                "At most {} switching pairs allowed, got {}",
                SLOTS,
                pairs.len()
            )));
        }
        let mut slots = [None; SLOTS];
        for (slot, pair) in slots.iter_mut().zip(pairs) {
            *slot = Some(pair);
        }
        let schedule = Self { slots };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Build a schedule from raw slots without validation
    pub fn from_slots(slots: [Option<SwitchingPair>; SLOTS]) -> Self {
        Self { slots }
    }

    /// Check the pair and ordering invariants
    pub fn validate(&self) -> OptolinkResult<()> {
        let mut previous: Option<SwitchingPair> = None;
        for pair in self.pairs() {
            pair.validate()?;
            if let Some(prev) = previous {
                if pair.on < prev.off {
                    return Err(OptolinkError::InvalidSchedule(format!(
                        "Switching pair {} is not after {}",
                        pair, prev
                    )));
                }
            }
            previous = Some(pair);
        }
        Ok(())
    }

    pub fn slots(&self) -> &[Option<SwitchingPair>; SLOTS] {
        &self.slots
    }

    /// Set pairs in slot order
    pub fn pairs(&self) -> impl Iterator<Item = SwitchingPair> + '_ {
        self.slots.iter().flatten().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Encode to the 8-byte device representation
    pub fn encode(&self, encoding: TimerEncoding) -> OptolinkResult<[u8; ENCODED_LENGTH]> {
        self.validate()?;
        let mut bytes = [UNSET; ENCODED_LENGTH];
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(pair) = slot {
                let on = encoding.encode_time(pair.on)?;
                let off = encoding.encode_time(pair.off)?;
                if on >= off {
                    return Err(OptolinkError::InvalidSchedule(format!(
                        "Switching pair {} collapses at the timer resolution",
                        pair
                    )));
                }
                bytes[index * 2] = on;
                bytes[index * 2 + 1] = off;
            }
        }
        Ok(bytes)
    }

    /// Decode the 8-byte device representation
    pub fn decode(bytes: &[u8], encoding: TimerEncoding) -> OptolinkResult<Self> {
        if bytes.len() != ENCODED_LENGTH {
            return Err(OptolinkError::InvalidData(format!(
                "Wrong size. Expected {}, got {}",
                ENCODED_LENGTH,
                bytes.len()
            )));
        }
        let mut slots = [None; SLOTS];
        for (index, chunk) in bytes.chunks_exact(2).enumerate() {
            slots[index] = match (chunk[0], chunk[1]) {
                (UNSET, UNSET) => None,
                (UNSET, _) | (_, UNSET) => {
                    return Err(OptolinkError::InvalidData(format!(
                        "Half-set switching pair in slot {}: {:02X} {:02X}",
                        index + 1,
                        chunk[0],
                        chunk[1]
                    )));
                }
                (on, off) => Some(SwitchingPair {
                    on: encoding.decode_time(on)?,
                    off: encoding.decode_time(off)?,
                }),
            };
        }
        Ok(Self { slots })
    }
}

impl fmt::Display for TimerSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .slots
            .iter()
            .map(|slot| match slot {
                Some(pair) => pair.to_string(),
                None => "--:--".to_string(),
            })
            .collect();
        write!(f, "[{}]", rendered.join(", "))
    }
}
