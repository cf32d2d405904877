//! Per-item scheduling attributes

use optolink_core::{CommandTable, OptolinkError, OptolinkResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Delay before triggered reads when an item does not set one
pub const DEFAULT_TRIGGER_DELAY: Duration = Duration::from_secs(5);

/// Scheduling attributes of one configured command
///
/// ```yaml
/// command: Betriebsart_A1M1
/// cycle: 300            # seconds
/// initial_read: true
/// read_after_write: 5
/// triggers: [Sparbetrieb_A1M1, Partybetrieb_A1M1]
/// trigger_delay: 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledItem {
    pub command: String,
    /// Period of the cyclic read
    #[serde(default, with = "seconds::option", skip_serializing_if = "Option::is_none")]
    pub cycle: Option<Duration>,
    /// Read once by `initialize_all`
    #[serde(default)]
    pub initial_read: bool,
    /// Delay of the confirming read after a successful write
    #[serde(default, with = "seconds::option", skip_serializing_if = "Option::is_none")]
    pub read_after_write: Option<Duration>,
    /// Commands re-read after a successful write to this item
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<String>,
    #[serde(default = "default_trigger_delay", with = "seconds")]
    pub trigger_delay: Duration,
}

fn default_trigger_delay() -> Duration {
    DEFAULT_TRIGGER_DELAY
}

impl ScheduledItem {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cycle: None,
            initial_read: false,
            read_after_write: None,
            triggers: Vec::new(),
            trigger_delay: DEFAULT_TRIGGER_DELAY,
        }
    }

    pub fn with_cycle(mut self, period: Duration) -> Self {
        self.cycle = Some(period);
        self
    }

    pub fn with_initial_read(mut self, initial_read: bool) -> Self {
        self.initial_read = initial_read;
        self
    }

    pub fn with_read_after_write(mut self, delay: Duration) -> Self {
        self.read_after_write = Some(delay);
        self
    }

    /// Add a command to re-read after writes, ignoring duplicates
    pub fn with_trigger(mut self, command: impl Into<String>) -> Self {
        let command = command.into();
        if !self.triggers.contains(&command) {
            self.triggers.push(command);
        }
        self
    }

    pub fn with_trigger_delay(mut self, delay: Duration) -> Self {
        self.trigger_delay = delay;
        self
    }

    /// Whether a successful write schedules any follow-up read
    pub fn has_follow_ups(&self) -> bool {
        self.read_after_write.is_some() || !self.triggers.is_empty()
    }
}

/// Check items against the command table
///
/// # Errors
///
/// `UnknownCommand` for an item or trigger naming a missing command,
/// `Config` for duplicate items and zero cycle periods.
pub fn validate_items(table: &CommandTable, items: &[ScheduledItem]) -> OptolinkResult<()> {
    let mut seen = HashSet::new();
    for item in items {
        let spec = table.get(&item.command)?;
        if !seen.insert(item.command.as_str()) {
            return Err(OptolinkError::Config(format!(
                "Item {} configured twice",
                item.command
            )));
        }
        if item.cycle.is_some_and(|period| period.is_zero()) {
            return Err(OptolinkError::Config(format!(
                "Item {} has a zero cycle period",
                item.command
            )));
        }
        if item.cycle.is_some() && !spec.access.can_read() {
            return Err(OptolinkError::Config(format!(
                "Item {} is cyclic but {} is write-only",
                item.command, spec.name
            )));
        }
        for trigger in &item.triggers {
            table.get(trigger)?;
        }
    }
    Ok(())
}

/// Durations as (fractional) seconds
pub(crate) mod seconds {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom(format!("invalid duration: {} seconds", secs)))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
            #[derive(Deserialize)]
            struct Seconds(#[serde(with = "super")] Duration);

            Ok(Option::<Seconds>::deserialize(deserializer)?.map(|Seconds(duration)| duration))
        }
    }
}
