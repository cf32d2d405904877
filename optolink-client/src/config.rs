//! Host configuration
//!
//! ```yaml
//! protocol: P300
//! port: /dev/ttyUSB0
//! baud_rate: 4800
//! timeout: 1.5
//! retries: 3
//! commands:
//!   - name: Aussentemperatur
//!     address: "0x0800"
//!     length: 2
//!     type: scaled
//!     scale: 10
//!     signed: true
//!     access: read
//! items:
//!   - command: Aussentemperatur
//!     cycle: 300
//!     initial_read: true
//! ```

use crate::item::{seconds, validate_items, ScheduledItem};
use anyhow::Context;
use optolink_core::{CommandSpec, CommandTable, OptolinkError, OptolinkResult};
use optolink_protocol::{LinkSettings, ProtocolKind};
use optolink_transport::serial::DEFAULT_BAUD_RATE;
use optolink_transport::TransportSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout() -> Duration {
    LinkSettings::default().timeout
}

fn default_retries() -> u32 {
    LinkSettings::default().retries
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptolinkConfig {
    #[serde(default)]
    pub protocol: ProtocolKind,
    /// Serial device name, or `tcp://host:port` for a network adapter
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-read timeout in seconds
    #[serde(default = "default_timeout", with = "seconds")]
    pub timeout: Duration,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub items: Vec<ScheduledItem>,
}

impl OptolinkConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(text: &str) -> OptolinkResult<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| OptolinkError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_yaml(&text)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        log::info!(
            "Loaded {} commands and {} items from {}",
            config.commands.len(),
            config.items.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn validate(&self) -> OptolinkResult<()> {
        if self.port.trim().is_empty() {
            return Err(OptolinkError::Config("No port configured".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(OptolinkError::Config("Baud rate must be positive".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(OptolinkError::Config("Timeout must be positive".to_string()));
        }
        let table = self.command_table()?;
        validate_items(&table, &self.items)
    }

    pub fn command_table(&self) -> OptolinkResult<CommandTable> {
        CommandTable::from_specs(self.commands.iter().cloned())
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            timeout: self.timeout,
            retries: self.retries,
            ..LinkSettings::default()
        }
    }

    pub fn transport_settings(&self) -> OptolinkResult<TransportSettings> {
        TransportSettings::from_port(&self.port, self.baud_rate, self.timeout)
    }
}
