//! Scheduler builder
//!
//! Collects the protocol, transport, command table, items and listener, then
//! starts a [`Scheduler`] on top of the selected engine.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use optolink_client::{OptolinkConfig, SchedulerBuilder};
//!
//! # async fn run() -> anyhow::Result<()> {
//! // From a configuration file
//! let config = OptolinkConfig::load("optolink.yaml")?;
//! let scheduler = SchedulerBuilder::from_config(&config)?.build()?;
//!
//! // Or by hand, over a network serial adapter
//! let scheduler = SchedulerBuilder::new()
//!     .kw()
//!     .tcp("192.168.1.20:3000")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::config::OptolinkConfig;
use crate::item::ScheduledItem;
use crate::listener::{LogListener, ValueListener};
use crate::scheduler::Scheduler;
use optolink_core::{CommandSpec, CommandTable, OptolinkError, OptolinkResult};
use optolink_protocol::{Engine, LinkSettings, ProtocolKind};
use optolink_transport::serial::DEFAULT_BAUD_RATE;
use optolink_transport::{SerialSettings, TcpSettings, TransportLayer, TransportSettings};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Builder for a running [`Scheduler`]
///
/// # Default Settings
/// - Protocol: P300
/// - Link: 1.5 s read timeout, 3 resynchronisations
/// - Listener: log only
/// - Items flagged `initial_read` are read right after start
pub struct SchedulerBuilder {
    protocol: ProtocolKind,
    transport: Option<TransportSettings>,
    link: LinkSettings,
    commands: Vec<CommandSpec>,
    items: Vec<ScheduledItem>,
    listener: Arc<dyn ValueListener>,
    initialize: bool,
}

impl fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("protocol", &self.protocol)
            .field("transport", &self.transport)
            .field("link", &self.link)
            .field("commands", &self.commands.len())
            .field("items", &self.items.len())
            .field("initialize", &self.initialize)
            .finish_non_exhaustive()
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            protocol: ProtocolKind::default(),
            transport: None,
            link: LinkSettings::default(),
            commands: Vec::new(),
            items: Vec::new(),
            listener: Arc::new(LogListener),
            initialize: true,
        }
    }

    /// Take protocol, port, timing, commands and items from a configuration
    pub fn from_config(config: &OptolinkConfig) -> OptolinkResult<Self> {
        config.validate()?;
        Ok(Self {
            protocol: config.protocol,
            transport: Some(config.transport_settings()?),
            link: config.link_settings(),
            commands: config.commands.clone(),
            items: config.items.clone(),
            ..Self::new()
        })
    }

    pub fn protocol(mut self, protocol: ProtocolKind) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn p300(self) -> Self {
        self.protocol(ProtocolKind::P300)
    }

    pub fn kw(self) -> Self {
        self.protocol(ProtocolKind::Kw)
    }

    /// Configure a local serial port
    ///
    /// # Arguments
    /// * `port_name` - Serial port name (e.g., "/dev/ttyUSB0" or "COM1")
    /// * `baud_rate` - Baud rate, normally 4800
    pub fn serial(mut self, port_name: &str, baud_rate: u32) -> Self {
        self.transport = Some(TransportSettings::Serial(SerialSettings::with_timeout(
            port_name.to_string(),
            baud_rate,
            self.link.timeout,
        )));
        self
    }

    /// Configure a network serial adapter at `host:port`
    pub fn tcp(mut self, address: &str) -> Self {
        self.transport = Some(TransportSettings::Tcp(TcpSettings::with_timeout(
            address.strip_prefix("tcp://").unwrap_or(address),
            self.link.timeout,
        )));
        self
    }

    /// Configure the transport from a port string (`tcp://` selects TCP)
    pub fn port(mut self, port: &str) -> OptolinkResult<Self> {
        self.transport = Some(TransportSettings::from_port(
            port,
            DEFAULT_BAUD_RATE,
            self.link.timeout,
        )?);
        Ok(self)
    }

    /// Per-read timeout of the link
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.link.timeout = timeout;
        self
    }

    /// Resynchronisations before an exchange fails
    pub fn retries(mut self, retries: u32) -> Self {
        self.link.retries = retries;
        self
    }

    pub fn link_settings(mut self, link: LinkSettings) -> Self {
        self.link = link;
        self
    }

    pub fn command(mut self, spec: CommandSpec) -> Self {
        self.commands.push(spec);
        self
    }

    pub fn commands(mut self, table: &CommandTable) -> Self {
        self.commands.extend(table.iter().cloned());
        self
    }

    pub fn item(mut self, item: ScheduledItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ValueListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Whether `initialize_all` runs right after start
    pub fn initialize(mut self, initialize: bool) -> Self {
        self.initialize = initialize;
        self
    }

    /// Start the scheduler on the configured transport
    ///
    /// The transport is opened by the engine before the first exchange.
    ///
    /// # Errors
    /// `Config` when no transport was configured, or any item error
    pub fn build(mut self) -> OptolinkResult<Scheduler> {
        let settings = self
            .transport
            .take()
            .ok_or_else(|| OptolinkError::Config("No transport configured".to_string()))?;
        self.build_with_transport(settings.build())
    }

    /// Start the scheduler on an already constructed transport
    pub fn build_with_transport<T>(self, transport: T) -> OptolinkResult<Scheduler>
    where
        T: TransportLayer + 'static,
    {
        let table = CommandTable::from_specs(self.commands)?;
        let engine = Engine::new(self.protocol, transport, self.link);
        let scheduler = Scheduler::start(engine, table, self.items, self.listener)?;
        if self.initialize {
            scheduler.initialize_all()?;
        }
        Ok(scheduler)
    }
}
