//! Command scheduler for Optolink heating controllers
//!
//! Serialises reads and writes from any number of callers, cyclic timers and
//! follow-up timers onto the single half-duplex link, and converts payloads
//! to typed values through the command table.
//!
//! - [`Scheduler`]: `read_now`, `write_now`, `schedule_cyclic`, `initialize_all`,
//!   `refresh_all`, ad-hoc address access, statistics and `stop`
//! - [`SchedulerBuilder`]: wires protocol, transport, commands and items
//! - [`OptolinkConfig`]: YAML configuration
//! - [`ValueListener`]: result notification

pub mod builder;
pub mod config;
pub mod item;
pub mod listener;
pub mod scheduler;

pub use builder::SchedulerBuilder;
pub use config::OptolinkConfig;
pub use item::{ScheduledItem, DEFAULT_TRIGGER_DELAY};
pub use listener::{ChannelListener, LogListener, ValueEvent, ValueListener};
pub use scheduler::Scheduler;
