//! optolink - Rust implementation of the Optolink heating controller link
//!
//! Reads and writes data points of heating controllers over the optical
//! service interface, using either the P300 or the KW protocol.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `optolink-core`: error taxonomy, command table, typed values, value codec
//! - `optolink-transport`: serial, TCP (network adapters) and in-memory transports
//! - `optolink-protocol`: P300 and KW protocol engines
//! - `optolink-client`: command scheduler, configuration, result listeners
//! - `optolink-device`: software device for testing without hardware
//!
//! # Usage
//!
//! ```no_run
//! use optolink::client::{OptolinkConfig, SchedulerBuilder};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = OptolinkConfig::load("optolink.yaml")?;
//! let scheduler = SchedulerBuilder::from_config(&config)?.build()?;
//! let value = scheduler.read_now("Aussentemperatur").await?;
//! println!("Aussentemperatur = {}", value);
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use optolink_core::codec;
pub use optolink_core::{
    AccessMode, ByteOrder, CommandSpec, CommandTable, DataPointAddress, DataType, OptolinkError,
    OptolinkResult, SwitchingPair, TimeOfDay, TimerEncoding, TimerSchedule, TypedValue,
    ValueFormat,
};

// Re-export the protocol engines
pub mod protocol {
    pub use optolink_protocol::*;
}

// Re-export transports
pub mod transport {
    pub use optolink_transport::*;
}

// Re-export client API
pub mod client {
    pub use optolink_client::*;
}

// Re-export the software device
pub mod device {
    pub use optolink_device::*;
}
