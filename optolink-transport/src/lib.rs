//! Transport layer module for the Optolink protocols
//!
//! This crate provides byte-stream transports for the optical interface: a
//! local serial port, a network serial adapter reached over TCP, and an
//! in-memory duplex pipe used to talk to a software device.

pub mod error;
pub mod memory;
pub mod serial;
pub mod settings;
pub mod stream;
pub mod tcp;

pub use error::{OptolinkError, OptolinkResult};
pub use memory::MemoryTransport;
pub use serial::{SerialSettings, SerialTransport};
pub use settings::TransportSettings;
pub use stream::{StreamAccessor, TransportLayer};
pub use tcp::{TcpSettings, TcpTransport};
