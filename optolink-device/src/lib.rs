//! Software Optolink device
//!
//! This crate provides a heating controller stand-in that answers the P300
//! and KW protocols from an in-memory data point map. Faults can be injected
//! per request, and every exchange is logged with its (tokio) timestamp.
//!
//! The device is served over an in-memory pipe for tests, or over TCP to
//! stand in for a network serial adapter.

pub mod device;
pub mod listener;

pub use device::{ExchangeRecord, Fault, Operation, Outcome, VirtualDevice};
pub use listener::DeviceListener;
