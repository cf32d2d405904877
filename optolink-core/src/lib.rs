//! Core types and utilities for the Optolink protocols
//!
//! This crate provides the error taxonomy, data point addresses, the command
//! table and the value codec shared by the protocol engines and the scheduler.

pub mod address;
pub mod codec;
pub mod command;
pub mod datatypes;
pub mod error;

pub use address::DataPointAddress;
pub use command::{AccessMode, ByteOrder, CommandSpec, CommandTable, DataType, ValueFormat};
pub use datatypes::{SwitchingPair, TimeOfDay, TimerEncoding, TimerSchedule, TypedValue};
pub use error::{OptolinkError, OptolinkResult};
