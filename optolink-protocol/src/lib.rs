//! Protocol engines for the Optolink link
//!
//! This crate turns a [`Request`] into bytes on the wire and back into a raw
//! payload, for either of the two protocol variants:
//!
//! - **P300**: reset/sync handshake, checksummed telegrams, ACK/NACK
//! - **KW**: unframed requests answered with raw payload bytes
//!
//! Both engines drain stale input before an exchange and restart from
//! `Idle` on timeouts and corrupt frames, up to the configured bound.

pub mod engine;
pub mod error;
pub mod kw;
pub mod p300;
pub mod request;
pub mod state;
pub mod statistics;

pub use engine::{Engine, LinkSettings, Protocol, ProtocolKind};
pub use error::{OptolinkError, OptolinkResult};
pub use kw::KwEngine;
pub use p300::{P300Engine, Telegram, TelegramDecoder};
pub use request::{Request, RequestKind};
pub use state::LinkState;
pub use statistics::LinkStatistics;
