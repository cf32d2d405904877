//! Error types shared with the transport layer

pub use optolink_core::error::{OptolinkError, OptolinkResult};
