//! Error types shared with the protocol layer

pub use optolink_core::error::{OptolinkError, OptolinkResult};
