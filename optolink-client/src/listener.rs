//! Result notification
//!
//! Every completed job, whether submitted by a caller, a cyclic timer or a
//! follow-up after a write, is reported to the scheduler's [`ValueListener`].

use optolink_core::{OptolinkError, TypedValue};
use tokio::sync::mpsc;

/// Receiver of decoded values and failures
#[cfg_attr(test, mockall::automock)]
pub trait ValueListener: Send + Sync {
    /// A read (or write) of `command` produced `value`
    fn on_value(&self, command: &str, value: &TypedValue);

    /// A job for `command` failed after all retries
    fn on_error(&self, command: &str, error: &OptolinkError);
}

/// Listener that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl ValueListener for LogListener {
    fn on_value(&self, command: &str, value: &TypedValue) {
        log::debug!("{} = {}", command, value);
    }

    fn on_error(&self, command: &str, error: &OptolinkError) {
        log::debug!("{} failed: {}", command, error);
    }
}

/// Notification forwarded by [`ChannelListener`]
#[derive(Debug, Clone, PartialEq)]
pub enum ValueEvent {
    Value { command: String, value: TypedValue },
    Error { command: String, message: String },
}

impl ValueEvent {
    pub fn command(&self) -> &str {
        match self {
            ValueEvent::Value { command, .. } | ValueEvent::Error { command, .. } => command,
        }
    }
}

/// Listener forwarding every notification into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<ValueEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ValueEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, event: ValueEvent) {
        if self.sender.send(event).is_err() {
            log::trace!("Value event dropped, receiver closed");
        }
    }
}

impl ValueListener for ChannelListener {
    fn on_value(&self, command: &str, value: &TypedValue) {
        self.forward(ValueEvent::Value {
            command: command.to_string(),
            value: value.clone(),
        });
    }

    fn on_error(&self, command: &str, error: &OptolinkError) {
        self.forward(ValueEvent::Error {
            command: command.to_string(),
            message: error.to_string(),
        });
    }
}
