//! P300 protocol: framed, acknowledged, checksummed

pub mod checksum;
pub mod decoder;
pub mod engine;
pub mod telegram;

pub use checksum::ChecksumCalc;
pub use decoder::TelegramDecoder;
pub use engine::P300Engine;
pub use telegram::{FunctionCode, Telegram, TelegramType, ACK, NACK, NOT_INITIALISED, RESET, START, SYNC};
