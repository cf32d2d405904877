//! Reads P300 telegrams from a byte stream

use crate::error::{OptolinkError, OptolinkResult};
use crate::p300::telegram::{Telegram, START};
use optolink_transport::StreamAccessor;

/// P300 telegram decoder
pub struct TelegramDecoder;

impl TelegramDecoder {
    /// Read one complete telegram from the stream
    ///
    /// Each read is bounded by the stream's timeout. A first byte other than
    /// the start marker fails with `FrameCorrupt`.
    pub async fn read<S: StreamAccessor + ?Sized>(stream: &mut S) -> OptolinkResult<Telegram> {
        let start = stream.read_byte().await?;
        if start != START {
            return Err(OptolinkError::FrameCorrupt(format!(
                "Expected start byte, got 0x{:02X}",
                start
            )));
        }
        Self::read_after_start(stream).await
    }

    /// Read the rest of a telegram whose start marker was already consumed
    pub async fn read_after_start<S: StreamAccessor + ?Sized>(stream: &mut S) -> OptolinkResult<Telegram> {
        let len = stream.read_byte().await? as usize;
        let mut frame = vec![0u8; len + 3];
        frame[0] = START;
        frame[1] = len as u8;
        stream.read_exact(&mut frame[2..]).await?;
        Telegram::decode(&frame)
    }
}
