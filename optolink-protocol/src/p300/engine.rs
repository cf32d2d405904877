//! P300 protocol engine

use crate::engine::{Link, LinkSettings, Protocol, ProtocolKind};
use crate::error::{OptolinkError, OptolinkResult};
use crate::p300::decoder::TelegramDecoder;
use crate::p300::telegram::{
    FunctionCode, Telegram, TelegramType, ACK, NACK, NOT_INITIALISED, RESET, START, SYNC,
};
use crate::request::{Request, RequestKind};
use crate::state::LinkState;
use crate::statistics::LinkStatistics;
use async_trait::async_trait;
use optolink_transport::TransportLayer;

/// P300 engine
///
/// Every exchange starts from `Idle` with the reset/sync handshake, sends
/// one request telegram and waits for the acknowledge. Reads then wait for
/// the response telegram, whose checksum and echoed address and length are
/// checked before the payload is accepted.
#[derive(Debug)]
pub struct P300Engine<T> {
    link: Link<T>,
}

impl<T: TransportLayer> P300Engine<T> {
    pub fn new(transport: T, settings: LinkSettings) -> Self {
        Self {
            link: Link::new(transport, settings),
        }
    }

    pub fn state(&self) -> LinkState {
        self.link.state
    }

    /// Reset and synchronise the device
    ///
    /// The device answers a reset with `0x05` and the sync string with
    /// `0x06`. A NACK, an unexpected byte or silence restarts the round.
    async fn synchronise(&mut self) -> OptolinkResult<()> {
        self.link.transition(LinkState::AwaitingSync)?;
        let attempts = self.link.settings.sync_attempts;
        let mut sync_sent = false;
        self.link.send(&[RESET]).await?;

        for round in 0..attempts {
            let reply = match self.link.read_byte().await {
                Ok(byte) => Some(byte),
                Err(OptolinkError::Timeout) => None,
                Err(e) => return Err(e),
            };
            match reply {
                Some(ACK) if sync_sent => {
                    log::debug!("Device synchronised after {} round(s)", round + 1);
                    return Ok(());
                }
                Some(NOT_INITIALISED) => {
                    self.link.send(&SYNC).await?;
                    sync_sent = true;
                }
                Some(NACK) => {
                    log::debug!("Device reported an error during sync, resetting");
                    self.link.send(&[RESET]).await?;
                    sync_sent = false;
                }
                _ => {
                    self.link.send(&[RESET]).await?;
                    sync_sent = false;
                }
            }
        }

        Err(OptolinkError::LinkTimeout(format!(
            "Device did not synchronise within {} attempts",
            attempts
        )))
    }

    /// Send the telegram until it is acknowledged
    async fn transmit(&mut self, frame: &[u8]) -> OptolinkResult<()> {
        self.link.transition(LinkState::AwaitingAck)?;
        let mut nacks = 0;
        loop {
            self.link.send(frame).await?;
            self.link.statistics.increment_telegrams_sent();
            match self.link.read_byte().await? {
                ACK => return Ok(()),
                NACK => {
                    self.link.statistics.increment_nacks();
                    if nacks >= self.link.settings.nack_retries {
                        return Err(OptolinkError::ProtocolNack(format!(
                            "Telegram rejected {} times",
                            nacks + 1
                        )));
                    }
                    nacks += 1;
                    log::debug!("NACK received, retransmitting ({})", nacks);
                    self.link.transition(LinkState::AwaitingAck)?;
                }
                other => {
                    return Err(OptolinkError::FrameCorrupt(format!(
                        "Expected ACK, got 0x{:02X}",
                        other
                    )));
                }
            }
        }
    }

    /// Receive a response telegram and check it against the request
    async fn receive(&mut self, sent: &Telegram) -> OptolinkResult<Telegram> {
        let result = TelegramDecoder::read(&mut self.link.transport).await;
        let telegram = match result {
            Ok(telegram) => telegram,
            Err(OptolinkError::Timeout) => {
                self.link.statistics.increment_timeouts();
                return Err(OptolinkError::Timeout);
            }
            Err(OptolinkError::FrameCorrupt(reason)) => {
                if reason.starts_with("Checksum") {
                    self.link.statistics.increment_checksum_errors();
                }
                return Err(OptolinkError::FrameCorrupt(reason));
            }
            Err(e) => return Err(e),
        };
        self.link.statistics.increment_telegrams_received();
        log::debug!("Received telegram: {}", telegram);

        if telegram.telegram_type == TelegramType::Error {
            self.link.statistics.increment_nacks();
            return Err(OptolinkError::ProtocolNack(format!(
                "Device returned an error telegram for {}",
                sent.address
            )));
        }
        if telegram.telegram_type != TelegramType::Response
            || telegram.function != sent.function
            || telegram.address != sent.address
            || telegram.count != sent.count
        {
            return Err(OptolinkError::FrameCorrupt(format!(
                "Response {} does not match request {}",
                telegram, sent
            )));
        }
        Ok(telegram)
    }

    /// Consume the confirmation telegram some devices send after a write ACK
    ///
    /// The acknowledge alone completes the write. A confirmation is only
    /// waited for during `p300_confirmation_window`; one that starts later is
    /// drained by the next exchange. Only an error telegram fails the write.
    async fn confirm_write(&mut self, sent: &Telegram) -> OptolinkResult<()> {
        let window = self.link.settings.p300_confirmation_window;
        self.link.transport.set_timeout(Some(window)).await?;
        let first = self.link.transport.read_byte().await;
        self.link
            .transport
            .set_timeout(Some(self.link.settings.timeout))
            .await?;
        match first {
            Ok(START) => {}
            Ok(other) => {
                log::debug!("Ignoring 0x{:02X} after write acknowledge", other);
                return Ok(());
            }
            Err(OptolinkError::Timeout) => {
                log::trace!("No confirmation telegram for {}", sent.address);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        match TelegramDecoder::read_after_start(&mut self.link.transport).await {
            Ok(telegram) if telegram.telegram_type == TelegramType::Error => {
                self.link.statistics.increment_telegrams_received();
                self.link.statistics.increment_nacks();
                Err(OptolinkError::ProtocolNack(format!(
                    "Device returned an error telegram for {}",
                    sent.address
                )))
            }
            Ok(telegram) => {
                self.link.statistics.increment_telegrams_received();
                log::debug!("Write confirmed: {}", telegram);
                Ok(())
            }
            Err(OptolinkError::Timeout) | Err(OptolinkError::FrameCorrupt(_)) => {
                log::debug!("Unreadable confirmation for {} ignored", sent.address);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn exchange(&mut self, request: &Request) -> OptolinkResult<Vec<u8>> {
        self.link.prepare().await?;
        self.synchronise().await?;

        let telegram = match &request.kind {
            RequestKind::Read => {
                let count = u8::try_from(request.length).map_err(|_| {
                    OptolinkError::InvalidData(format!("Length {} too large", request.length))
                })?;
                Telegram::read_request(request.address, count)
            }
            RequestKind::Write(data) => Telegram::write_request(request.address, data.clone())?,
        };
        log::debug!("Sending telegram: {}", telegram);
        self.transmit(&telegram.encode()?).await?;
        self.link.transition(LinkState::AwaitingResponse)?;

        let payload = match telegram.function {
            FunctionCode::Write => {
                self.confirm_write(&telegram).await?;
                request.payload().to_vec()
            }
            _ => {
                let response = self.receive(&telegram).await?;
                if response.data.len() != request.length {
                    return Err(OptolinkError::FrameCorrupt(format!(
                        "Expected {} payload bytes, got {}",
                        request.length,
                        response.data.len()
                    )));
                }
                response.data
            }
        };
        self.link.transition(LinkState::Idle)?;
        Ok(payload)
    }
}

#[async_trait]
impl<T: TransportLayer> Protocol for P300Engine<T> {
    async fn execute(&mut self, request: &Request) -> OptolinkResult<Vec<u8>> {
        self.link.statistics.increment_exchanges();
        let mut attempt = 0;
        loop {
            match self.exchange(request).await {
                Ok(payload) => return Ok(payload),
                Err(error) => match self.link.after_failure(request, attempt, error) {
                    None => attempt += 1,
                    Some(error) => return Err(error),
                },
            }
        }
    }

    fn kind(&self) -> ProtocolKind {
        ProtocolKind::P300
    }

    fn statistics(&self) -> &LinkStatistics {
        &self.link.statistics
    }

    async fn close(&mut self) -> OptolinkResult<()> {
        self.link.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optolink_core::DataPointAddress;
    use optolink_transport::MemoryTransport;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_test::assert_ok;

    fn engine() -> (P300Engine<MemoryTransport>, DuplexStream) {
        let (transport, device) = MemoryTransport::pair(None);
        let settings = LinkSettings {
            timeout: Duration::from_millis(300),
            ..LinkSettings::default()
        };
        (P300Engine::new(transport, settings), device)
    }

    async fn expect(device: &mut DuplexStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }

    async fn handshake(device: &mut DuplexStream) {
        expect(device, &[RESET]).await;
        device.write_all(&[NOT_INITIALISED]).await.unwrap();
        expect(device, &SYNC).await;
        device.write_all(&[ACK]).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_exchange() {
        let (mut engine, mut device) = engine();
        let peer = tokio::spawn(async move {
            handshake(&mut device).await;
            let request = Telegram::read_request(DataPointAddress::new(0x0800), 2);
            expect(&mut device, &request.encode().unwrap()).await;
            device.write_all(&[ACK]).await.unwrap();
            let response = request.response(vec![0x00, 0xE1]).encode().unwrap();
            device.write_all(&response).await.unwrap();
            device
        });

        let request = Request::read("Aussentemperatur", DataPointAddress::new(0x0800), 2).unwrap();
        let payload = assert_ok!(engine.execute(&request).await);
        assert_eq!(payload, vec![0x00, 0xE1]);
        assert!(engine.state().is_idle());
        assert_eq!(engine.statistics().telegrams_sent, 1);
        assert_eq!(engine.statistics().telegrams_received, 1);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_echoes_payload() {
        let (mut engine, mut device) = engine();
        let peer = tokio::spawn(async move {
            handshake(&mut device).await;
            let request = Telegram::write_request(DataPointAddress::new(0x2323), vec![0x01]).unwrap();
            expect(&mut device, &request.encode().unwrap()).await;
            device.write_all(&[ACK]).await.unwrap();
            let confirmation = request.response(Vec::new()).encode().unwrap();
            device.write_all(&confirmation).await.unwrap();
            device
        });

        let request = Request::write("Betriebsart_A1M1", DataPointAddress::new(0x2323), vec![0x01]).unwrap();
        assert_eq!(engine.execute(&request).await.unwrap(), vec![0x01]);
        peer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_completes_on_ack_alone() {
        let (mut engine, mut device) = engine();
        let peer = tokio::spawn(async move {
            handshake(&mut device).await;
            let request = Telegram::write_request(DataPointAddress::new(0x2323), vec![0x02]).unwrap();
            expect(&mut device, &request.encode().unwrap()).await;
            device.write_all(&[ACK]).await.unwrap();
            device
        });

        let started = tokio::time::Instant::now();
        let request = Request::write("Betriebsart_A1M1", DataPointAddress::new(0x2323), vec![0x02]).unwrap();
        assert_eq!(engine.execute(&request).await.unwrap(), vec![0x02]);
        assert!(started.elapsed() <= LinkSettings::default().p300_confirmation_window + Duration::from_millis(10));
        assert_eq!(engine.statistics().timeouts, 0);
        assert_eq!(engine.statistics().resyncs, 0);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_error_telegram_is_nack() {
        let (mut engine, mut device) = engine();
        let peer = tokio::spawn(async move {
            handshake(&mut device).await;
            let request = Telegram::write_request(DataPointAddress::new(0x2323), vec![0x09]).unwrap();
            expect(&mut device, &request.encode().unwrap()).await;
            device.write_all(&[ACK]).await.unwrap();
            device
                .write_all(&request.error_response().encode().unwrap())
                .await
                .unwrap();
            device
        });

        let request = Request::write("Betriebsart_A1M1", DataPointAddress::new(0x2323), vec![0x09]).unwrap();
        assert!(matches!(
            engine.execute(&request).await,
            Err(OptolinkError::ProtocolNack(_))
        ));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_address_mismatch_resynchronises_once() {
        let (mut engine, mut device) = engine();
        let peer = tokio::spawn(async move {
            let request = Telegram::read_request(DataPointAddress::new(0x0800), 2);
            let wrong = Telegram::read_request(DataPointAddress::new(0x0802), 2)
                .response(vec![0x01, 0xF4])
                .encode()
                .unwrap();
            let good = request.response(vec![0x00, 0xE1]).encode().unwrap();
            for response in [wrong, good] {
                handshake(&mut device).await;
                expect(&mut device, &request.encode().unwrap()).await;
                device.write_all(&[ACK]).await.unwrap();
                device.write_all(&response).await.unwrap();
            }
            device
        });

        let request = Request::read("Aussentemperatur", DataPointAddress::new(0x0800), 2).unwrap();
        assert_eq!(engine.execute(&request).await.unwrap(), vec![0x00, 0xE1]);
        assert_eq!(engine.statistics().resyncs, 1);
        assert_eq!(engine.statistics().checksum_errors, 0);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_persistent_address_mismatch_is_frame_corrupt() {
        let (mut engine, mut device) = engine();
        let peer = tokio::spawn(async move {
            let request = Telegram::read_request(DataPointAddress::new(0x0800), 2);
            let wrong = Telegram::read_request(DataPointAddress::new(0x0802), 2)
                .response(vec![0x01, 0xF4])
                .encode()
                .unwrap();
            // initial attempt plus three resynchronisations
            for _ in 0..4 {
                handshake(&mut device).await;
                expect(&mut device, &request.encode().unwrap()).await;
                device.write_all(&[ACK]).await.unwrap();
                device.write_all(&wrong).await.unwrap();
            }
            device
        });

        let request = Request::read("Aussentemperatur", DataPointAddress::new(0x0800), 2).unwrap();
        assert!(matches!(
            engine.execute(&request).await,
            Err(OptolinkError::FrameCorrupt(_))
        ));
        assert_eq!(engine.statistics().resyncs, 3);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_nack_retransmits_then_fails() {
        let (mut engine, mut device) = engine();
        let peer = tokio::spawn(async move {
            handshake(&mut device).await;
            let frame = Telegram::read_request(DataPointAddress::new(0x0800), 2)
                .encode()
                .unwrap();
            for _ in 0..3 {
                expect(&mut device, &frame).await;
                device.write_all(&[NACK]).await.unwrap();
            }
            device
        });

        let request = Request::read("Aussentemperatur", DataPointAddress::new(0x0800), 2).unwrap();
        let result = engine.execute(&request).await;
        assert!(matches!(result, Err(OptolinkError::ProtocolNack(_))));
        assert_eq!(engine.statistics().nacks, 3);
        assert_eq!(engine.statistics().resyncs, 0);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_response_resynchronises_once() {
        let (mut engine, mut device) = engine();
        let peer = tokio::spawn(async move {
            let request = Telegram::read_request(DataPointAddress::new(0x0800), 2);
            let good = request.response(vec![0x00, 0xE1]).encode().unwrap();
            let mut bad = good.clone();
            bad[8] ^= 0x01;
            for response in [bad, good] {
                handshake(&mut device).await;
                expect(&mut device, &request.encode().unwrap()).await;
                device.write_all(&[ACK]).await.unwrap();
                device.write_all(&response).await.unwrap();
            }
            device
        });

        let request = Request::read("Aussentemperatur", DataPointAddress::new(0x0800), 2).unwrap();
        assert_eq!(engine.execute(&request).await.unwrap(), vec![0x00, 0xE1]);
        assert_eq!(engine.statistics().checksum_errors, 1);
        assert_eq!(engine.statistics().resyncs, 1);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_telegram_is_nack() {
        let (mut engine, mut device) = engine();
        let peer = tokio::spawn(async move {
            handshake(&mut device).await;
            let request = Telegram::read_request(DataPointAddress::new(0x7777), 1);
            expect(&mut device, &request.encode().unwrap()).await;
            device.write_all(&[ACK]).await.unwrap();
            device
                .write_all(&request.error_response().encode().unwrap())
                .await
                .unwrap();
            device
        });

        let request = Request::read("unknown", DataPointAddress::new(0x7777), 1).unwrap();
        assert!(matches!(
            engine.execute(&request).await,
            Err(OptolinkError::ProtocolNack(_))
        ));
        assert_eq!(engine.statistics().resyncs, 0);
        peer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_link_timeout() {
        let (mut engine, device) = engine();
        let request = Request::read("Aussentemperatur", DataPointAddress::new(0x0800), 2).unwrap();
        assert!(matches!(
            engine.execute(&request).await,
            Err(OptolinkError::LinkTimeout(_))
        ));
        // initial attempt plus three resynchronisations
        assert_eq!(engine.statistics().resyncs, 3);
        assert_eq!(engine.statistics().failed_exchanges, 1);
        drop(device);
    }

    #[tokio::test]
    async fn test_stale_bytes_are_drained() {
        let (mut engine, mut device) = engine();
        device.write_all(&[0x41, 0x07, 0x01, 0x01]).await.unwrap();
        let peer = tokio::spawn(async move {
            handshake(&mut device).await;
            let request = Telegram::read_request(DataPointAddress::new(0x2323), 1);
            expect(&mut device, &request.encode().unwrap()).await;
            device.write_all(&[ACK]).await.unwrap();
            device.write_all(&request.response(vec![0x02]).encode().unwrap()).await.unwrap();
            device
        });

        let request = Request::read("Betriebsart_A1M1", DataPointAddress::new(0x2323), 1).unwrap();
        assert_eq!(engine.execute(&request).await.unwrap(), vec![0x02]);
        assert_eq!(engine.statistics().discarded_bytes, 4);
        peer.await.unwrap();
    }
}
