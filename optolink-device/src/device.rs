//! Virtual heating controller answering P300 and KW requests

use optolink_core::{DataPointAddress, OptolinkError, OptolinkResult};
use optolink_protocol::ProtocolKind;
use optolink_protocol::kw;
use optolink_protocol::p300::{self, FunctionCode, Telegram, TelegramType};
use optolink_transport::{MemoryTransport, StreamAccessor, TransportLayer};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Misbehaviour injected into the next matching requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer the request telegram with NACK (P300)
    Nack,
    /// Flip a bit in the response checksum (P300)
    CorruptResponse,
    /// Answer an acknowledged request with an error telegram (P300)
    ErrorResponse,
    /// Swallow the request without any answer
    Silent,
    /// Report this status byte after a write (KW)
    WriteStatus(u8),
    /// Acknowledge a write without sending the confirmation telegram (P300)
    AckOnly,
    /// Echo the neighbouring address in the response (P300)
    WrongAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// How the device reacted to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Answered,
    Nacked,
    Corrupted,
    Rejected,
    Ignored,
}

/// One request seen by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRecord {
    /// When the request was answered (or dropped)
    pub at: Instant,
    pub operation: Operation,
    pub address: DataPointAddress,
    /// Bytes returned for reads, bytes stored for writes
    pub data: Vec<u8>,
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
struct DeviceState {
    memory: BTreeMap<u16, u8>,
    faults: Vec<(Fault, u32)>,
    log: Vec<ExchangeRecord>,
}

impl DeviceState {
    fn read(&self, address: DataPointAddress, count: usize) -> Vec<u8> {
        (0..count)
            .map(|offset| {
                let cell = address.value().wrapping_add(offset as u16);
                self.memory.get(&cell).copied().unwrap_or(0)
            })
            .collect()
    }

    fn write(&mut self, address: DataPointAddress, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            self.memory.insert(address.value().wrapping_add(offset as u16), *byte);
        }
    }

    /// Consume one pending fault accepted by `wanted`
    fn take_fault(&mut self, wanted: impl Fn(&Fault) -> bool) -> Option<Fault> {
        let index = self.faults.iter().position(|(fault, _)| wanted(fault))?;
        let (fault, remaining) = &mut self.faults[index];
        let fault = *fault;
        *remaining -= 1;
        if *remaining == 0 {
            self.faults.remove(index);
        }
        Some(fault)
    }

    fn record(&mut self, operation: Operation, address: DataPointAddress, data: Vec<u8>, outcome: Outcome) {
        self.log.push(ExchangeRecord {
            at: Instant::now(),
            operation,
            address,
            data,
            outcome,
        });
    }
}

/// Software heating controller
///
/// Cloning yields another handle to the same device.
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    protocol: ProtocolKind,
    state: Arc<Mutex<DeviceState>>,
}

impl VirtualDevice {
    pub fn new(protocol: ProtocolKind) -> Self {
        Self {
            protocol,
            state: Arc::new(Mutex::new(DeviceState::default())),
        }
    }

    /// Preload bytes at an address
    pub fn with_bytes(self, address: impl Into<DataPointAddress>, bytes: &[u8]) -> Self {
        self.set_bytes(address, bytes);
        self
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    pub fn set_bytes(&self, address: impl Into<DataPointAddress>, bytes: &[u8]) {
        self.state.lock().write(address.into(), bytes);
    }

    pub fn bytes(&self, address: impl Into<DataPointAddress>, count: usize) -> Vec<u8> {
        self.state.lock().read(address.into(), count)
    }

    /// Apply `fault` to the next `times` matching requests
    pub fn inject(&self, fault: Fault, times: u32) {
        if times > 0 {
            self.state.lock().faults.push((fault, times));
        }
    }

    /// Requests seen so far
    pub fn exchanges(&self) -> Vec<ExchangeRecord> {
        self.state.lock().log.clone()
    }

    /// Answered requests for one address and operation
    pub fn answered(&self, operation: Operation, address: impl Into<DataPointAddress>) -> Vec<ExchangeRecord> {
        let address = address.into();
        self.state
            .lock()
            .log
            .iter()
            .filter(|record| {
                record.operation == operation
                    && record.address == address
                    && record.outcome == Outcome::Answered
            })
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Spawn the device on an in-memory pipe and return the host's end
    ///
    /// The returned transport is not yet opened. The device task is detached;
    /// it ends on its own once the host transport is closed or dropped. Use
    /// [`VirtualDevice::spawn`] to keep the task handle.
    pub fn connect(&self, timeout: Duration) -> MemoryTransport {
        let (host, remote) = MemoryTransport::pair(Some(timeout));
        drop(self.spawn(MemoryTransport::new(remote, None)));
        host
    }

    /// Serve the device on `stream` in a background task
    pub fn spawn<S>(&self, stream: S) -> JoinHandle<OptolinkResult<()>>
    where
        S: TransportLayer + 'static,
    {
        let device = self.clone();
        tokio::spawn(async move {
            let result = device.serve(stream).await;
            if let Err(e) = &result {
                log::error!("Virtual device stopped: {}", e);
            }
            result
        })
    }

    /// Answer requests until the host closes the stream
    pub async fn serve<S: TransportLayer>(&self, mut stream: S) -> OptolinkResult<()> {
        if stream.is_closed() {
            stream.open().await?;
        }
        let result = match self.protocol {
            ProtocolKind::P300 => self.serve_p300(&mut stream).await,
            ProtocolKind::Kw => self.serve_kw(&mut stream).await,
        };
        match result {
            Err(OptolinkError::Connection(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                log::debug!("Host closed the link");
                Ok(())
            }
            other => other,
        }
    }

    async fn serve_p300<S: StreamAccessor>(&self, stream: &mut S) -> OptolinkResult<()> {
        loop {
            match stream.read_byte().await? {
                p300::RESET => stream.write_all(&[p300::NOT_INITIALISED]).await?,
                byte if byte == p300::SYNC[0] => {
                    let mut rest = [0u8; 2];
                    stream.read_exact(&mut rest).await?;
                    let reply = if rest == p300::SYNC[1..] { p300::ACK } else { p300::NACK };
                    stream.write_all(&[reply]).await?;
                }
                p300::START => {
                    let len = stream.read_byte().await?;
                    let mut frame = vec![0u8; len as usize + 3];
                    frame[0] = p300::START;
                    frame[1] = len;
                    stream.read_exact(&mut frame[2..]).await?;
                    match Telegram::decode(&frame) {
                        Ok(telegram) if telegram.telegram_type == TelegramType::Request => {
                            self.answer_telegram(stream, telegram).await?
                        }
                        Ok(_) | Err(_) => stream.write_all(&[p300::NACK]).await?,
                    }
                }
                other => log::trace!("Device ignoring 0x{:02X}", other),
            }
            stream.flush().await?;
        }
    }

    async fn answer_telegram<S: StreamAccessor>(&self, stream: &mut S, telegram: Telegram) -> OptolinkResult<()> {
        let operation = match telegram.function {
            FunctionCode::Write => Operation::Write,
            _ => Operation::Read,
        };
        let address = telegram.address;

        let early = self
            .state
            .lock()
            .take_fault(|f| matches!(f, Fault::Silent | Fault::Nack));
        match early {
            Some(Fault::Silent) => {
                self.state.lock().record(operation, address, Vec::new(), Outcome::Ignored);
                return Ok(());
            }
            Some(_) => {
                self.state.lock().record(operation, address, Vec::new(), Outcome::Nacked);
                return stream.write_all(&[p300::NACK]).await;
            }
            None => {}
        }

        stream.write_all(&[p300::ACK]).await?;

        let (response, data, fault) = {
            let mut state = self.state.lock();
            let fault = state.take_fault(|f| match f {
                Fault::ErrorResponse | Fault::CorruptResponse | Fault::WrongAddress => true,
                Fault::AckOnly => operation == Operation::Write,
                _ => false,
            });
            let (response, data) = match operation {
                _ if fault == Some(Fault::ErrorResponse) => (telegram.error_response(), Vec::new()),
                Operation::Write => {
                    state.write(address, &telegram.data);
                    (telegram.response(Vec::new()), telegram.data.clone())
                }
                Operation::Read => {
                    let data = state.read(address, telegram.count as usize);
                    (telegram.response(data.clone()), data)
                }
            };
            let outcome = match fault {
                Some(Fault::ErrorResponse) => Outcome::Rejected,
                Some(Fault::CorruptResponse) | Some(Fault::WrongAddress) => Outcome::Corrupted,
                _ => Outcome::Answered,
            };
            state.record(operation, address, data.clone(), outcome);
            (response, data, fault)
        };

        match fault {
            Some(Fault::AckOnly) => {
                log::trace!("Device skipping confirmation of {} byte(s)", data.len());
                Ok(())
            }
            Some(Fault::WrongAddress) => {
                let mut response = response;
                response.address = DataPointAddress::new(address.value().wrapping_add(1));
                stream.write_all(&response.encode()?).await
            }
            Some(Fault::CorruptResponse) => {
                let mut bytes = response.encode()?;
                if let Some(checksum) = bytes.last_mut() {
                    *checksum ^= 0x01;
                }
                stream.write_all(&bytes).await
            }
            _ => stream.write_all(&response.encode()?).await,
        }
    }

    async fn serve_kw<S: StreamAccessor>(&self, stream: &mut S) -> OptolinkResult<()> {
        loop {
            match stream.read_byte().await? {
                kw::RESET => stream.write_all(&[kw::SYNC]).await?,
                kw::REQUEST_START => {
                    let mut header = [0u8; 4];
                    stream.read_exact(&mut header).await?;
                    let address = DataPointAddress::from_bytes([header[1], header[2]]);
                    let count = header[3] as usize;
                    match header[0] {
                        kw::READ => self.answer_kw_read(stream, address, count).await?,
                        kw::WRITE => {
                            let mut data = vec![0u8; count];
                            stream.read_exact(&mut data).await?;
                            self.answer_kw_write(stream, address, data).await?;
                        }
                        other => log::debug!("Device ignoring KW operation 0x{:02X}", other),
                    }
                }
                other => log::trace!("Device ignoring 0x{:02X}", other),
            }
            stream.flush().await?;
        }
    }

    async fn answer_kw_read<S: StreamAccessor>(
        &self,
        stream: &mut S,
        address: DataPointAddress,
        count: usize,
    ) -> OptolinkResult<()> {
        let data = {
            let mut state = self.state.lock();
            if state.take_fault(|f| matches!(f, Fault::Silent)).is_some() {
                state.record(Operation::Read, address, Vec::new(), Outcome::Ignored);
                return Ok(());
            }
            let data = state.read(address, count);
            state.record(Operation::Read, address, data.clone(), Outcome::Answered);
            data
        };
        stream.write_all(&data).await
    }

    async fn answer_kw_write<S: StreamAccessor>(
        &self,
        stream: &mut S,
        address: DataPointAddress,
        data: Vec<u8>,
    ) -> OptolinkResult<()> {
        let status = {
            let mut state = self.state.lock();
            match state.take_fault(|f| matches!(f, Fault::Silent | Fault::WriteStatus(_))) {
                Some(Fault::WriteStatus(code)) => {
                    state.record(Operation::Write, address, data, Outcome::Rejected);
                    code
                }
                Some(_) => {
                    state.record(Operation::Write, address, data, Outcome::Ignored);
                    return Ok(());
                }
                None => {
                    state.write(address, &data);
                    state.record(Operation::Write, address, data, Outcome::Answered);
                    kw::STATUS_OK
                }
            }
        };
        stream.write_all(&[status]).await
    }
}
