//! Command scheduler
//!
//! Callers, cyclic timers and follow-up timers submit jobs into one FIFO
//! queue. A single worker task owns the protocol engine and executes the
//! jobs strictly one after the other, so the half-duplex link never sees
//! two overlapping exchanges.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use optolink_client::{LogListener, ScheduledItem, Scheduler};
//! use optolink_core::CommandTable;
//! use optolink_protocol::{Engine, LinkSettings, ProtocolKind};
//! use optolink_transport::SerialTransport;
//! use std::sync::Arc;
//!
//! # async fn run(table: CommandTable, items: Vec<ScheduledItem>) -> optolink_core::OptolinkResult<()> {
//! let transport = SerialTransport::new_simple("/dev/ttyUSB0".to_string());
//! let engine = Engine::new(ProtocolKind::P300, transport, LinkSettings::default());
//! let scheduler = Scheduler::start(engine, table, items, Arc::new(LogListener))?;
//!
//! let temperature = scheduler.read_now("Aussentemperatur").await?;
//! scheduler.write_now("Betriebsart_A1M1", 1).await?;
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

mod queue;
mod timers;
mod worker;

use crate::item::{validate_items, ScheduledItem};
use crate::listener::ValueListener;
use optolink_core::{
    codec, CommandSpec, CommandTable, DataPointAddress, OptolinkError, OptolinkResult,
    TypedValue, ValueFormat,
};
use optolink_protocol::{LinkStatistics, Protocol, ProtocolKind};
use parking_lot::Mutex;
use queue::{Job, JobQueue, Origin};
use std::collections::HashMap;
use std::sync::Arc;
use timers::{TimerCommand, TimerWheel};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use worker::Worker;

/// Command table and configured items, shared read-only
#[derive(Debug)]
pub(crate) struct ItemSet {
    table: CommandTable,
    specs: HashMap<String, Arc<CommandSpec>>,
    items: Vec<ScheduledItem>,
    index: HashMap<String, usize>,
}

impl ItemSet {
    fn new(table: CommandTable, items: Vec<ScheduledItem>) -> OptolinkResult<Self> {
        validate_items(&table, &items)?;
        let specs = table
            .iter()
            .map(|spec| (spec.name.clone(), Arc::new(spec.clone())))
            .collect();
        let index = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.command.clone(), i))
            .collect();
        Ok(Self {
            table,
            specs,
            items,
            index,
        })
    }

    pub fn spec(&self, command: &str) -> Option<Arc<CommandSpec>> {
        self.specs.get(command).cloned()
    }

    pub fn lookup(&self, command: &str) -> OptolinkResult<Arc<CommandSpec>> {
        self.spec(command)
            .ok_or_else(|| OptolinkError::UnknownCommand(command.to_string()))
    }

    pub fn item(&self, command: &str) -> Option<&ScheduledItem> {
        self.index.get(command).map(|&i| &self.items[i])
    }
}

#[derive(Debug)]
struct Inner {
    protocol: ProtocolKind,
    items: Arc<ItemSet>,
    jobs: Arc<JobQueue>,
    timers: mpsc::UnboundedSender<TimerCommand>,
    statistics: Arc<Mutex<LinkStatistics>>,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.jobs.is_closed() {
            for job in self.jobs.close() {
                job.fail(OptolinkError::NotRunning);
            }
            let _ = self.timers.send(TimerCommand::Shutdown);
        }
    }
}

/// Handle to a running scheduler
///
/// Clones share the same worker, queue and timers. The scheduler stops when
/// [`Scheduler::stop`] is called or the last handle is dropped.
#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Spawn the worker and timer tasks and register the cyclic items
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when an item names an unknown command or trigger, appears twice
    /// or has a zero cycle period.
    pub fn start<P>(
        protocol: P,
        table: CommandTable,
        items: Vec<ScheduledItem>,
        listener: Arc<dyn ValueListener>,
    ) -> OptolinkResult<Self>
    where
        P: Protocol + 'static,
    {
        let items = Arc::new(ItemSet::new(table, items)?);
        let jobs = Arc::new(JobQueue::new());
        let statistics = Arc::new(Mutex::new(protocol.statistics().clone()));
        let (timers, commands) = mpsc::unbounded_channel();
        let kind = protocol.kind();

        let wheel = tokio::spawn(TimerWheel::new(jobs.clone(), commands).run());
        let worker = tokio::spawn(
            Worker {
                protocol,
                jobs: jobs.clone(),
                items: items.clone(),
                timers: timers.clone(),
                listener,
                statistics: statistics.clone(),
            }
            .run(),
        );

        let scheduler = Self {
            inner: Arc::new(Inner {
                protocol: kind,
                items,
                jobs,
                timers,
                statistics,
                tasks: Mutex::new(Some((worker, wheel))),
            }),
        };
        let cyclic: Vec<ScheduledItem> = scheduler
            .items()
            .iter()
            .filter(|item| item.cycle.is_some())
            .cloned()
            .collect();
        for item in &cyclic {
            scheduler.schedule_cyclic(item)?;
        }
        log::info!(
            "Scheduler started on {} with {} commands, {} items ({} cyclic)",
            kind,
            scheduler.command_table().len(),
            scheduler.items().len(),
            cyclic.len()
        );
        Ok(scheduler)
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.inner.protocol
    }

    pub fn command_table(&self) -> &CommandTable {
        &self.inner.items.table
    }

    /// Configured items in declaration order
    pub fn items(&self) -> &[ScheduledItem] {
        &self.inner.items.items
    }

    pub fn is_running(&self) -> bool {
        !self.inner.jobs.is_closed()
    }

    /// Jobs waiting for the worker
    pub fn pending(&self) -> usize {
        self.inner.jobs.len()
    }

    /// Snapshot of the link counters after the last completed exchange
    pub fn statistics(&self) -> LinkStatistics {
        self.inner.statistics.lock().clone()
    }

    /// Read a command and wait for its decoded value
    pub async fn read_now(&self, command: &str) -> OptolinkResult<TypedValue> {
        let spec = self.inner.items.lookup(command)?;
        spec.ensure_readable()?;
        self.submit(Job::read(spec, Origin::Caller)).await
    }

    /// Write a command and wait for the device to accept it
    ///
    /// The value is encoded before anything is queued, so codec errors never
    /// reach the link. On success the item's read-after-write and trigger
    /// reads are scheduled; a failed write schedules nothing.
    pub async fn write_now(&self, command: &str, value: impl Into<TypedValue>) -> OptolinkResult<()> {
        let spec = self.inner.items.lookup(command)?;
        spec.ensure_writable()?;
        self.write_spec(spec, value.into()).await
    }

    /// Register a recurring read of `item.command` every `item.cycle`
    ///
    /// When the command is already cyclic the shorter period is kept.
    pub fn schedule_cyclic(&self, item: &ScheduledItem) -> OptolinkResult<()> {
        let period = item
            .cycle
            .filter(|period| !period.is_zero())
            .ok_or_else(|| {
                OptolinkError::Config(format!("Item {} has no cycle period", item.command))
            })?;
        let spec = self.inner.items.lookup(&item.command)?;
        spec.ensure_readable()?;
        self.ensure_running()?;
        self.inner
            .timers
            .send(TimerCommand::Cyclic { spec, period })
            .map_err(|_| OptolinkError::NotRunning)
    }

    /// Queue a read of every item flagged `initial_read`, in declaration order
    ///
    /// # Returns
    ///
    /// The number of reads queued. Results go to the listener.
    pub fn initialize_all(&self) -> OptolinkResult<usize> {
        self.enqueue_reads(|item| item.initial_read)
    }

    /// Queue a read of every readable configured item
    pub fn refresh_all(&self) -> OptolinkResult<usize> {
        self.enqueue_reads(|_| true)
    }

    /// Read an address that is not in the command table
    pub async fn read_address(
        &self,
        address: DataPointAddress,
        length: usize,
        format: ValueFormat,
    ) -> OptolinkResult<TypedValue> {
        let spec = Arc::new(CommandSpec::adhoc(address, length, format)?);
        self.submit(Job::read(spec, Origin::Caller)).await
    }

    /// Write an address that is not in the command table
    pub async fn write_address(
        &self,
        address: DataPointAddress,
        length: usize,
        format: ValueFormat,
        value: impl Into<TypedValue>,
    ) -> OptolinkResult<()> {
        let spec = Arc::new(CommandSpec::adhoc(address, length, format)?);
        self.write_spec(spec, value.into()).await
    }

    /// Stop the scheduler
    ///
    /// Queued jobs fail with `NotRunning`, every timer is cancelled, and the
    /// transport is closed once the exchange in flight has finished.
    pub async fn stop(&self) -> OptolinkResult<()> {
        let drained = self.inner.jobs.close();
        if !drained.is_empty() {
            log::info!("Dropping {} queued jobs", drained.len());
        }
        for job in drained {
            job.fail(OptolinkError::NotRunning);
        }
        let _ = self.inner.timers.send(TimerCommand::Shutdown);

        let tasks = self.inner.tasks.lock().take();
        if let Some((worker, wheel)) = tasks {
            for (name, task) in [("worker", worker), ("timer", wheel)] {
                if let Err(e) = task.await {
                    log::error!("Scheduler {} task ended abnormally: {}", name, e);
                }
            }
            log::info!("Scheduler stopped");
        }
        Ok(())
    }

    async fn write_spec(&self, spec: Arc<CommandSpec>, value: TypedValue) -> OptolinkResult<()> {
        let payload = codec::encode(&value, &spec)?;
        self.submit(Job::write(spec, value, payload)).await.map(|_| ())
    }

    async fn submit(&self, job: Job) -> OptolinkResult<TypedValue> {
        let (job, reply) = job.with_reply();
        self.inner
            .jobs
            .push(job)
            .map_err(|_| OptolinkError::NotRunning)?;
        reply.await.map_err(|_| OptolinkError::NotRunning)?
    }

    fn enqueue_reads(&self, wanted: impl Fn(&ScheduledItem) -> bool) -> OptolinkResult<usize> {
        self.ensure_running()?;
        let mut queued = 0;
        for item in self.items().iter().filter(|item| wanted(item)) {
            let spec = self.inner.items.lookup(&item.command)?;
            if !spec.access.can_read() {
                continue;
            }
            self.inner
                .jobs
                .push(Job::read(spec, Origin::Bulk))
                .map_err(|_| OptolinkError::NotRunning)?;
            queued += 1;
        }
        log::debug!("Queued {} reads", queued);
        Ok(queued)
    }

    fn ensure_running(&self) -> OptolinkResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(OptolinkError::NotRunning)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ChannelListener, LogListener, MockValueListener, ValueEvent};
    use optolink_core::{AccessMode, DataType};
    use optolink_device::{Fault, Operation, Outcome, VirtualDevice};
    use optolink_protocol::{Engine, LinkSettings};
    use optolink_transport::MemoryTransport;
    use std::time::Duration;
    use tokio::time::Instant;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn table() -> CommandTable {
        CommandTable::from_specs([
            CommandSpec::new("Aussentemperatur", 0x0800, 2, ValueFormat::scaled(10.0).with_signed(true))
                .unwrap()
                .with_access(AccessMode::Read)
                .with_unit("°C"),
            CommandSpec::new("Kesseltemperatur", 0x0802, 2, ValueFormat::scaled(10.0))
                .unwrap()
                .with_access(AccessMode::Read),
            CommandSpec::new(
                "Betriebsart_A1M1",
                0x2323,
                1,
                ValueFormat::new(DataType::Integer).with_bounds(Some(0.0), Some(4.0)),
            )
            .unwrap(),
            CommandSpec::new("Sparbetrieb_A1M1", 0x2302, 1, ValueFormat::new(DataType::Boolean)).unwrap(),
        ])
        .unwrap()
    }

    fn engine(device: &VirtualDevice) -> Engine<MemoryTransport> {
        let settings = LinkSettings {
            timeout: TIMEOUT,
            ..LinkSettings::default()
        };
        Engine::new(device.protocol(), device.connect(TIMEOUT), settings)
    }

    fn start(device: &VirtualDevice, items: Vec<ScheduledItem>) -> Scheduler {
        Scheduler::start(engine(device), table(), items, Arc::new(LogListener)).unwrap()
    }

    fn seconds_between(earlier: Instant, later: Instant) -> f64 {
        (later - earlier).as_secs_f64()
    }

    #[tokio::test]
    async fn test_read_scaled_value() {
        let device = VirtualDevice::new(ProtocolKind::P300).with_bytes(0x0800, &[0x00, 0xE1]);
        let scheduler = start(&device, Vec::new());

        let value = scheduler.read_now("Aussentemperatur").await.unwrap();
        assert_eq!(value, TypedValue::Number(22.5));
        assert_eq!(scheduler.statistics().exchanges, 1);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_caller_errors_never_reach_the_link() {
        let device = VirtualDevice::new(ProtocolKind::P300);
        let scheduler = start(&device, Vec::new());

        assert!(matches!(
            scheduler.read_now("Vorlauftemperatur").await,
            Err(OptolinkError::UnknownCommand(_))
        ));
        assert!(matches!(
            scheduler.write_now("Aussentemperatur", 20.0).await,
            Err(OptolinkError::UnsupportedAccess(_))
        ));
        assert!(matches!(
            scheduler.write_now("Betriebsart_A1M1", 9).await,
            Err(OptolinkError::ValueOutOfRange(_))
        ));
        assert!(device.exchanges().is_empty());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_then_read_after_write() {
        let device = VirtualDevice::new(ProtocolKind::P300);
        let (listener, mut events) = ChannelListener::new();
        let items = vec![ScheduledItem::new("Betriebsart_A1M1").with_read_after_write(Duration::from_secs(5))];
        let scheduler = Scheduler::start(engine(&device), table(), items, Arc::new(listener)).unwrap();

        scheduler.write_now("Betriebsart_A1M1", 1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let writes = device.answered(Operation::Write, 0x2323);
        let reads = device.answered(Operation::Read, 0x2323);
        assert_eq!(writes.len(), 1);
        assert_eq!(reads.len(), 1);
        let elapsed = seconds_between(writes[0].at, reads[0].at);
        assert!((5.0..=5.5).contains(&elapsed), "read after {} s", elapsed);
        assert_eq!(reads[0].data, vec![0x01]);

        let expected = ValueEvent::Value {
            command: "Betriebsart_A1M1".to_string(),
            value: TypedValue::Integer(1),
        };
        assert_eq!(events.recv().await.unwrap(), expected);
        assert_eq!(events.recv().await.unwrap(), expected);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_write_supersedes_pending_read() {
        let device = VirtualDevice::new(ProtocolKind::P300);
        let items = vec![ScheduledItem::new("Betriebsart_A1M1").with_read_after_write(Duration::from_secs(5))];
        let scheduler = start(&device, items);

        scheduler.write_now("Betriebsart_A1M1", 1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.write_now("Betriebsart_A1M1", 2).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let writes = device.answered(Operation::Write, 0x2323);
        let reads = device.answered(Operation::Read, 0x2323);
        assert_eq!(writes.len(), 2);
        assert_eq!(reads.len(), 1);
        let elapsed = seconds_between(writes[1].at, reads[0].at);
        assert!((5.0..=5.5).contains(&elapsed), "read after {} s", elapsed);
        assert_eq!(reads[0].data, vec![0x02]);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_keeps_pending_read() {
        let device = VirtualDevice::new(ProtocolKind::P300);
        let items = vec![ScheduledItem::new("Betriebsart_A1M1").with_read_after_write(Duration::from_secs(5))];
        let scheduler = start(&device, items);

        scheduler.write_now("Betriebsart_A1M1", 1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        // every transmission of the second write is rejected
        device.inject(Fault::Nack, 3);
        assert!(matches!(
            scheduler.write_now("Betriebsart_A1M1", 2).await,
            Err(OptolinkError::ProtocolNack(_))
        ));
        tokio::time::sleep(Duration::from_secs(10)).await;

        let writes = device.answered(Operation::Write, 0x2323);
        let reads = device.answered(Operation::Read, 0x2323);
        assert_eq!(writes.len(), 1);
        assert_eq!(reads.len(), 1);
        let elapsed = seconds_between(writes[0].at, reads[0].at);
        assert!((5.0..=5.5).contains(&elapsed), "read after {} s", elapsed);
        assert_eq!(reads[0].data, vec![0x01]);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_after_unconfirmed_write() {
        let device = VirtualDevice::new(ProtocolKind::P300);
        device.inject(Fault::AckOnly, 1);
        let items = vec![ScheduledItem::new("Betriebsart_A1M1").with_read_after_write(Duration::from_secs(5))];
        let scheduler = start(&device, items);

        scheduler.write_now("Betriebsart_A1M1", 1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let writes = device.answered(Operation::Write, 0x2323);
        let reads = device.answered(Operation::Read, 0x2323);
        assert_eq!(writes.len(), 1);
        assert_eq!(reads.len(), 1);
        let elapsed = seconds_between(writes[0].at, reads[0].at);
        assert!((5.0..=5.5).contains(&elapsed), "read after {} s", elapsed);
        assert_eq!(reads[0].data, vec![0x01]);
        assert_eq!(scheduler.statistics().timeouts, 0);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_read_after_delay() {
        let device = VirtualDevice::new(ProtocolKind::P300).with_bytes(0x2302, &[0x01]);
        let items = vec![
            ScheduledItem::new("Betriebsart_A1M1")
                .with_trigger("Sparbetrieb_A1M1")
                .with_trigger_delay(Duration::from_secs(1)),
        ];
        let scheduler = start(&device, items);

        scheduler.write_now("Betriebsart_A1M1", 3).await.unwrap();
        let written = Instant::now();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(device.answered(Operation::Read, 0x2302).is_empty());
        tokio::time::sleep(Duration::from_secs(1)).await;

        let reads = device.answered(Operation::Read, 0x2302);
        assert_eq!(reads.len(), 1);
        assert!(seconds_between(written, reads[0].at) >= 1.0);
        // the written item itself has no read-after-write
        assert!(device.answered(Operation::Read, 0x2323).is_empty());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cyclic_read_is_drift_free() {
        let device = VirtualDevice::new(ProtocolKind::P300).with_bytes(0x0800, &[0x00, 0xE1]);
        // the first fire is delayed by one read timeout
        device.inject(Fault::Silent, 1);
        let t0 = Instant::now();
        let items = vec![ScheduledItem::new("Aussentemperatur").with_cycle(Duration::from_secs(10))];
        let scheduler = start(&device, items);

        tokio::time::sleep(Duration::from_secs(45)).await;
        let reads = device.answered(Operation::Read, 0x0800);
        assert_eq!(reads.len(), 4);
        assert!(seconds_between(t0, reads[0].at) > 10.0);
        for (n, read) in reads.iter().enumerate().skip(1) {
            let nominal = 10.0 * (n + 1) as f64;
            let offset = seconds_between(t0, read.at) - nominal;
            assert!(offset.abs() < 0.01, "fire {} off by {} s", n, offset);
        }
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cyclic_read_waits_for_next_period() {
        let device = VirtualDevice::new(ProtocolKind::P300).with_bytes(0x0800, &[0x00, 0xE1]);
        // initial attempt plus three resynchronisations
        device.inject(Fault::Silent, 4);

        let mut listener = MockValueListener::new();
        listener
            .expect_on_error()
            .withf(|command, error| {
                command == "Aussentemperatur" && matches!(error, OptolinkError::LinkTimeout(_))
            })
            .times(1)
            .return_const(());
        listener
            .expect_on_value()
            .withf(|command, value| command == "Aussentemperatur" && *value == TypedValue::Number(22.5))
            .times(1)
            .return_const(());

        let items = vec![ScheduledItem::new("Aussentemperatur").with_cycle(Duration::from_secs(10))];
        let scheduler = Scheduler::start(engine(&device), table(), items, Arc::new(listener)).unwrap();

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(device.answered(Operation::Read, 0x0800).is_empty());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(device.answered(Operation::Read, 0x0800).len(), 1);
        assert_eq!(scheduler.statistics().failed_exchanges, 1);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_serialised() {
        let device = VirtualDevice::new(ProtocolKind::P300)
            .with_bytes(0x0800, &[0x00, 0xE1])
            .with_bytes(0x0802, &[0x02, 0x9E]);
        let scheduler = start(&device, Vec::new());

        let requests = (0..8).map(|i| {
            let scheduler = scheduler.clone();
            let command = if i % 2 == 0 { "Aussentemperatur" } else { "Kesseltemperatur" };
            tokio::spawn(async move { scheduler.read_now(command).await })
        });
        let results = futures::future::join_all(requests).await;

        for result in results {
            assert!(result.unwrap().is_ok());
        }
        let exchanges = device.exchanges();
        assert_eq!(exchanges.len(), 8);
        assert!(exchanges.iter().all(|record| record.outcome == Outcome::Answered));
        let statistics = scheduler.statistics();
        assert_eq!(statistics.exchanges, 8);
        assert_eq!(statistics.resyncs, 0);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_read_is_reported() {
        let device = VirtualDevice::new(ProtocolKind::P300);
        device.inject(Fault::Silent, 10);
        let scheduler = start(&device, Vec::new());

        assert!(matches!(
            scheduler.read_now("Aussentemperatur").await,
            Err(OptolinkError::LinkTimeout(_))
        ));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_schedules_nothing() {
        let device = VirtualDevice::new(ProtocolKind::Kw);
        device.inject(Fault::WriteStatus(0x01), 1);
        let items = vec![
            ScheduledItem::new("Betriebsart_A1M1")
                .with_read_after_write(Duration::from_secs(5))
                .with_trigger("Sparbetrieb_A1M1"),
        ];
        let scheduler = start(&device, items);

        assert!(matches!(
            scheduler.write_now("Betriebsart_A1M1", 2).await,
            Err(OptolinkError::ProtocolNack(_))
        ));
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(device
            .exchanges()
            .iter()
            .all(|record| record.operation == Operation::Write));
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_all_in_declared_order() {
        let device = VirtualDevice::new(ProtocolKind::Kw);
        let items = vec![
            ScheduledItem::new("Kesseltemperatur").with_initial_read(true),
            ScheduledItem::new("Aussentemperatur"),
            ScheduledItem::new("Betriebsart_A1M1").with_initial_read(true),
        ];
        let scheduler = start(&device, items);

        assert_eq!(scheduler.initialize_all().unwrap(), 2);
        // FIFO: once this returns, the queued reads have run
        scheduler.read_now("Sparbetrieb_A1M1").await.unwrap();

        let addresses: Vec<u16> = device
            .exchanges()
            .iter()
            .map(|record| record.address.value())
            .collect();
        assert_eq!(addresses, vec![0x0802, 0x2323, 0x2302]);

        assert_eq!(scheduler.refresh_all().unwrap(), 3);
        scheduler.read_now("Sparbetrieb_A1M1").await.unwrap();
        assert_eq!(device.exchanges().len(), 7);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_adhoc_address() {
        let device = VirtualDevice::new(ProtocolKind::P300).with_bytes(0x5525, &[0x07, 0x01]);
        let scheduler = start(&device, Vec::new());
        let address = DataPointAddress::new(0x5525);

        let raw = scheduler
            .read_address(address, 2, ValueFormat::new(DataType::Raw))
            .await
            .unwrap();
        assert_eq!(raw, TypedValue::Raw(vec![0x07, 0x01]));

        let format = ValueFormat::new(DataType::Integer).with_byte_order(optolink_core::ByteOrder::LittleEndian);
        assert_eq!(
            scheduler.read_address(address, 2, format.clone()).await.unwrap(),
            TypedValue::Integer(0x0107)
        );
        scheduler.write_address(address, 2, format, 0x0203).await.unwrap();
        assert_eq!(device.bytes(0x5525, 2), vec![0x03, 0x02]);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_rejects_new_work() {
        let device = VirtualDevice::new(ProtocolKind::P300).with_bytes(0x0800, &[0x00, 0xE1]);
        let scheduler = start(&device, Vec::new());
        scheduler.read_now("Aussentemperatur").await.unwrap();

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        assert!(matches!(
            scheduler.read_now("Aussentemperatur").await,
            Err(OptolinkError::NotRunning)
        ));
        assert!(matches!(scheduler.initialize_all(), Err(OptolinkError::NotRunning)));
        assert_eq!(scheduler.statistics().exchanges, 1);
        // stopping twice is harmless
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_items_rejected() {
        let device = VirtualDevice::new(ProtocolKind::P300);
        let items = vec![ScheduledItem::new("Betriebsart_A1M1").with_trigger("Unbekannt")];
        let result = Scheduler::start(engine(&device), table(), items, Arc::new(LogListener));
        assert!(matches!(result, Err(OptolinkError::UnknownCommand(_))));
    }
}
