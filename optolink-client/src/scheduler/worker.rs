//! The single task that owns the protocol engine

use crate::listener::ValueListener;
use crate::scheduler::queue::{Job, JobKind, JobQueue, Origin};
use crate::scheduler::timers::TimerCommand;
use crate::scheduler::ItemSet;
use optolink_core::{codec, OptolinkResult, TypedValue};
use optolink_protocol::{LinkStatistics, Protocol};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Executes queued jobs one at a time
///
/// Only the worker touches the engine, so exchanges on the link never
/// overlap. A job runs to completion (or retry exhaustion) before the next
/// one is taken from the queue.
pub(crate) struct Worker<P> {
    pub protocol: P,
    pub jobs: Arc<JobQueue>,
    pub items: Arc<ItemSet>,
    pub timers: mpsc::UnboundedSender<TimerCommand>,
    pub listener: Arc<dyn ValueListener>,
    pub statistics: Arc<Mutex<LinkStatistics>>,
}

impl<P: Protocol> Worker<P> {
    pub async fn run(mut self) {
        log::info!("{} worker started", self.protocol.kind());
        while let Some(job) = self.jobs.pop().await {
            self.process(job).await;
        }
        if let Err(e) = self.protocol.close().await {
            log::warn!("Closing the link failed: {}", e);
        }
        log::info!("{} worker stopped", self.protocol.kind());
    }

    async fn process(&mut self, mut job: Job) {
        let outcome = self.execute(&job).await;
        *self.statistics.lock() = self.protocol.statistics().clone();

        match &outcome {
            Ok(value) => {
                log::debug!("{} = {}", job.name(), value);
                if !job.is_read() {
                    self.supersede(job.name());
                    self.schedule_follow_ups(job.name());
                }
                self.listener.on_value(job.name(), value);
            }
            Err(e) => {
                match job.origin {
                    Origin::Cyclic => log::warn!("Missed cyclic read of {}: {}", job.name(), e),
                    Origin::Caller => log::debug!("{} failed: {}", job.name(), e),
                    Origin::Bulk | Origin::FollowUp => log::error!("Read of {} failed: {}", job.name(), e),
                }
                self.listener.on_error(job.name(), e);
            }
        }

        if let Some(reply) = job.reply.take() {
            if reply.send(outcome).is_err() {
                log::debug!("Caller of {} went away", job.name());
            }
        }
    }

    async fn execute(&mut self, job: &Job) -> OptolinkResult<TypedValue> {
        let request = job.request()?;
        let payload = self.protocol.execute(&request).await?;
        match &job.kind {
            JobKind::Read => codec::decode(&payload, &job.spec),
            JobKind::Write { value, .. } => Ok(value.clone()),
        }
    }

    /// Drop follow-up reads of `command` made stale by a completed write
    fn supersede(&self, command: &str) {
        let removed = self.jobs.remove_follow_ups(command);
        if removed > 0 {
            log::debug!("Dropped {} queued follow-up reads of {}", removed, command);
        }
        let _ = self.timers.send(TimerCommand::Cancel {
            command: command.to_string(),
        });
    }

    /// Arm the read-after-write and trigger timers of a written item
    fn schedule_follow_ups(&self, command: &str) {
        let Some(item) = self.items.item(command) else {
            return;
        };
        let mut follow_ups = Vec::new();
        if let Some(delay) = item.read_after_write {
            follow_ups.push((command, delay));
        }
        for trigger in &item.triggers {
            follow_ups.push((trigger.as_str(), item.trigger_delay));
        }
        for (target, delay) in follow_ups {
            match self.items.spec(target) {
                Some(spec) if spec.access.can_read() => {
                    let _ = self.timers.send(TimerCommand::FollowUp { spec, delay });
                }
                _ => log::warn!("Follow-up read of {} skipped, command not readable", target),
            }
        }
    }
}
