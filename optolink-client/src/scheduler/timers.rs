//! Cyclic and follow-up timers
//!
//! A single task owns every timer in a [`DelayQueue`]. Cyclic timers keep
//! their nominal grid: the next fire is the previous *scheduled* fire plus
//! the period. Follow-up timers (read-after-write and triggers) are keyed by
//! the command they read, so a newer write replaces an older pending one.

use crate::scheduler::queue::{Job, JobQueue, Origin};
use futures::StreamExt;
use optolink_core::CommandSpec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::time::delay_queue::{DelayQueue, Expired, Key};

#[derive(Debug)]
pub(crate) enum TimerCommand {
    /// Re-read `spec` every `period`
    Cyclic { spec: Arc<CommandSpec>, period: Duration },
    /// Read `spec` once after `delay`, replacing a pending follow-up of it
    FollowUp { spec: Arc<CommandSpec>, delay: Duration },
    /// Drop the pending follow-up of `command`
    Cancel { command: String },
    Shutdown,
}

#[derive(Debug)]
enum TimerKind {
    Cyclic { period: Duration, due: Instant },
    FollowUp,
}

#[derive(Debug)]
struct TimerEntry {
    spec: Arc<CommandSpec>,
    kind: TimerKind,
}

#[derive(Debug)]
struct CyclicTimer {
    key: Key,
    period: Duration,
}

/// Owner of every scheduler timer
#[derive(Debug)]
pub(crate) struct TimerWheel {
    timers: DelayQueue<TimerEntry>,
    cyclic: HashMap<String, CyclicTimer>,
    follow_ups: HashMap<String, Key>,
    jobs: Arc<JobQueue>,
    commands: mpsc::UnboundedReceiver<TimerCommand>,
}

impl TimerWheel {
    pub fn new(jobs: Arc<JobQueue>, commands: mpsc::UnboundedReceiver<TimerCommand>) -> Self {
        Self {
            timers: DelayQueue::new(),
            cyclic: HashMap::new(),
            follow_ups: HashMap::new(),
            jobs,
            commands,
        }
    }

    /// Run until shut down; dropping the wheel cancels every pending timer
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(TimerCommand::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                Some(expired) = self.timers.next() => self.fire(expired),
            }
        }
        log::debug!(
            "Timer wheel stopped, {} cyclic and {} follow-up timers cancelled",
            self.cyclic.len(),
            self.follow_ups.len()
        );
    }

    fn apply(&mut self, command: TimerCommand) {
        match command {
            TimerCommand::Cyclic { spec, period } => self.register_cyclic(spec, period),
            TimerCommand::FollowUp { spec, delay } => {
                let name = spec.name.clone();
                self.cancel_follow_up(&name);
                let key = self.timers.insert(
                    TimerEntry {
                        spec,
                        kind: TimerKind::FollowUp,
                    },
                    delay,
                );
                log::debug!("Follow-up read of {} in {:?}", name, delay);
                self.follow_ups.insert(name, key);
            }
            TimerCommand::Cancel { command } => {
                if self.cancel_follow_up(&command) {
                    log::debug!("Pending follow-up read of {} superseded", command);
                }
            }
            TimerCommand::Shutdown => {}
        }
    }

    /// Register a cyclic read; the shortest period of repeated registrations wins
    fn register_cyclic(&mut self, spec: Arc<CommandSpec>, period: Duration) {
        let name = spec.name.clone();
        if let Some(existing) = self.cyclic.get(&name) {
            if existing.period <= period {
                log::debug!(
                    "Cyclic read of {} already runs every {:?}",
                    name,
                    existing.period
                );
                return;
            }
            self.timers.remove(&existing.key);
        }
        let due = Instant::now() + period;
        let key = self.timers.insert_at(
            TimerEntry {
                spec,
                kind: TimerKind::Cyclic { period, due },
            },
            due,
        );
        log::info!("Cyclic read of {} every {:?}", name, period);
        self.cyclic.insert(name, CyclicTimer { key, period });
    }

    fn cancel_follow_up(&mut self, command: &str) -> bool {
        match self.follow_ups.remove(command) {
            Some(key) => {
                self.timers.remove(&key);
                true
            }
            None => false,
        }
    }

    fn fire(&mut self, expired: Expired<TimerEntry>) {
        let key = expired.key();
        let TimerEntry { spec, kind } = expired.into_inner();
        match kind {
            TimerKind::FollowUp => {
                if self.follow_ups.get(&spec.name) == Some(&key) {
                    self.follow_ups.remove(&spec.name);
                }
                self.submit(Job::read(spec, Origin::FollowUp));
            }
            TimerKind::Cyclic { period, due } => {
                let next = next_due(due, period, Instant::now());
                if self.jobs.has_pending_read(&spec.name, Origin::Cyclic) {
                    log::warn!(
                        "Cyclic read of {} still queued, skipping this period",
                        spec.name
                    );
                } else {
                    self.submit(Job::read(spec.clone(), Origin::Cyclic));
                }
                let name = spec.name.clone();
                let key = self.timers.insert_at(
                    TimerEntry {
                        spec,
                        kind: TimerKind::Cyclic { period, due: next },
                    },
                    next,
                );
                self.cyclic.insert(name, CyclicTimer { key, period });
            }
        }
    }

    fn submit(&self, job: Job) {
        if let Err(job) = self.jobs.push(job) {
            log::debug!("Timer for {} fired after stop", job.name());
        }
    }
}

/// Next nominal fire time of a cyclic timer
///
/// Periods missed entirely are skipped; a fire that is merely overdue stays
/// on the grid and runs immediately.
fn next_due(due: Instant, period: Duration, now: Instant) -> Instant {
    let next = due + period;
    if next >= now || period.is_zero() {
        return next;
    }
    let missed = (now - next).as_nanos() / period.as_nanos();
    let skip = u32::try_from(missed).unwrap_or(u32::MAX);
    next + period.saturating_mul(skip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use optolink_core::{DataType, ValueFormat};

    fn spec(name: &str) -> Arc<CommandSpec> {
        Arc::new(CommandSpec::new(name, 0x0800, 2, ValueFormat::new(DataType::Integer)).unwrap())
    }

    fn wheel() -> (mpsc::UnboundedSender<TimerCommand>, Arc<JobQueue>, tokio::task::JoinHandle<()>) {
        let jobs = Arc::new(JobQueue::new());
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(TimerWheel::new(jobs.clone(), receiver).run());
        (sender, jobs, handle)
    }

    #[test]
    fn test_next_due_stays_on_grid() {
        let t0 = Instant::now();
        let period = Duration::from_secs(10);
        assert_eq!(next_due(t0, period, t0), t0 + period);
        // overdue by less than a period: immediate, still on the grid
        let next = next_due(t0, period, t0 + Duration::from_secs(13));
        assert_eq!(next, t0 + period);
        // two whole periods missed
        let next = next_due(t0, period, t0 + Duration::from_secs(35));
        assert_eq!(next, t0 + Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cyclic_fires_each_period() {
        let (timers, jobs, handle) = wheel();
        timers
            .send(TimerCommand::Cyclic {
                spec: spec("Aussentemperatur"),
                period: Duration::from_secs(10),
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10) + Duration::from_millis(1)).await;
        let job = jobs.pop().await.unwrap();
        assert_eq!(job.name(), "Aussentemperatur");
        assert_eq!(job.origin, Origin::Cyclic);

        // not consumed: the overrun guard skips the next period
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(jobs.len(), 1);

        timers.send(TimerCommand::Shutdown).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_period_wins() {
        let (timers, jobs, handle) = wheel();
        for secs in [60, 10, 30] {
            timers
                .send(TimerCommand::Cyclic {
                    spec: spec("Aussentemperatur"),
                    period: Duration::from_secs(secs),
                })
                .unwrap();
        }
        tokio::time::sleep(Duration::from_secs(10) + Duration::from_millis(1)).await;
        assert_eq!(jobs.len(), 1);
        timers.send(TimerCommand::Shutdown).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_up_replaced_and_cancelled() {
        let (timers, jobs, handle) = wheel();
        let delay = Duration::from_secs(5);
        timers
            .send(TimerCommand::FollowUp { spec: spec("A"), delay })
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        timers
            .send(TimerCommand::FollowUp { spec: spec("A"), delay })
            .unwrap();

        // the first timer would have fired at 5 s
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(jobs.len(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(jobs.len(), 1);

        timers
            .send(TimerCommand::FollowUp { spec: spec("B"), delay })
            .unwrap();
        timers
            .send(TimerCommand::Cancel { command: "B".to_string() })
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(jobs.len(), 1);

        timers.send(TimerCommand::Shutdown).unwrap();
        handle.await.unwrap();
    }
}
