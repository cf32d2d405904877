//! FIFO job queue shared by callers, timers and the worker

use optolink_core::{CommandSpec, OptolinkError, OptolinkResult, TypedValue};
use optolink_protocol::Request;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};

/// Who submitted a job; decides how failures are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// `read_now` / `write_now` and the ad-hoc variants
    Caller,
    /// `initialize_all` and `refresh_all`
    Bulk,
    Cyclic,
    /// Read-after-write or trigger
    FollowUp,
}

#[derive(Debug)]
pub(crate) enum JobKind {
    Read,
    Write { value: TypedValue, payload: Vec<u8> },
}

pub(crate) type Reply = oneshot::Sender<OptolinkResult<TypedValue>>;

#[derive(Debug)]
pub(crate) struct Job {
    pub spec: Arc<CommandSpec>,
    pub kind: JobKind,
    pub origin: Origin,
    pub reply: Option<Reply>,
}

impl Job {
    pub fn read(spec: Arc<CommandSpec>, origin: Origin) -> Self {
        Self {
            spec,
            kind: JobKind::Read,
            origin,
            reply: None,
        }
    }

    pub fn write(spec: Arc<CommandSpec>, value: TypedValue, payload: Vec<u8>) -> Self {
        Self {
            spec,
            kind: JobKind::Write { value, payload },
            origin: Origin::Caller,
            reply: None,
        }
    }

    /// Attach a reply channel and return its receiving end
    pub fn with_reply(mut self) -> (Self, oneshot::Receiver<OptolinkResult<TypedValue>>) {
        let (sender, receiver) = oneshot::channel();
        self.reply = Some(sender);
        (self, receiver)
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_read(&self) -> bool {
        matches!(self.kind, JobKind::Read)
    }

    pub fn request(&self) -> OptolinkResult<Request> {
        match &self.kind {
            JobKind::Read => Request::read(&self.spec.name, self.spec.address, self.spec.length),
            JobKind::Write { payload, .. } => {
                Request::write(&self.spec.name, self.spec.address, payload.clone())
            }
        }
    }

    /// Resolve the job without executing it
    pub fn fail(self, error: OptolinkError) {
        if let Some(reply) = self.reply {
            let _ = reply.send(Err(error));
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    closed: bool,
}

/// Multi-producer, single-consumer job queue
#[derive(Debug, Default)]
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job
    ///
    /// # Errors
    ///
    /// Hands the job back when the queue has been closed.
    pub fn push(&self, job: Job) -> Result<(), Job> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(job);
            }
            state.jobs.push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Next job in submission order, or `None` once closed and empty
    pub async fn pop(&self) -> Option<Job> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(job) = state.jobs.pop_front() {
                    return Some(job);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Whether a read of `command` submitted by `origin` is still queued
    pub fn has_pending_read(&self, command: &str, origin: Origin) -> bool {
        self.state
            .lock()
            .jobs
            .iter()
            .any(|job| job.origin == origin && job.is_read() && job.name() == command)
    }

    /// Drop queued follow-up reads of `command`
    pub fn remove_follow_ups(&self, command: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.jobs.len();
        state
            .jobs
            .retain(|job| !(job.origin == Origin::FollowUp && job.is_read() && job.name() == command));
        before - state.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Refuse further jobs and hand back those still queued
    pub fn close(&self) -> Vec<Job> {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            state.jobs.drain(..).collect()
        };
        self.notify.notify_one();
        drained
    }
}
