//! Delivery of callbacks to the caller's context.
//!
//! Workers perform I/O and parsing; they never run user callbacks
//! themselves. Each finished request is posted as a job to a [`Delivery`],
//! which decides on which thread the callback runs.
//!
//! - [`SerialDelivery`]: one dedicated thread runs every callback in the
//!   order results arrive. The default.
//! - [`QueuedDelivery`]: jobs wait in a queue until the owner drains it
//!   with [`run_pending`](QueuedDelivery::run_pending), for hosts that have
//!   their own main loop.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

/// A callback ready to run.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs completed-request callbacks on the caller's context.
pub trait Delivery: Send + Sync {
    fn post(&self, job: Job);
}

/// Runs every callback on one background thread, in arrival order.
///
/// A callback that panics is logged; later callbacks still run on the same
/// thread.
pub struct SerialDelivery {
    sender: Mutex<Option<Sender<Job>>>,
}

impl SerialDelivery {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let spawned = std::thread::Builder::new()
            .name("courier-delivery".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    run_job(job);
                }
            });

        let sender = match spawned {
            Ok(_) => Some(tx),
            Err(e) => {
                warn!(error = %e, "failed to spawn delivery thread, callbacks run on workers");
                None
            }
        };
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl Default for SerialDelivery {
    fn default() -> Self {
        Self::new()
    }
}

impl Delivery for SerialDelivery {
    fn post(&self, job: Job) {
        let sender = lock(&self.sender).clone();
        match sender {
            Some(tx) => {
                if let Err(mpsc::SendError(job)) = tx.send(job) {
                    run_job(job);
                }
            }
            None => run_job(job),
        }
    }
}

impl std::fmt::Debug for SerialDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDelivery").finish_non_exhaustive()
    }
}

/// Holds callbacks until the owning thread drains them.
#[derive(Default)]
pub struct QueuedDelivery {
    queue: Mutex<VecDeque<Job>>,
    ready: Condvar,
}

impl QueuedDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every queued callback on the calling thread. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let jobs: Vec<Job> = lock(&self.queue).drain(..).collect();
        let ran = jobs.len();
        for job in jobs {
            run_job(job);
        }
        ran
    }

    /// Wait up to `timeout` for at least one callback, then run all queued
    /// ones. Returns how many ran.
    pub fn wait_pending(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut queue = lock(&self.queue);
        while queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            queue = self
                .ready
                .wait_timeout(queue, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|p| p.into_inner().0);
        }
        drop(queue);
        self.run_pending()
    }

    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }
}

impl Delivery for QueuedDelivery {
    fn post(&self, job: Job) {
        lock(&self.queue).push_back(job);
        self.ready.notify_all();
    }
}

impl std::fmt::Debug for QueuedDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedDelivery")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Run one callback. A panic is logged and does not unwind into the
/// delivery loop.
fn run_job(job: Job) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".into());
        warn!(panic = %message, "callback panicked");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
