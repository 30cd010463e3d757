//! Fixed-size worker pool.
//!
//! A dedicated multi-threaded tokio runtime; request I/O, cache access and
//! parsing run on its threads, never on the caller's.

use std::future::Future;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::{CourierError, Result};

/// Default number of worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 4;

pub(crate) struct WorkerPool {
    handle: Handle,
    runtime: Option<Runtime>,
    threads: usize,
}

impl WorkerPool {
    pub(crate) fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(CourierError::Configuration(
                "worker pool needs at least one thread".into(),
            ));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("courier-worker")
            .enable_all()
            .build()
            .map_err(|e| CourierError::Configuration(format!("failed to start worker pool: {e}")))?;

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            threads,
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn threads(&self) -> usize {
        self.threads
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(task);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Safe from inside another runtime, unlike a plain drop.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
