//! The engine's event loop.
//!
//! Jobs are closures queued on an unbounded channel and run one at a time on
//! whichever thread calls [`Network::run`]. They run inside a current-thread
//! tokio runtime, so a job may `tokio::spawn` timers that complete futures
//! later. Jobs queued before the loop starts wait for it; jobs left behind
//! when it stops are dropped, which breaks their promises.

use crate::error::{FluxError, FluxResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

pub(crate) type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct Network {
    sender: mpsc::UnboundedSender<Job>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    setup: AtomicBool,
    stop: Notify,
}

impl Network {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            setup: AtomicBool::new(false),
            stop: Notify::new(),
        }
    }

    pub(crate) fn handle(&self) -> NetworkHandle {
        NetworkHandle {
            sender: self.sender.clone(),
        }
    }

    pub(crate) fn setup(&self) -> FluxResult<()> {
        if self.setup.swap(true, Ordering::SeqCst) {
            return Err(FluxError::NetworkAlreadySetup);
        }
        Ok(())
    }

    /// Block the calling thread running jobs until `stop`.
    pub(crate) fn run(&self) -> FluxResult<()> {
        if !self.setup.load(Ordering::SeqCst) {
            return Err(FluxError::NetworkNotSetup);
        }
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(FluxError::NetworkAlreadySetup)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| FluxError::Internal(format!("cannot build network runtime: {e}")))?;

        let executed = runtime.block_on(async {
            let mut executed = 0u64;
            loop {
                tokio::select! {
                    biased;
                    _ = self.stop.notified() => break,
                    job = receiver.recv() => match job {
                        Some(job) => {
                            job();
                            executed += 1;
                        }
                        None => break,
                    },
                }
            }
            executed
        });

        receiver.close();
        let mut dropped = 0usize;
        while let Ok(job) = receiver.try_recv() {
            drop(job);
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "network stopped with queued jobs");
        }
        debug!(executed, "network loop exited");
        // Pending timers are dropped with the runtime.
        drop(runtime);
        Ok(())
    }

    /// Idempotent; a stop requested before `run` makes `run` return at once.
    pub(crate) fn stop(&self) {
        self.stop.notify_one();
    }
}

/// Cheap handle used by databases and transactions to queue work.
#[derive(Clone)]
pub(crate) struct NetworkHandle {
    sender: mpsc::UnboundedSender<Job>,
}

impl NetworkHandle {
    /// Queue a job. After the loop is gone the job is dropped, breaking
    /// whatever promises it owns.
    pub(crate) fn submit(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!("job submitted after the network stopped");
        }
    }

    /// Run `job` on the network thread after `delay`.
    pub(crate) fn submit_after(&self, delay: Duration, job: Job) {
        if delay.is_zero() {
            return self.submit(job);
        }
        self.submit(Box::new(move || {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                job();
            });
        }));
    }
}
