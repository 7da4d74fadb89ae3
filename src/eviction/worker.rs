use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

/// Unit of work executed by an [`EvictionWorker`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Default thread name of engine-owned workers.
pub const DEFAULT_WORKER_NAME: &str = "penumbra-eviction";

/// Single background thread running eviction jobs one at a time.
///
/// The queue holds at most one waiting job; submissions beyond that are
/// handed back to the caller instead of blocking. A worker may be shared by
/// several graphs, in which case none of them shuts it down.
pub struct EvictionWorker {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EvictionWorker {
    pub fn spawn() -> Result<Self> {
        Self::spawn_named(DEFAULT_WORKER_NAME)
    }

    pub fn spawn_named(name: &str) -> Result<Self> {
        let (sender, receiver) = bounded::<Job>(1);
        let thread_name = name.to_owned();
        let handle = thread::Builder::new().name(name.to_owned()).spawn(move || {
            for job in receiver {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!(worker = %thread_name, "eviction.worker.job_panicked");
                }
            }
            debug!(worker = %thread_name, "eviction.worker.exit");
        })?;
        debug!(worker = name, "eviction.worker.spawn");
        Ok(Self {
            name: name.to_owned(),
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `job` unless a job is already waiting or the worker is shut
    /// down; the job is returned in that case.
    pub fn try_submit(&self, job: Job) -> std::result::Result<(), Job> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(job);
        };
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => Err(job),
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stops accepting jobs, lets the queued job finish and joins the thread.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        drop(sender);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(worker = %self.name, "eviction.worker.join_failed");
            }
        }
    }
}

impl Drop for EvictionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
