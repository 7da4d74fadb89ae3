//! Reference eviction: bounding resident node bodies.
//!
//! Hydrated handles are queued as eviction candidates. [`EvictionEngine::request_eviction`]
//! hands a batch of them to a background [`EvictionWorker`], which serializes
//! dirty bodies through the [`NodesWriter`], stores them and drops every body
//! that is still clean afterwards. While a batch is in flight, node creation
//! is throttled through [`EvictionEngine::apply_backpressure_maybe`].

pub mod pressure;
pub mod worker;
pub mod writer;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::node::NodeRef;

pub use self::pressure::{MemoryMonitor, MemorySample};
pub use self::worker::{EvictionWorker, Job, DEFAULT_WORKER_NAME};
pub use self::writer::{NodesWriter, WriteOutcome};

/// Counters kept across the lifetime of an engine.
#[derive(Debug, Default)]
pub struct EvictionMetrics {
    pub batches_requested: AtomicU64,
    pub batches_dropped: AtomicU64,
    pub batches_completed: AtomicU64,
    pub batches_failed: AtomicU64,
    pub nodes_written: AtomicU64,
    pub nodes_evicted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionMetricsSnapshot {
    pub batches_requested: u64,
    pub batches_dropped: u64,
    pub batches_completed: u64,
    pub batches_failed: u64,
    pub nodes_written: u64,
    pub nodes_evicted: u64,
}

impl EvictionMetrics {
    pub fn snapshot(&self) -> EvictionMetricsSnapshot {
        EvictionMetricsSnapshot {
            batches_requested: self.batches_requested.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            nodes_written: self.nodes_written.load(Ordering::Relaxed),
            nodes_evicted: self.nodes_evicted.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    pending: Mutex<VecDeque<NodeRef>>,
    in_flight: Mutex<usize>,
    idle: Condvar,
    writer: Arc<NodesWriter>,
    metrics: EvictionMetrics,
}

impl Shared {
    fn enqueue(&self, node: &NodeRef) {
        if node.try_queue() {
            self.pending.lock().push_back(node.clone());
        }
    }

    fn enter(&self) {
        *self.in_flight.lock() += 1;
    }

    fn exit(&self) {
        let mut count = self.in_flight.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn clear_batch(&self, batch: Vec<NodeRef>) {
        debug!(refs = batch.len(), "eviction.batch.start");
        match self.writer.write(&batch, true) {
            Ok(outcome) => {
                for node in outcome
                    .redirtied
                    .iter()
                    .chain(outcome.failed.iter().map(|(node, _)| node))
                {
                    self.enqueue(node);
                }
                if let Err(err) = self.writer.codec().storage().flush() {
                    warn!(error = %err, "eviction.batch.flush_failed");
                }
                self.metrics
                    .nodes_written
                    .fetch_add(outcome.written as u64, Ordering::Relaxed);
                self.metrics
                    .nodes_evicted
                    .fetch_add(outcome.evicted as u64, Ordering::Relaxed);
                self.metrics.batches_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    written = outcome.written,
                    evicted = outcome.evicted,
                    requeued = outcome.redirtied.len() + outcome.failed.len(),
                    "eviction.batch.complete"
                );
            }
            Err(err) => {
                self.metrics.batches_failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, refs = batch.len(), "eviction.batch.failed");
                for node in batch.iter().filter(|node| node.is_hydrated()) {
                    self.enqueue(node);
                }
            }
        }
    }
}

/// Decrements the in-flight counter when the job that owns it is dropped,
/// whether it ran, failed, panicked or was discarded unrun.
struct InFlightGuard(Arc<Shared>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.exit();
    }
}

/// Queues eviction candidates and runs eviction batches on a background
/// worker.
pub struct EvictionEngine {
    shared: Arc<Shared>,
    worker: Arc<EvictionWorker>,
    owns_worker: bool,
}

impl EvictionEngine {
    /// Creates an engine writing through `writer`. Without `worker`, a
    /// dedicated one is spawned and shut down by [`close`](Self::close).
    pub fn new(writer: Arc<NodesWriter>, worker: Option<Arc<EvictionWorker>>) -> Result<Self> {
        let (worker, owns_worker) = match worker {
            Some(worker) => (worker, false),
            None => (Arc::new(EvictionWorker::spawn()?), true),
        };
        Ok(Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(VecDeque::new()),
                in_flight: Mutex::new(0),
                idle: Condvar::new(),
                writer,
                metrics: EvictionMetrics::default(),
            }),
            worker,
            owns_worker,
        })
    }

    pub fn writer(&self) -> &Arc<NodesWriter> {
        &self.shared.writer
    }

    pub fn metrics(&self) -> EvictionMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn owns_worker(&self) -> bool {
        self.owns_worker
    }

    /// Queues a hydrated handle as an eviction candidate. Handles already
    /// queued are not added twice.
    pub fn register(&self, node: &NodeRef) {
        self.shared.enqueue(node);
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn in_flight(&self) -> usize {
        *self.shared.in_flight.lock()
    }

    /// Hands up to `batch_size` queued candidates to the worker. Never
    /// blocks; returns false when nothing was queued or the worker already
    /// has a batch waiting, in which case the candidates stay queued.
    pub fn request_eviction(&self, batch_size: usize) -> bool {
        let batch: Vec<NodeRef> = {
            let mut pending = self.shared.pending.lock();
            let take = batch_size.min(pending.len());
            pending.drain(..take).collect()
        };
        if batch.is_empty() {
            return false;
        }
        for node in &batch {
            node.clear_queued();
        }
        self.shared
            .metrics
            .batches_requested
            .fetch_add(1, Ordering::Relaxed);

        self.shared.enter();
        let guard = InFlightGuard(Arc::clone(&self.shared));
        let shared = Arc::clone(&self.shared);
        let requeue = batch.clone();
        let refs = batch.len();
        let job: Job = Box::new(move || {
            let _guard = guard;
            shared.clear_batch(batch);
        });
        match self.worker.try_submit(job) {
            Ok(()) => {
                debug!(refs, "eviction.request.queued");
                true
            }
            Err(job) => {
                drop(job);
                for node in &requeue {
                    self.shared.enqueue(node);
                }
                self.shared
                    .metrics
                    .batches_dropped
                    .fetch_add(1, Ordering::Relaxed);
                debug!(refs, "eviction.request.dropped");
                false
            }
        }
    }

    /// Blocks while an eviction batch is in flight.
    pub fn apply_backpressure_maybe(&self) {
        let mut count = self.shared.in_flight.lock();
        if *count == 0 {
            return;
        }
        debug!(in_flight = *count, "eviction.backpressure.wait");
        while *count > 0 {
            self.shared.idle.wait(&mut count);
        }
        debug!("eviction.backpressure.released");
    }

    /// Writes every dirty body among `nodes` without evicting anything.
    pub fn flush_all(&self, nodes: &[NodeRef]) -> Result<usize> {
        let outcome = self.shared.writer.write(nodes, false)?;
        if let Some((_, err)) = outcome.failed.into_iter().next() {
            return Err(err);
        }
        Ok(outcome.written)
    }

    /// Waits for the in-flight batches and shuts down an owned worker.
    pub fn close(&self) {
        self.apply_backpressure_maybe();
        if self.owns_worker {
            self.worker.shutdown();
        }
        let mut pending = self.shared.pending.lock();
        for node in pending.drain(..) {
            node.clear_queued();
        }
        info!(metrics = ?self.shared.metrics.snapshot(), "eviction.close");
    }
}
