//! Persistent string dictionary: labels and property keys as small integers.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{GraphError, Result};
use crate::storage::backend::KvBackend;
use crate::storage::interner::StringInterner;

/// Lookup counters for the dictionary.
#[derive(Default)]
pub struct DictMetrics {
    intern_calls: AtomicU64,
    intern_hits: AtomicU64,
    intern_misses: AtomicU64,
    resolve_calls: AtomicU64,
    resolve_misses: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DictMetricsSnapshot {
    pub intern_calls: u64,
    pub intern_hits: u64,
    pub intern_misses: u64,
    pub resolve_calls: u64,
    pub resolve_misses: u64,
}

impl DictMetricsSnapshot {
    pub fn intern_hit_rate(&self) -> f64 {
        if self.intern_calls == 0 {
            return 0.0;
        }
        self.intern_hits as f64 / self.intern_calls as f64
    }
}

impl DictMetrics {
    pub fn snapshot(&self) -> DictMetricsSnapshot {
        DictMetricsSnapshot {
            intern_calls: self.intern_calls.load(Ordering::Relaxed),
            intern_hits: self.intern_hits.load(Ordering::Relaxed),
            intern_misses: self.intern_misses.load(Ordering::Relaxed),
            resolve_calls: self.resolve_calls.load(Ordering::Relaxed),
            resolve_misses: self.resolve_misses.load(Ordering::Relaxed),
        }
    }

    fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct DictState {
    by_string: FxHashMap<Arc<str>, i32>,
    by_id: FxHashMap<i32, Arc<str>>,
}

/// Append-only bidirectional string/id mapping.
///
/// Lookups take a shared lock; new ids come from a monotonically increasing
/// counter under a single creation lock and are written through to the
/// backend immediately. Ids start at 1 and are never reused.
pub struct StringDictionary {
    backend: Arc<dyn KvBackend>,
    interner: Arc<StringInterner>,
    state: RwLock<DictState>,
    create_lock: Mutex<()>,
    max_id: AtomicI32,
    metrics: Arc<DictMetrics>,
}

impl StringDictionary {
    /// Loads every stored mapping. The id counter resumes from the larger of
    /// `persisted_max_id` and the largest loaded id.
    pub fn load(
        backend: Arc<dyn KvBackend>,
        interner: Arc<StringInterner>,
        persisted_max_id: i32,
    ) -> Result<Self> {
        let mut state = DictState::default();
        let mut max_id = persisted_max_id.max(0);
        for (id, value) in backend.load_strings()? {
            let value = interner.intern(&value);
            state.by_string.insert(Arc::clone(&value), id);
            state.by_id.insert(id, value);
            max_id = max_id.max(id);
        }
        trace!(entries = state.by_id.len(), max_id, "dict.load");
        Ok(Self {
            backend,
            interner,
            state: RwLock::new(state),
            create_lock: Mutex::new(()),
            max_id: AtomicI32::new(max_id),
            metrics: Arc::new(DictMetrics::default()),
        })
    }

    pub fn metrics(&self) -> Arc<DictMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn metrics_snapshot(&self) -> DictMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Largest id handed out so far.
    pub fn max_id(&self) -> i32 {
        self.max_id.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lookup(&self, value: &str) -> Option<i32> {
        self.state.read().by_string.get(value).copied()
    }

    /// Id of `value`, creating and persisting a new mapping if needed.
    pub fn lookup_or_create(&self, value: &str) -> Result<i32> {
        self.metrics.inc(&self.metrics.intern_calls);
        if let Some(id) = self.lookup(value) {
            self.metrics.inc(&self.metrics.intern_hits);
            trace!(len = value.len(), id, "dict.intern.hit");
            return Ok(id);
        }

        let _guard = self.create_lock.lock();
        if let Some(id) = self.lookup(value) {
            self.metrics.inc(&self.metrics.intern_hits);
            return Ok(id);
        }
        self.metrics.inc(&self.metrics.intern_misses);
        let id = self.max_id.load(Ordering::Acquire).checked_add(1).ok_or_else(|| {
            GraphError::invalid("string dictionary exhausted the i32 id space")
        })?;
        self.backend.persist_string(id, value)?;
        self.max_id.store(id, Ordering::Release);
        let interned = self.interner.intern(value);
        let mut state = self.state.write();
        state.by_string.insert(Arc::clone(&interned), id);
        state.by_id.insert(id, interned);
        trace!(len = value.len(), id, "dict.intern.insert");
        Ok(id)
    }

    /// String for `id`, if the id was ever handed out.
    pub fn resolve(&self, id: i32) -> Option<Arc<str>> {
        self.metrics.inc(&self.metrics.resolve_calls);
        let resolved = self.state.read().by_id.get(&id).cloned();
        if resolved.is_none() {
            self.metrics.inc(&self.metrics.resolve_misses);
            trace!(id, "dict.resolve.miss");
        }
        resolved
    }
}
