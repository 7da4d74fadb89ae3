use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

const PRUNE_INTERVAL: usize = 4_096;

/// Weak string interner: equal strings decoded from storage share one
/// allocation for as long as anything holds them.
#[derive(Default)]
pub struct StringInterner {
    inner: Mutex<InternerState>,
}

#[derive(Default)]
struct InternerState {
    entries: FxHashMap<Box<str>, Weak<str>>,
    inserts_since_prune: usize,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, value: &str) -> Arc<str> {
        let mut state = self.inner.lock();
        if let Some(existing) = state.entries.get(value).and_then(Weak::upgrade) {
            return existing;
        }
        let shared: Arc<str> = Arc::from(value);
        state
            .entries
            .insert(Box::from(value), Arc::downgrade(&shared));
        state.inserts_since_prune += 1;
        if state.inserts_since_prune >= PRUNE_INTERVAL {
            state.entries.retain(|_, weak| weak.strong_count() > 0);
            state.inserts_since_prune = 0;
        }
        shared
    }

    /// Live interned strings.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.entries.clear();
        state.inserts_since_prune = 0;
    }
}
