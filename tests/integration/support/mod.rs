#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use penumbra::storage::{KvBackend, MemoryBackend};
use penumbra::{GraphError, NodeId, Result, Schema};

#[derive(Default)]
struct Gate {
    closed: bool,
    waiting: usize,
}

/// In-memory backend whose record writes can be held back or made to fail.
#[derive(Default)]
pub struct GatedBackend {
    inner: MemoryBackend,
    fail_writes: AtomicBool,
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl GatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn close_gate(&self) {
        self.gate.lock().closed = true;
    }

    pub fn open_gate(&self) {
        self.gate.lock().closed = false;
        self.changed.notify_all();
    }

    /// Blocks until a record write is parked at the closed gate.
    pub fn wait_for_blocked_writer(&self) {
        let mut gate = self.gate.lock();
        while gate.waiting == 0 {
            self.changed.wait(&mut gate);
        }
    }
}

impl KvBackend for GatedBackend {
    fn get_record(&self, id: NodeId) -> Result<Option<Vec<u8>>> {
        self.inner.get_record(id)
    }

    fn persist_batch(&self, records: &[(NodeId, Vec<u8>)]) -> Result<()> {
        {
            let mut gate = self.gate.lock();
            if gate.closed {
                gate.waiting += 1;
                self.changed.notify_all();
                while gate.closed {
                    self.changed.wait(&mut gate);
                }
                gate.waiting -= 1;
            }
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GraphError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.inner.persist_batch(records)
    }

    fn remove_record(&self, id: NodeId) -> Result<()> {
        self.inner.remove_record(id)
    }

    fn all_records(&self) -> Result<Vec<(NodeId, Vec<u8>)>> {
        self.inner.all_records()
    }

    fn record_count(&self) -> Result<u64> {
        self.inner.record_count()
    }

    fn persist_string(&self, id: i32, value: &str) -> Result<()> {
        self.inner.persist_string(id, value)
    }

    fn load_strings(&self) -> Result<Vec<(i32, String)>> {
        self.inner.load_strings()
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_meta(key)
    }

    fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        self.inner.put_meta(key, value)
    }

    fn meta_entries(&self) -> Result<Vec<(String, String)>> {
        self.inner.meta_entries()
    }

    fn open_store(&self, store: &str) -> Result<()> {
        self.inner.open_store(store)
    }

    fn store_names(&self) -> Result<Vec<String>> {
        self.inner.store_names()
    }

    fn replace_store(&self, store: &str, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        self.inner.replace_store(store, entries)
    }

    fn clear_store(&self, store: &str) -> Result<()> {
        self.inner.clear_store(store)
    }

    fn drop_store(&self, store: &str) -> Result<()> {
        self.inner.drop_store(store)
    }

    fn store_entries(&self, store: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.store_entries(store)
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

/// People who know each other and write code.
pub fn schema() -> Schema {
    Schema::builder()
        .edge("KNOWS", ["since"])
        .edge("WROTE", Vec::<String>::new())
        .node("Person", ["KNOWS", "WROTE"], ["KNOWS"])
        .node("Method", Vec::<String>::new(), ["WROTE"])
        .build()
        .expect("schema")
}
