//! Ordered key-value stores underneath [`OverflowStorage`](super::OverflowStorage).

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::model::NodeId;

/// Raw persistent store: node records keyed by id, the string dictionary,
/// string metadata and named index stores.
///
/// Implementations must be safe to share across threads. Reads may run
/// concurrently with writes; writes are issued by a single writer.
pub trait KvBackend: Send + Sync {
    fn get_record(&self, id: NodeId) -> Result<Option<Vec<u8>>>;
    /// Writes all records in one atomic step.
    fn persist_batch(&self, records: &[(NodeId, Vec<u8>)]) -> Result<()>;
    fn remove_record(&self, id: NodeId) -> Result<()>;
    /// Every stored record, ordered by id.
    fn all_records(&self) -> Result<Vec<(NodeId, Vec<u8>)>>;
    fn record_count(&self) -> Result<u64>;

    fn persist_string(&self, id: i32, value: &str) -> Result<()>;
    fn load_strings(&self) -> Result<Vec<(i32, String)>>;

    fn get_meta(&self, key: &str) -> Result<Option<String>>;
    fn put_meta(&self, key: &str, value: &str) -> Result<()>;
    fn meta_entries(&self) -> Result<Vec<(String, String)>>;

    /// Creates the named store if missing.
    fn open_store(&self, store: &str) -> Result<()>;
    fn store_names(&self) -> Result<Vec<String>>;
    /// Replaces the full content of the named store.
    fn replace_store(&self, store: &str, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()>;
    fn clear_store(&self, store: &str) -> Result<()>;
    fn drop_store(&self, store: &str) -> Result<()>;
    fn store_entries(&self, store: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Makes every preceding write durable.
    fn flush(&self) -> Result<()>;

    /// Whether the backend holds nothing yet, i.e. a fresh store.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.record_count()? == 0 && self.meta_entries()?.is_empty())
    }
}

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<NodeId, Vec<u8>>,
    strings: BTreeMap<i32, String>,
    meta: BTreeMap<String, String>,
    stores: BTreeMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
}

/// Volatile backend, used by tests and by graphs that never outlive the
/// process.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn get_record(&self, id: NodeId) -> Result<Option<Vec<u8>>> {
        Ok(self.state.read().records.get(&id).cloned())
    }

    fn persist_batch(&self, records: &[(NodeId, Vec<u8>)]) -> Result<()> {
        let mut state = self.state.write();
        for (id, bytes) in records {
            state.records.insert(*id, bytes.clone());
        }
        Ok(())
    }

    fn remove_record(&self, id: NodeId) -> Result<()> {
        self.state.write().records.remove(&id);
        Ok(())
    }

    fn all_records(&self) -> Result<Vec<(NodeId, Vec<u8>)>> {
        Ok(self
            .state
            .read()
            .records
            .iter()
            .map(|(id, bytes)| (*id, bytes.clone()))
            .collect())
    }

    fn record_count(&self) -> Result<u64> {
        Ok(self.state.read().records.len() as u64)
    }

    fn persist_string(&self, id: i32, value: &str) -> Result<()> {
        self.state.write().strings.insert(id, value.to_owned());
        Ok(())
    }

    fn load_strings(&self) -> Result<Vec<(i32, String)>> {
        Ok(self
            .state
            .read()
            .strings
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect())
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.read().meta.get(key).cloned())
    }

    fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        self.state
            .write()
            .meta
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn meta_entries(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .state
            .read()
            .meta
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn open_store(&self, store: &str) -> Result<()> {
        self.state
            .write()
            .stores
            .entry(store.to_owned())
            .or_default();
        Ok(())
    }

    fn store_names(&self) -> Result<Vec<String>> {
        Ok(self.state.read().stores.keys().cloned().collect())
    }

    fn replace_store(&self, store: &str, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let mut state = self.state.write();
        let target = state.stores.entry(store.to_owned()).or_default();
        target.clear();
        target.extend(entries.iter().cloned());
        Ok(())
    }

    fn clear_store(&self, store: &str) -> Result<()> {
        if let Some(target) = self.state.write().stores.get_mut(store) {
            target.clear();
        }
        Ok(())
    }

    fn drop_store(&self, store: &str) -> Result<()> {
        self.state.write().stores.remove(store);
        Ok(())
    }

    fn store_entries(&self, store: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .state
            .read()
            .stores
            .get(store)
            .map(|entries| entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
