//! Property indexes: value to node lookups for selected property keys.
//!
//! Each indexed key owns a map from property value to the set of nodes
//! currently holding it. Indexes are persisted per key as an index store
//! whose entries map the encoded value to the concatenated little-endian ids
//! of its nodes. Only indexes changed since the last save are rewritten.
//! Custom values pass through the property converter before they become
//! keys, so in-memory keys match what a reload decodes.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::error::{GraphError, Result};
use crate::model::{NodeId, PropertyConverter, Value};
use crate::node::NodeRef;
use crate::storage::value_codec::{value_bytes, value_from_bytes, DecodeContext};
use crate::storage::OverflowStorage;

const ID_WIDTH: usize = std::mem::size_of::<NodeId>();

#[derive(Default)]
struct PropertyIndex {
    entries: RwLock<FxHashMap<Value, FxHashSet<NodeRef>>>,
    dirty: AtomicBool,
}

impl PropertyIndex {
    fn put(&self, value: Value, node: NodeRef) {
        self.entries.write().entry(value).or_default().insert(node);
        self.dirty.store(true, Ordering::Release);
    }

    fn remove(&self, value: &Value, node: &NodeRef) -> bool {
        let mut entries = self.entries.write();
        let Some(nodes) = entries.get_mut(value) else {
            return false;
        };
        let removed = nodes.remove(node);
        if nodes.is_empty() {
            entries.remove(value);
        }
        if removed {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    fn node_count(&self) -> usize {
        self.entries.read().values().map(FxHashSet::len).sum()
    }
}

/// Indexes keyed by property name.
#[derive(Default)]
pub struct IndexManager {
    indexes: RwLock<FxHashMap<Arc<str>, Arc<PropertyIndex>>>,
    dropped: Mutex<FxHashSet<Arc<str>>>,
    converter: Option<PropertyConverter>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index manager that stores custom values in their converted form.
    pub fn with_converter(converter: Option<PropertyConverter>) -> Self {
        Self {
            converter,
            ..Self::default()
        }
    }

    fn key_of<'v>(&self, value: &'v Value) -> Cow<'v, Value> {
        match &self.converter {
            Some(convert) => convert_nested(value, convert),
            None => Cow::Borrowed(value),
        }
    }

    /// Creates the index for `key` and fills it from `backfill`. Returns
    /// false, without calling `backfill`, when the key is already indexed.
    pub fn create_index<F>(&self, key: &str, backfill: F) -> Result<bool>
    where
        F: FnOnce() -> Result<Vec<(NodeRef, Value)>>,
    {
        if key.is_empty() {
            return Err(GraphError::invalid("index property names must be non-empty"));
        }
        if self.is_indexed(key) {
            return Ok(false);
        }
        let index = Arc::new(PropertyIndex::default());
        let existing = backfill()?;
        let count = existing.len();
        for (node, value) in existing {
            if !value.is_null() {
                index.put(self.key_of(&value).into_owned(), node);
            }
        }
        index.dirty.store(true, Ordering::Release);

        let key: Arc<str> = Arc::from(key);
        let mut indexes = self.indexes.write();
        if indexes.contains_key(&key) {
            return Ok(false);
        }
        indexes.insert(Arc::clone(&key), index);
        self.dropped.lock().remove(&key);
        info!(key = %key, nodes = count, "index.create");
        Ok(true)
    }

    /// Discards the index for `key`; its store is deleted on the next save.
    pub fn drop_index(&self, key: &str) -> bool {
        let Some((key, _)) = self.indexes.write().remove_entry(key) else {
            return false;
        };
        debug!(key = %key, "index.drop");
        self.dropped.lock().insert(key);
        true
    }

    pub fn is_indexed(&self, key: &str) -> bool {
        self.indexes.read().contains_key(key)
    }

    /// Indexed keys, sorted.
    pub fn indexed_properties(&self) -> Vec<Arc<str>> {
        let mut keys: Vec<_> = self.indexes.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of (value, node) entries of the index for `key`.
    pub fn indexed_node_count(&self, key: &str) -> usize {
        self.index(key).map_or(0, |index| index.node_count())
    }

    /// Nodes whose `key` property equals `value`, ordered by id. Unindexed
    /// keys yield nothing.
    pub fn lookup(&self, key: &str, value: &Value) -> Vec<NodeRef> {
        let Some(index) = self.index(key) else {
            return Vec::new();
        };
        let mut nodes: Vec<NodeRef> = index
            .entries
            .read()
            .get(self.key_of(value).as_ref())
            .map(|nodes| nodes.iter().cloned().collect())
            .unwrap_or_default();
        nodes.sort_by_key(NodeRef::id);
        nodes
    }

    pub fn put_if_indexed(&self, key: &str, value: &Value, node: &NodeRef) {
        if value.is_null() {
            return;
        }
        if let Some(index) = self.index(key) {
            index.put(self.key_of(value).into_owned(), node.clone());
        }
    }

    pub fn remove(&self, key: &str, value: &Value, node: &NodeRef) -> bool {
        self.index(key)
            .is_some_and(|index| index.remove(&self.key_of(value), node))
    }

    /// Moves `node` from `old` to `new` in the index for `key`, if any.
    pub fn update(&self, key: &str, old: Option<&Value>, new: Option<&Value>, node: &NodeRef) {
        let Some(index) = self.index(key) else {
            return;
        };
        if let Some(old) = old {
            index.remove(&self.key_of(old), node);
        }
        if let Some(new) = new.filter(|value| !value.is_null()) {
            index.put(self.key_of(new).into_owned(), node.clone());
        }
    }

    /// Removes every entry of `node`, given its current properties.
    pub fn remove_node<'a, I>(&self, node: &NodeRef, properties: I)
    where
        I: IntoIterator<Item = (&'a Arc<str>, &'a Value)>,
    {
        for (key, value) in properties {
            self.remove(key, value, node);
        }
    }

    /// Writes every index changed since the last save and deletes the stores
    /// of dropped ones. Returns the number of indexes written.
    pub fn save(&self, storage: &OverflowStorage) -> Result<usize> {
        let dropped: Vec<Arc<str>> = self.dropped.lock().drain().collect();
        for key in &dropped {
            storage.drop_index_store(key)?;
        }

        let indexes: Vec<(Arc<str>, Arc<PropertyIndex>)> = self
            .indexes
            .read()
            .iter()
            .map(|(key, index)| (Arc::clone(key), Arc::clone(index)))
            .collect();
        let mut written = 0;
        for (key, index) in indexes {
            if !index.dirty.swap(false, Ordering::AcqRel) {
                continue;
            }
            let entries = match encode_entries(&index, self.converter.as_ref()) {
                Ok(entries) => entries,
                Err(err) => {
                    index.dirty.store(true, Ordering::Release);
                    return Err(err);
                }
            };
            storage.open_index_store(&key)?;
            if let Err(err) = storage.write_index_store(&key, &entries) {
                index.dirty.store(true, Ordering::Release);
                return Err(err);
            }
            debug!(key = %key, values = entries.len(), "index.save");
            written += 1;
        }
        Ok(written)
    }

    /// Replaces the in-memory indexes with the stored ones. Loaded indexes
    /// start clean.
    pub fn load(&self, storage: &OverflowStorage, ctx: &DecodeContext<'_>) -> Result<usize> {
        let mut loaded = FxHashMap::default();
        for name in storage.index_names()? {
            let index = PropertyIndex::default();
            {
                let mut entries = index.entries.write();
                for (value_raw, ids_raw) in storage.index_entries(&name)? {
                    let value = value_from_bytes(&value_raw, ctx)?;
                    if value.is_null() {
                        continue;
                    }
                    if ids_raw.len() % ID_WIDTH != 0 {
                        return Err(GraphError::corruption(format!(
                            "index {name} holds a node id list of {} bytes",
                            ids_raw.len()
                        )));
                    }
                    let mut nodes = FxHashSet::default();
                    for chunk in ids_raw.chunks_exact(ID_WIDTH) {
                        let id = NodeId::from_le_bytes(
                            chunk.try_into().expect("chunk has exactly 8 bytes"),
                        );
                        nodes.insert(ctx.resolver.resolve(id)?);
                    }
                    entries.insert(value, nodes);
                }
            }
            loaded.insert(Arc::from(name.as_str()), Arc::new(index));
        }
        let count = loaded.len();
        *self.indexes.write() = loaded;
        self.dropped.lock().clear();
        info!(indexes = count, "index.load");
        Ok(count)
    }

    fn index(&self, key: &str) -> Option<Arc<PropertyIndex>> {
        self.indexes.read().get(key).cloned()
    }
}

fn convert_nested<'v>(value: &'v Value, convert: &PropertyConverter) -> Cow<'v, Value> {
    match value {
        Value::Custom(custom) => match convert(custom) {
            Value::Custom(_) => Cow::Borrowed(value),
            converted => Cow::Owned(convert_nested(&converted, convert).into_owned()),
        },
        Value::List(items) if items.iter().any(has_custom) => Cow::Owned(Value::List(
            items.iter().map(|item| convert_nested(item, convert).into_owned()).collect(),
        )),
        Value::ObjectArray(items) if items.iter().any(has_custom) => Cow::Owned(Value::ObjectArray(
            items.iter().map(|item| convert_nested(item, convert).into_owned()).collect(),
        )),
        _ => Cow::Borrowed(value),
    }
}

fn has_custom(value: &Value) -> bool {
    match value {
        Value::Custom(_) => true,
        Value::List(items) | Value::ObjectArray(items) => items.iter().any(has_custom),
        _ => false,
    }
}

fn encode_entries(
    index: &PropertyIndex,
    converter: Option<&PropertyConverter>,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let entries = index.entries.read();
    let mut encoded = Vec::with_capacity(entries.len());
    for (value, nodes) in entries.iter() {
        let mut ids: Vec<NodeId> = nodes.iter().map(NodeRef::id).collect();
        ids.sort_unstable();
        let mut raw = Vec::with_capacity(ids.len() * ID_WIDTH);
        for id in ids {
            raw.extend_from_slice(&id.to_le_bytes());
        }
        encoded.push((value_bytes(value, converter)?, raw));
    }
    Ok(encoded)
}
