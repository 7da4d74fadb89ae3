//! The graph: node handles, mutation, traversal and persistence.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::{GraphError, Result};
use crate::eviction::{EvictionEngine, EvictionMetricsSnapshot, MemoryMonitor, NodesWriter};
use crate::index::IndexManager;
use crate::model::{Direction, NodeId, Value};
use crate::node::{AdjacentEdge, BodyLoader, NodeBody, NodeRef};
use crate::schema::Schema;
use crate::storage::{
    CodecStatsSnapshot, DecodeContext, DictMetricsSnapshot, KvBackend, NodeCodec, NodeResolver,
    OverflowStorage, StringInterner,
};

/// Codec timings of both directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStatsReport {
    pub serialization: CodecStatsSnapshot,
    pub deserialization: CodecStatsSnapshot,
}

/// A property graph whose node bodies can be evicted to storage.
///
/// Node handles returned by the graph stay valid while their bodies move
/// between memory and storage. Every accessor transparently reloads an
/// evicted body.
pub struct Graph {
    config: Config,
    schema: Arc<Schema>,
    storage: Arc<OverflowStorage>,
    codec: Arc<NodeCodec>,
    writer: Arc<NodesWriter>,
    engine: Option<EvictionEngine>,
    monitor: Option<MemoryMonitor>,
    registry: RwLock<FxHashMap<NodeId, NodeRef>>,
    indexes: IndexManager,
    next_id: AtomicI64,
    closed: AtomicBool,
}

impl Graph {
    /// Opens the graph at `config.storage_location`, or a temporary graph
    /// when no location is set.
    pub fn open(config: Config, schema: Schema) -> Result<Self> {
        config.validate()?;
        let interner = Arc::new(StringInterner::new());
        let storage = match &config.storage_location {
            Some(path) => OverflowStorage::open(path, interner)?,
            None => OverflowStorage::temporary(interner)?,
        };
        Self::with_storage(config, schema, storage)
    }

    /// Opens the graph on a caller-provided backend.
    pub fn open_with_backend(
        config: Config,
        schema: Schema,
        backend: Arc<dyn KvBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let storage = OverflowStorage::with_backend(backend, Arc::new(StringInterner::new()))?;
        Self::with_storage(config, schema, storage)
    }

    fn with_storage(config: Config, schema: Schema, storage: OverflowStorage) -> Result<Self> {
        let schema = Arc::new(schema);
        let storage = Arc::new(storage);
        let codec = Arc::new(NodeCodec::new(
            Arc::clone(&storage),
            Arc::clone(&schema),
            config.property_converter.clone(),
            config.serialization_stats_enabled,
        ));
        let writer = Arc::new(NodesWriter::new(Arc::clone(&codec)));
        let (engine, monitor) = if config.overflow_enabled {
            let engine = EvictionEngine::new(Arc::clone(&writer), config.eviction_worker.clone())?;
            let monitor = MemoryMonitor::new(
                config.heap_percentage_threshold,
                config.pressure_check_interval,
            );
            (Some(engine), Some(monitor))
        } else {
            (None, None)
        };

        let indexes = IndexManager::with_converter(config.property_converter.clone());
        let graph = Self {
            config,
            schema,
            storage,
            codec,
            writer,
            engine,
            monitor,
            registry: RwLock::new(FxHashMap::default()),
            indexes,
            next_id: AtomicI64::new(0),
            closed: AtomicBool::new(false),
        };
        if let Err(err) = graph.load_existing() {
            graph.abandon();
            return Err(err);
        }
        info!(
            nodes = graph.node_count(),
            overflow = graph.config.overflow_enabled,
            location = ?graph.storage.location(),
            "graph.open"
        );
        Ok(graph)
    }

    /// Rebuilds evicted handles for every stored record and loads the
    /// stored indexes.
    fn load_existing(&self) -> Result<()> {
        let records = self.storage.all_records()?;
        let mut max_id = -1;
        {
            let mut registry = self.registry.write();
            for (key, bytes) in &records {
                let decoded = self.codec.deserialize_ref(bytes)?;
                if decoded.id != *key {
                    return Err(GraphError::corruption(format!(
                        "record stored under {key} holds node {}",
                        decoded.id
                    )));
                }
                max_id = max_id.max(decoded.id);
                registry.insert(decoded.id, NodeRef::evicted(decoded.id, decoded.label));
            }
        }
        self.next_id.store(max_id + 1, Ordering::Release);

        let ctx = DecodeContext {
            interner: self.storage.interner(),
            resolver: self,
        };
        let indexes = self.indexes.load(&self.storage, &ctx)?;
        debug!(records = records.len(), indexes, "graph.load_existing");
        Ok(())
    }

    fn abandon(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(engine) = &self.engine {
            engine.close();
        }
        self.release_bodies();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn storage(&self) -> &Arc<OverflowStorage> {
        &self.storage
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(GraphError::Closed);
        }
        Ok(())
    }

    fn ensure_live(&self, node: &NodeRef) -> Result<()> {
        self.ensure_open()?;
        if node.is_removed() || !self.registry.read().contains_key(&node.id()) {
            return Err(GraphError::NotFound(format!("node {}", node.id())));
        }
        Ok(())
    }

    /// Creates a node with the next free id.
    pub fn create_node(&self, label: &str, properties: &[(&str, Value)]) -> Result<NodeRef> {
        self.ensure_open()?;
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.insert_node(id, label, properties)
    }

    /// Creates a node with a caller-chosen id, which must be unused.
    pub fn create_node_with_id(
        &self,
        id: NodeId,
        label: &str,
        properties: &[(&str, Value)],
    ) -> Result<NodeRef> {
        self.ensure_open()?;
        if id < 0 {
            return Err(GraphError::invalid(format!("node id {id} is negative")));
        }
        let node = self.insert_node(id, label, properties)?;
        self.next_id.fetch_max(id + 1, Ordering::AcqRel);
        Ok(node)
    }

    fn insert_node(&self, id: NodeId, label: &str, properties: &[(&str, Value)]) -> Result<NodeRef> {
        let layout = self.schema.node_layout(label)?;
        let mut body = NodeBody::new(Arc::clone(layout));
        for (key, value) in properties {
            body.set_property(self.storage.interner().intern(key), value.clone());
        }
        let node = NodeRef::hydrated(id, Arc::clone(layout.label()), body);
        {
            let mut registry = self.registry.write();
            if registry.contains_key(&id) {
                return Err(GraphError::invalid(format!("node id {id} is already in use")));
            }
            registry.insert(id, node.clone());
        }
        for (key, value) in properties {
            self.indexes.put_if_indexed(key, value, &node);
        }
        trace!(id, label, "graph.node.create");
        self.after_create(&node);
        Ok(node)
    }

    fn after_create(&self, node: &NodeRef) {
        let Some(engine) = &self.engine else {
            return;
        };
        engine.register(node);
        let over_limit = self
            .config
            .max_eviction_candidates
            .is_some_and(|limit| engine.pending_count() > limit);
        let under_pressure = self
            .monitor
            .as_ref()
            .is_some_and(MemoryMonitor::on_creation);
        if over_limit || under_pressure {
            engine.request_eviction(self.config.eviction_batch_size);
        }
        engine.apply_backpressure_maybe();
    }

    pub fn node(&self, id: NodeId) -> Option<NodeRef> {
        self.registry.read().get(&id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.registry.read().len()
    }

    /// All nodes, ordered by id.
    pub fn nodes(&self) -> Vec<NodeRef> {
        let mut nodes: Vec<NodeRef> = self.registry.read().values().cloned().collect();
        nodes.sort_by_key(NodeRef::id);
        nodes
    }

    /// Nodes with the given label, ordered by id.
    pub fn nodes_with_label(&self, label: &str) -> Vec<NodeRef> {
        let mut nodes: Vec<NodeRef> = self
            .registry
            .read()
            .values()
            .filter(|node| node.label().as_ref() == label)
            .cloned()
            .collect();
        nodes.sort_by_key(NodeRef::id);
        nodes
    }

    /// Number of nodes whose body is currently resident.
    pub fn hydrated_count(&self) -> usize {
        self.nodes().iter().filter(|node| node.is_hydrated()).count()
    }

    pub fn property(&self, node: &NodeRef, key: &str) -> Result<Option<Value>> {
        self.ensure_live(node)?;
        Ok(node.body(self)?.property(key).cloned())
    }

    pub fn properties(&self, node: &NodeRef) -> Result<BTreeMap<Arc<str>, Value>> {
        self.ensure_live(node)?;
        Ok(node.body(self)?.properties().clone())
    }

    /// Sets a property and returns the previous value. `Value::Null` removes it.
    pub fn set_property(
        &self,
        node: &NodeRef,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        self.ensure_live(node)?;
        let value = value.into();
        let key = self.storage.interner().intern(key);
        let old = node.body(self)?.set_property(Arc::clone(&key), value.clone());
        self.indexes.update(&key, old.as_ref(), Some(&value), node);
        Ok(old)
    }

    pub fn remove_property(&self, node: &NodeRef, key: &str) -> Result<Option<Value>> {
        self.ensure_live(node)?;
        let old = node.body(self)?.remove_property(key);
        if let Some(old) = &old {
            self.indexes.remove(key, old, node);
        }
        Ok(old)
    }

    /// Adds an edge `out -[label]-> in_node`, recorded on both endpoints.
    pub fn add_edge(
        &self,
        out: &NodeRef,
        label: &str,
        in_node: &NodeRef,
        properties: &[(&str, Value)],
    ) -> Result<()> {
        self.ensure_live(out)?;
        self.ensure_live(in_node)?;
        self.check_edge(out, label, in_node, properties)?;
        out.body(self)?
            .store_adjacent(Direction::Out, label, in_node.clone(), properties)?;
        in_node
            .body(self)?
            .store_adjacent(Direction::In, label, out.clone(), properties)?;
        trace!(out = out.id(), label, in_node = in_node.id(), "graph.edge.add");
        Ok(())
    }

    fn check_edge(
        &self,
        out: &NodeRef,
        label: &str,
        in_node: &NodeRef,
        properties: &[(&str, Value)],
    ) -> Result<()> {
        for (node, direction) in [(out, Direction::Out), (in_node, Direction::In)] {
            let layout = self.schema.node_layout(node.label())?;
            if layout.edge_kind(direction, label).is_none() {
                return Err(GraphError::invalid(format!(
                    "{} edge {label} is not allowed on {}",
                    direction.as_str(),
                    layout.label()
                )));
            }
        }
        let edge = self
            .schema
            .edge_layout(label)
            .ok_or_else(|| GraphError::invalid(format!("unknown edge label {label}")))?;
        for (key, _) in properties {
            if edge.property_offset(key).is_none() {
                return Err(GraphError::invalid(format!("edge {label} has no property {key}")));
            }
        }
        Ok(())
    }

    /// Removes one `out -[label]-> in_node` edge. Returns false when there
    /// was none.
    pub fn remove_edge(&self, out: &NodeRef, label: &str, in_node: &NodeRef) -> Result<bool> {
        self.ensure_live(out)?;
        self.ensure_live(in_node)?;
        let removed = out
            .body(self)?
            .remove_adjacent(Direction::Out, label, in_node.id());
        if removed {
            in_node
                .body(self)?
                .remove_adjacent(Direction::In, label, out.id());
        }
        Ok(removed)
    }

    pub fn adjacent(&self, node: &NodeRef, direction: Direction, label: &str) -> Result<Vec<NodeRef>> {
        self.ensure_live(node)?;
        Ok(node.body(self)?.adjacent(direction, label))
    }

    pub fn out(&self, node: &NodeRef, label: &str) -> Result<Vec<NodeRef>> {
        self.adjacent(node, Direction::Out, label)
    }

    pub fn in_(&self, node: &NodeRef, label: &str) -> Result<Vec<NodeRef>> {
        self.adjacent(node, Direction::In, label)
    }

    pub fn adjacent_edges(
        &self,
        node: &NodeRef,
        direction: Direction,
        label: &str,
    ) -> Result<Vec<AdjacentEdge>> {
        self.ensure_live(node)?;
        Ok(node.body(self)?.adjacent_edges(direction, label))
    }

    pub fn degree(&self, node: &NodeRef, direction: Direction, label: &str) -> Result<usize> {
        self.ensure_live(node)?;
        Ok(node.body(self)?.degree(direction, label))
    }

    /// Removes a node with its incident edges, index entries and stored
    /// record.
    pub fn remove_node(&self, node: &NodeRef) -> Result<()> {
        self.ensure_live(node)?;
        let (neighbors, properties) = {
            let body = node.body(self)?;
            let mut seen = FxHashSet::default();
            let mut neighbors = Vec::new();
            for (direction, _, edge) in body.layout().kinds() {
                for neighbor in body.adjacent(direction, edge.label()) {
                    if neighbor != *node && seen.insert(neighbor.id()) {
                        neighbors.push(neighbor);
                    }
                }
            }
            (neighbors, body.properties().clone())
        };

        for neighbor in neighbors.iter().filter(|neighbor| !neighbor.is_removed()) {
            neighbor.body(self)?.remove_all_adjacent(node.id());
        }
        self.indexes.remove_node(node, &properties);

        node.mark_removed();
        if let Some(mut body) = node.take_body() {
            body.clear();
        }
        self.registry.write().remove(&node.id());
        self.writer.remove(node.id())?;
        debug!(id = node.id(), neighbors = neighbors.len(), "graph.node.remove");
        Ok(())
    }

    /// Indexes `key` over all current nodes. Returns false when it already
    /// was indexed.
    pub fn create_index(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        self.indexes.create_index(key, || {
            let mut entries = Vec::new();
            for node in self.nodes() {
                let value = node.body(self)?.property(key).cloned();
                if let Some(value) = value {
                    entries.push((node, value));
                }
            }
            Ok(entries)
        })
    }

    pub fn drop_index(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.indexes.drop_index(key))
    }

    pub fn is_indexed(&self, key: &str) -> bool {
        self.indexes.is_indexed(key)
    }

    pub fn indexed_properties(&self) -> Vec<Arc<str>> {
        self.indexes.indexed_properties()
    }

    pub fn indexed_node_count(&self, key: &str) -> usize {
        self.indexes.indexed_node_count(key)
    }

    /// Indexed lookup; keys without an index yield nothing.
    pub fn lookup(&self, key: &str, value: &Value) -> Vec<NodeRef> {
        self.indexes.lookup(key, value)
    }

    /// Nodes whose `key` equals `value`, through the index when there is one
    /// and by scanning every node otherwise.
    pub fn find(&self, key: &str, value: &Value) -> Result<Vec<NodeRef>> {
        self.ensure_open()?;
        if self.indexes.is_indexed(key) {
            return Ok(self.indexes.lookup(key, value));
        }
        let mut found = Vec::new();
        for node in self.nodes() {
            if node.body(self)?.property(key) == Some(value) {
                found.push(node);
            }
        }
        Ok(found)
    }

    /// Asks the eviction worker to write and drop up to `batch_size` bodies.
    /// Never blocks. Returns false when overflow is disabled or no batch was
    /// handed over.
    pub fn request_eviction(&self, batch_size: usize) -> bool {
        self.engine
            .as_ref()
            .is_some_and(|engine| engine.request_eviction(batch_size))
    }

    /// Blocks while an eviction batch is in flight.
    pub fn apply_backpressure_maybe(&self) {
        if let Some(engine) = &self.engine {
            engine.apply_backpressure_maybe();
        }
    }

    pub fn eviction_metrics(&self) -> Option<EvictionMetricsSnapshot> {
        self.engine.as_ref().map(EvictionEngine::metrics)
    }

    /// Writes every dirty resident body to storage, keeping it resident.
    pub fn flush_all(&self) -> Result<usize> {
        self.ensure_open()?;
        self.write_all()
    }

    fn write_all(&self) -> Result<usize> {
        let nodes = self.nodes();
        match &self.engine {
            Some(engine) => engine.flush_all(&nodes),
            None => {
                let outcome = self.writer.write(&nodes, false)?;
                match outcome.failed.into_iter().next() {
                    Some((_, err)) => Err(err),
                    None => Ok(outcome.written),
                }
            }
        }
    }

    /// Persists all nodes and changed indexes and makes them durable.
    pub fn save(&self) -> Result<()> {
        self.ensure_open()?;
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let written = self.write_all()?;
        let indexes = self.indexes.save(&self.storage)?;
        self.storage.flush()?;
        info!(written, indexes, "graph.save");
        Ok(())
    }

    /// Stops eviction, saves unless the storage is temporary and closes the
    /// storage. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(engine) = &self.engine {
            engine.close();
        }
        let saved = if self.storage.is_temporary() {
            Ok(())
        } else {
            self.persist()
        };
        self.release_bodies();
        let closed = self.storage.close();
        info!(temporary = self.storage.is_temporary(), "graph.close");
        saved.and(closed)
    }

    /// Drops every resident body so handles referring to each other are
    /// released.
    fn release_bodies(&self) {
        let nodes: Vec<NodeRef> = self.registry.write().drain().map(|(_, node)| node).collect();
        for node in nodes {
            if let Some(mut body) = node.take_body() {
                body.clear();
            }
        }
    }

    pub fn codec_stats(&self) -> Result<CodecStatsReport> {
        Ok(CodecStatsReport {
            serialization: self.codec.serialization_stats().snapshot()?,
            deserialization: self.codec.deserialization_stats().snapshot()?,
        })
    }

    pub fn dict_metrics(&self) -> DictMetricsSnapshot {
        self.storage.dict_metrics()
    }
}

impl BodyLoader for Graph {
    fn load(&self, node: &NodeRef) -> Result<NodeBody> {
        if node.is_removed() {
            return Err(GraphError::NotFound(format!("node {}", node.id())));
        }
        let bytes = self.storage.get_record(node.id())?.ok_or_else(|| {
            GraphError::corruption(format!("no stored record for node {}", node.id()))
        })?;
        let decoded = self.codec.deserialize(&bytes, self)?;
        if decoded.id != node.id() || decoded.label != *node.label() {
            return Err(GraphError::corruption(format!(
                "record of node {} holds node {} ({})",
                node.id(),
                decoded.id,
                decoded.label
            )));
        }
        if let Some(engine) = &self.engine {
            engine.register(node);
        }
        trace!(id = node.id(), len = bytes.len(), "graph.node.hydrate");
        Ok(decoded.body)
    }
}

impl NodeResolver for Graph {
    fn resolve(&self, id: NodeId) -> Result<NodeRef> {
        self.node(id)
            .ok_or_else(|| GraphError::corruption(format!("reference to unknown node {id}")))
    }

    fn resolve_value(&self, id: NodeId) -> Result<Option<NodeRef>> {
        Ok(self.node(id))
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "graph.drop.close_failed");
        }
    }
}
