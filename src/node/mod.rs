//! Node handles and hydrated node bodies.
//!
//! A [`NodeRef`] is created once per node id and lives as long as the graph.
//! Its body is either resident ([`NodeBody`]) or evicted, in which case the
//! next access reloads it from storage through a [`BodyLoader`].

pub mod adjacency;

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::{GraphError, Result};
use crate::model::{Direction, NodeId, Value};
use crate::schema::NodeLayout;

use self::adjacency::AdjacentNodes;

/// Loads the stored body of an evicted node.
pub trait BodyLoader {
    fn load(&self, node: &NodeRef) -> Result<NodeBody>;
}

struct RefInner {
    id: NodeId,
    label: Arc<str>,
    body: Mutex<Option<NodeBody>>,
    queued: AtomicBool,
    removed: AtomicBool,
}

/// Stable handle to a node, valid whether or not its body is resident.
#[derive(Clone)]
pub struct NodeRef(Arc<RefInner>);

impl NodeRef {
    /// Handle without a resident body.
    pub fn evicted(id: NodeId, label: Arc<str>) -> Self {
        Self::with_body(id, label, None)
    }

    pub fn hydrated(id: NodeId, label: Arc<str>, body: NodeBody) -> Self {
        Self::with_body(id, label, Some(body))
    }

    fn with_body(id: NodeId, label: Arc<str>, body: Option<NodeBody>) -> Self {
        Self(Arc::new(RefInner {
            id,
            label,
            body: Mutex::new(body),
            queued: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn label(&self) -> &Arc<str> {
        &self.0.label
    }

    pub fn is_hydrated(&self) -> bool {
        self.0.body.lock().is_some()
    }

    /// Whether a resident body has changes not yet written to storage.
    pub fn is_dirty(&self) -> bool {
        self.0.body.lock().as_ref().is_some_and(NodeBody::is_dirty)
    }

    pub fn is_removed(&self) -> bool {
        self.0.removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.0.removed.store(true, Ordering::Release);
    }

    /// Locks the body, loading it first if evicted.
    pub fn body<'a>(&'a self, loader: &dyn BodyLoader) -> Result<MappedMutexGuard<'a, NodeBody>> {
        let mut slot = self.0.body.lock();
        if slot.is_none() {
            *slot = Some(loader.load(self)?);
        }
        MutexGuard::try_map(slot, Option::as_mut)
            .map_err(|_| GraphError::corruption(format!("node {} lost its body", self.id())))
    }

    /// Locks the body slot without loading.
    pub(crate) fn slot(&self) -> MutexGuard<'_, Option<NodeBody>> {
        self.0.body.lock()
    }

    /// Drops the resident body, if any.
    pub(crate) fn take_body(&self) -> Option<NodeBody> {
        self.0.body.lock().take()
    }

    /// Marks the handle as queued for eviction; false if it already was.
    pub(crate) fn try_queue(&self) -> bool {
        self.0
            .queued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn clear_queued(&self) {
        self.0.queued.store(false, Ordering::Release);
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for NodeRef {}

impl Hash for NodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("id", &self.0.id)
            .field("label", &self.0.label)
            .finish()
    }
}

/// Adjacency of one node to another, with its edge properties.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjacentEdge {
    pub node: NodeRef,
    pub properties: Vec<(Arc<str>, Value)>,
}

/// Resident state of a node: properties, adjacency and a dirty flag.
#[derive(Debug, Clone)]
pub struct NodeBody {
    layout: Arc<NodeLayout>,
    properties: BTreeMap<Arc<str>, Value>,
    adjacency: AdjacentNodes,
    dirty: bool,
}

impl NodeBody {
    /// Empty body shaped by `layout`. New bodies start dirty.
    pub fn new(layout: Arc<NodeLayout>) -> Self {
        let adjacency = AdjacentNodes::new(layout.kind_count());
        Self {
            layout,
            properties: BTreeMap::new(),
            adjacency,
            dirty: true,
        }
    }

    pub fn layout(&self) -> &Arc<NodeLayout> {
        &self.layout
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn properties(&self) -> &BTreeMap<Arc<str>, Value> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Sets a property and returns the previous value. Setting `Null` removes
    /// the key.
    pub fn set_property(&mut self, key: Arc<str>, value: Value) -> Option<Value> {
        self.dirty = true;
        if value.is_null() {
            self.properties.remove(&key)
        } else {
            self.properties.insert(key, value)
        }
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        let old = self.properties.remove(key);
        if old.is_some() {
            self.dirty = true;
        }
        old
    }

    pub fn adjacency(&self) -> &AdjacentNodes {
        &self.adjacency
    }

    /// Records an adjacency to `node` under edge `label` in `direction`.
    pub fn store_adjacent<K: AsRef<str>>(
        &mut self,
        direction: Direction,
        label: &str,
        node: NodeRef,
        edge_properties: &[(K, Value)],
    ) -> Result<()> {
        let (kind, edge) = self.layout.edge_kind(direction, label).ok_or_else(|| {
            GraphError::invalid(format!(
                "{} edge {label} is not allowed on {}",
                direction.as_str(),
                self.layout.label()
            ))
        })?;
        let mut slots = Vec::with_capacity(edge_properties.len());
        for (key, value) in edge_properties {
            let key = key.as_ref();
            let offset = edge.property_offset(key).ok_or_else(|| {
                GraphError::invalid(format!("edge {label} has no property {key}"))
            })?;
            slots.push((offset, value.clone()));
        }
        let stride = edge.stride();
        let adjacency = std::mem::replace(&mut self.adjacency, AdjacentNodes::new(0));
        self.adjacency = adjacency.insert(kind, stride, node, &slots);
        self.dirty = true;
        Ok(())
    }

    /// Tombstones the first adjacency to `adjacent_id`.
    pub fn remove_adjacent(&mut self, direction: Direction, label: &str, adjacent_id: NodeId) -> bool {
        let Some((kind, edge)) = self.layout.edge_kind(direction, label) else {
            return false;
        };
        let stride = edge.stride();
        let removed = self.adjacency.remove(kind, stride, adjacent_id);
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Tombstones every adjacency to `adjacent_id`.
    pub fn remove_all_adjacent(&mut self, adjacent_id: NodeId) -> usize {
        let strides: Vec<usize> = self.layout.kinds().map(|(_, _, edge)| edge.stride()).collect();
        let removed = self.adjacency.remove_all(adjacent_id, |kind| strides[kind]);
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Adjacent nodes under `label` in insertion order. Labels the layout does
    /// not declare have no adjacency.
    pub fn adjacent(&self, direction: Direction, label: &str) -> Vec<NodeRef> {
        match self.layout.edge_kind(direction, label) {
            Some((kind, edge)) => self
                .adjacency
                .adjacent(kind, edge.stride())
                .map(|(_, node)| node.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Adjacencies under `label` with their non-null edge properties.
    pub fn adjacent_edges(&self, direction: Direction, label: &str) -> Vec<AdjacentEdge> {
        let Some((kind, edge)) = self.layout.edge_kind(direction, label) else {
            return Vec::new();
        };
        self.adjacency
            .adjacent(kind, edge.stride())
            .map(|(slot, node)| AdjacentEdge {
                node: node.clone(),
                properties: edge
                    .properties()
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, key)| {
                        self.adjacency
                            .edge_property(slot, idx + 1)
                            .map(|value| (Arc::clone(key), value.clone()))
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn degree(&self, direction: Direction, label: &str) -> usize {
        self.layout
            .edge_kind(direction, label)
            .map(|(kind, edge)| self.adjacency.degree(kind, edge.stride()))
            .unwrap_or(0)
    }

    /// Releases every held value, including handles to other nodes.
    pub(crate) fn clear(&mut self) {
        self.properties.clear();
        self.adjacency.clear_values();
    }
}
