//! Label layout metadata.
//!
//! A node label declares which edge labels it may carry in each direction;
//! an edge label declares its property keys. Together they fix the shape of a
//! node's [`AdjacentNodes`](crate::node::adjacency::AdjacentNodes): one kind
//! per (direction, edge label), OUT kinds first, and a block stride of one
//! adjacency slot plus one slot per edge property.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{GraphError, Result};
use crate::model::Direction;

/// Property layout of one edge label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeLayout {
    label: Arc<str>,
    properties: Vec<Arc<str>>,
}

impl EdgeLayout {
    pub fn label(&self) -> &Arc<str> {
        &self.label
    }

    pub fn properties(&self) -> &[Arc<str>] {
        &self.properties
    }

    /// Slots occupied by a single adjacency in a block.
    pub fn stride(&self) -> usize {
        1 + self.properties.len()
    }

    /// Offset of `key` relative to the adjacency slot, if declared.
    pub fn property_offset(&self, key: &str) -> Option<usize> {
        self.properties
            .iter()
            .position(|p| p.as_ref() == key)
            .map(|idx| idx + 1)
    }
}

/// Adjacency layout of one node label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLayout {
    label: Arc<str>,
    out_edges: Vec<Arc<EdgeLayout>>,
    in_edges: Vec<Arc<EdgeLayout>>,
}

impl NodeLayout {
    pub fn label(&self) -> &Arc<str> {
        &self.label
    }

    /// Number of distinct (direction, edge label) kinds.
    pub fn kind_count(&self) -> usize {
        self.out_edges.len() + self.in_edges.len()
    }

    pub fn edges(&self, direction: Direction) -> &[Arc<EdgeLayout>] {
        match direction {
            Direction::Out => &self.out_edges,
            Direction::In => &self.in_edges,
        }
    }

    /// Kind offset of `label` in `direction`; offsets slots `2k` and `2k + 1`
    /// hold the block start and length.
    pub fn offset_position(&self, direction: Direction, label: &str) -> Option<usize> {
        let base = match direction {
            Direction::Out => 0,
            Direction::In => self.out_edges.len(),
        };
        self.edges(direction)
            .iter()
            .position(|edge| edge.label.as_ref() == label)
            .map(|idx| base + idx)
    }

    /// Edge layout and kind offset of `label` in `direction`.
    pub fn edge_kind(&self, direction: Direction, label: &str) -> Option<(usize, &Arc<EdgeLayout>)> {
        let kind = self.offset_position(direction, label)?;
        let edge = match direction {
            Direction::Out => &self.out_edges[kind],
            Direction::In => &self.in_edges[kind - self.out_edges.len()],
        };
        Some((kind, edge))
    }

    /// Iterates every kind as `(direction, kind offset, edge layout)`, OUT first.
    pub fn kinds(&self) -> impl Iterator<Item = (Direction, usize, &Arc<EdgeLayout>)> {
        let out_len = self.out_edges.len();
        self.out_edges
            .iter()
            .enumerate()
            .map(|(idx, edge)| (Direction::Out, idx, edge))
            .chain(
                self.in_edges
                    .iter()
                    .enumerate()
                    .map(move |(idx, edge)| (Direction::In, out_len + idx, edge)),
            )
    }
}

/// Registry of node and edge layouts, immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    nodes: FxHashMap<Arc<str>, Arc<NodeLayout>>,
    edges: FxHashMap<Arc<str>, Arc<EdgeLayout>>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Layout used to construct a node body for `label`.
    pub fn node_layout(&self, label: &str) -> Result<&Arc<NodeLayout>> {
        self.nodes
            .get(label)
            .ok_or_else(|| GraphError::MissingLabelFactory(label.to_owned()))
    }

    pub fn edge_layout(&self, label: &str) -> Option<&Arc<EdgeLayout>> {
        self.edges.get(label)
    }
}

/// Collects edge and node declarations and validates them on [`build`](Self::build).
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    edges: Vec<(String, Vec<String>)>,
    nodes: Vec<(String, Vec<String>, Vec<String>)>,
}

impl SchemaBuilder {
    /// Declares an edge label with its property keys.
    pub fn edge<I, S>(mut self, label: &str, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edges.push((
            label.to_owned(),
            properties.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Declares a node label with the edge labels it carries outgoing and incoming.
    pub fn node<O, I, S, T>(mut self, label: &str, out_edges: O, in_edges: I) -> Self
    where
        O: IntoIterator<Item = S>,
        I: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.nodes.push((
            label.to_owned(),
            out_edges.into_iter().map(Into::into).collect(),
            in_edges.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn build(self) -> Result<Schema> {
        let mut edges: FxHashMap<Arc<str>, Arc<EdgeLayout>> = FxHashMap::default();
        for (label, properties) in self.edges {
            if label.is_empty() {
                return Err(GraphError::invalid("edge labels must be non-empty"));
            }
            let mut seen = Vec::with_capacity(properties.len());
            for key in &properties {
                if key.is_empty() || seen.contains(&key) {
                    return Err(GraphError::invalid(format!(
                        "edge {label} declares an empty or duplicate property key"
                    )));
                }
                seen.push(key);
            }
            let layout = EdgeLayout {
                label: Arc::from(label.as_str()),
                properties: properties.iter().map(|p| Arc::from(p.as_str())).collect(),
            };
            if edges.insert(layout.label.clone(), Arc::new(layout)).is_some() {
                return Err(GraphError::invalid(format!(
                    "edge label {label} declared twice"
                )));
            }
        }

        let resolve = |node: &str, labels: &[String]| -> Result<Vec<Arc<EdgeLayout>>> {
            let mut out = Vec::with_capacity(labels.len());
            for label in labels {
                let edge = edges.get(label.as_str()).ok_or_else(|| {
                    GraphError::invalid(format!("node {node} references undeclared edge {label}"))
                })?;
                if out.iter().any(|e: &Arc<EdgeLayout>| e.label == edge.label) {
                    return Err(GraphError::invalid(format!(
                        "node {node} lists edge {label} twice in one direction"
                    )));
                }
                out.push(Arc::clone(edge));
            }
            Ok(out)
        };

        let mut nodes = FxHashMap::default();
        for (label, out_edges, in_edges) in &self.nodes {
            if label.is_empty() {
                return Err(GraphError::invalid("node labels must be non-empty"));
            }
            let layout = NodeLayout {
                label: Arc::from(label.as_str()),
                out_edges: resolve(label, out_edges)?,
                in_edges: resolve(label, in_edges)?,
            };
            if nodes.insert(layout.label.clone(), Arc::new(layout)).is_some() {
                return Err(GraphError::invalid(format!(
                    "node label {label} declared twice"
                )));
            }
        }

        Ok(Schema { nodes, edges })
    }
}
