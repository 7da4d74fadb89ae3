//! Inline adjacency storage.
//!
//! All adjacent nodes of one node live in a single flat `values` array. Each
//! (direction, edge label) kind owns one contiguous block of it, addressed by
//! an interleaved `(start, length)` pair in the offsets table. A block is a run
//! of fixed-stride tuples: the adjacent node followed by one slot per declared
//! edge property.
//!
//! Offsets start out one byte wide and are promoted to two and then four bytes
//! as soon as a stored start or length no longer fits. Promotion never
//! reverts.

use std::ops::Range;

use crate::model::{NodeId, Value};
use crate::node::NodeRef;

/// Adaptive-width offsets table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offsets {
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
}

impl Offsets {
    /// Zeroed byte-wide table with `slots` entries.
    pub fn new(slots: usize) -> Self {
        Offsets::Byte(vec![0; slots])
    }

    pub fn get(&self, pos: usize) -> i32 {
        match self {
            Offsets::Byte(v) => i32::from(v[pos]),
            Offsets::Short(v) => i32::from(v[pos]),
            Offsets::Int(v) => v[pos],
        }
    }

    /// Stores `val` at `pos`, promoting to the narrowest width that holds both
    /// the existing entries and `val`. The returned table replaces `self`.
    #[must_use]
    pub fn set(self, pos: usize, val: i32) -> Self {
        match self {
            Offsets::Byte(mut v) => {
                if let Ok(narrow) = i8::try_from(val) {
                    v[pos] = narrow;
                    Offsets::Byte(v)
                } else if let Ok(narrow) = i16::try_from(val) {
                    let mut wide: Vec<i16> = v.into_iter().map(i16::from).collect();
                    wide[pos] = narrow;
                    Offsets::Short(wide)
                } else {
                    let mut wide: Vec<i32> = v.into_iter().map(i32::from).collect();
                    wide[pos] = val;
                    Offsets::Int(wide)
                }
            }
            Offsets::Short(mut v) => {
                if let Ok(narrow) = i16::try_from(val) {
                    v[pos] = narrow;
                    Offsets::Short(v)
                } else {
                    let mut wide: Vec<i32> = v.into_iter().map(i32::from).collect();
                    wide[pos] = val;
                    Offsets::Int(wide)
                }
            }
            Offsets::Int(mut v) => {
                v[pos] = val;
                Offsets::Int(v)
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Offsets::Byte(v) => v.len(),
            Offsets::Short(v) => v.len(),
            Offsets::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes per stored entry: 1, 2 or 4.
    pub fn width(&self) -> usize {
        match self {
            Offsets::Byte(_) => 1,
            Offsets::Short(_) => 2,
            Offsets::Int(_) => 4,
        }
    }
}

/// Adjacent nodes and edge properties of one node, across all edge kinds.
#[derive(Debug, Clone)]
pub struct AdjacentNodes {
    values: Vec<Option<Value>>,
    offsets: Offsets,
}

impl AdjacentNodes {
    /// Empty container for a node with `kind_count` distinct edge kinds.
    pub fn new(kind_count: usize) -> Self {
        Self {
            values: Vec::new(),
            offsets: Offsets::new(kind_count * 2),
        }
    }

    pub fn from_parts(values: Vec<Option<Value>>, offsets: Offsets) -> Self {
        Self { values, offsets }
    }

    /// Raw offset at `pos`: `2k` is the start of kind `k`, `2k + 1` its length.
    pub fn get_offset(&self, pos: usize) -> i32 {
        self.offsets.get(pos)
    }

    /// Stores an offset. Callers must keep the returned container; the offsets
    /// table may have been reallocated at a wider width.
    #[must_use]
    pub fn set_offset(self, pos: usize, val: i32) -> Self {
        Self {
            values: self.values,
            offsets: self.offsets.set(pos, val),
        }
    }

    /// Number of logical offset slots, two per edge kind.
    pub fn offset_lengths(&self) -> usize {
        self.offsets.len()
    }

    pub fn offset_width(&self) -> usize {
        self.offsets.width()
    }

    pub fn offsets(&self) -> &Offsets {
        &self.offsets
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    /// Slot range of kind `kind` in `values`, tombstones included.
    pub fn block(&self, kind: usize) -> Range<usize> {
        let start = self.get_offset(2 * kind) as usize;
        let len = self.get_offset(2 * kind + 1) as usize;
        start..start + len
    }

    /// Appends `adjacent` to the block of `kind`, with `edge_properties` given
    /// as `(offset within stride, value)` pairs.
    ///
    /// The first adjacency of a kind opens its block at the end of `values`.
    /// Later insertions grow the block in place and shift every block stored
    /// behind it.
    #[must_use]
    pub fn insert(
        mut self,
        kind: usize,
        stride: usize,
        adjacent: NodeRef,
        edge_properties: &[(usize, Value)],
    ) -> Self {
        let block = self.block(kind);
        let mut tuple: Vec<Option<Value>> = vec![None; stride];
        tuple[0] = Some(Value::Node(adjacent));
        for (offset, value) in edge_properties {
            if !value.is_null() {
                tuple[*offset] = Some(value.clone());
            }
        }

        if block.is_empty() {
            let start = self.values.len() as i32;
            self.values.extend(tuple);
            return self
                .set_offset(2 * kind, start)
                .set_offset(2 * kind + 1, stride as i32);
        }

        let insert_at = block.end;
        self.values.splice(insert_at..insert_at, tuple);

        let mut updated = self;
        for other in 0..updated.offset_lengths() / 2 {
            if other == kind {
                continue;
            }
            let start = updated.get_offset(2 * other);
            let len = updated.get_offset(2 * other + 1);
            if len > 0 && start as usize >= insert_at {
                updated = updated.set_offset(2 * other, start + stride as i32);
            }
        }
        let len = block.len() + stride;
        updated.set_offset(2 * kind + 1, len as i32)
    }

    /// Adjacent nodes of `kind` in insertion order as `(slot, node)`, skipping
    /// tombstones.
    pub fn adjacent(&self, kind: usize, stride: usize) -> impl Iterator<Item = (usize, &NodeRef)> + '_ {
        self.block(kind).step_by(stride.max(1)).filter_map(move |slot| {
            match &self.values[slot] {
                Some(Value::Node(node)) => Some((slot, node)),
                _ => None,
            }
        })
    }

    /// Live adjacencies of `kind`.
    pub fn degree(&self, kind: usize, stride: usize) -> usize {
        self.adjacent(kind, stride).count()
    }

    /// Edge property stored at `offset` behind the adjacency at `slot`.
    pub fn edge_property(&self, slot: usize, offset: usize) -> Option<&Value> {
        self.values.get(slot + offset).and_then(Option::as_ref)
    }

    pub fn set_edge_property(&mut self, slot: usize, offset: usize, value: Option<Value>) {
        self.values[slot + offset] = value.filter(|v| !v.is_null());
    }

    /// Tombstones the first live adjacency to `adjacent_id` in `kind`, along
    /// with its edge properties. Returns whether an adjacency was removed.
    pub fn remove(&mut self, kind: usize, stride: usize, adjacent_id: NodeId) -> bool {
        let slot = self
            .adjacent(kind, stride)
            .find(|(_, node)| node.id() == adjacent_id)
            .map(|(slot, _)| slot);
        match slot {
            Some(slot) => {
                for value in &mut self.values[slot..slot + stride] {
                    *value = None;
                }
                true
            }
            None => false,
        }
    }

    /// Tombstones every adjacency to `adjacent_id` in any kind. `stride_of`
    /// maps a kind to its stride.
    pub fn remove_all(&mut self, adjacent_id: NodeId, stride_of: impl Fn(usize) -> usize) -> usize {
        let mut removed = 0;
        for kind in 0..self.offset_lengths() / 2 {
            let stride = stride_of(kind);
            while self.remove(kind, stride, adjacent_id) {
                removed += 1;
            }
        }
        removed
    }

    /// Drops every stored value. Used to break reference cycles on shutdown.
    pub(crate) fn clear_values(&mut self) {
        self.values.clear();
    }
}
