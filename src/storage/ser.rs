//! Node record serialization.
//!
//! Record layout, all integers little-endian:
//!
//! ```text
//! node id            i64
//! label id           i32   (string dictionary)
//! property count     i32
//!   key id           i32, tagged value
//! OUT edge kinds     i32
//!   edge label id    i32
//!   edge count       i32
//!     adjacent id    i64
//!     property count i32
//!       key id       i32, tagged value
//! IN edge kinds      (same shape as OUT)
//! ```
//!
//! Only edge kinds with live adjacencies and only non-null properties are
//! written, so tombstones disappear on every rewrite.

use std::sync::Arc;

use tracing::trace;

use crate::error::{GraphError, Result};
use crate::model::{Direction, NodeId, PropertyConverter, Value};
use crate::node::NodeBody;
use crate::schema::Schema;
use crate::storage::stats::CodecStats;
use crate::storage::value_codec::{
    decode_value, encode_value, write_count, Cursor, DecodeContext, NodeResolver,
};
use crate::storage::OverflowStorage;

/// Identity of a stored node, decoded without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRef {
    pub id: NodeId,
    pub label: Arc<str>,
}

/// Fully decoded node record.
#[derive(Debug)]
pub struct DecodedNode {
    pub id: NodeId,
    pub label: Arc<str>,
    pub body: NodeBody,
}

/// Converts node bodies to records and back, compacting labels and keys
/// through the storage dictionary.
pub struct NodeCodec {
    storage: Arc<OverflowStorage>,
    schema: Arc<Schema>,
    converter: Option<PropertyConverter>,
    serialization: CodecStats,
    deserialization: CodecStats,
}

impl NodeCodec {
    pub fn new(
        storage: Arc<OverflowStorage>,
        schema: Arc<Schema>,
        converter: Option<PropertyConverter>,
        stats_enabled: bool,
    ) -> Self {
        Self {
            storage,
            schema,
            converter,
            serialization: CodecStats::new("serialization", stats_enabled),
            deserialization: CodecStats::new("deserialization", stats_enabled),
        }
    }

    pub fn storage(&self) -> &Arc<OverflowStorage> {
        &self.storage
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn serialization_stats(&self) -> &CodecStats {
        &self.serialization
    }

    pub fn deserialization_stats(&self) -> &CodecStats {
        &self.deserialization
    }

    /// Encodes `body` and marks it clean. On error the body is left untouched.
    pub fn serialize(&self, id: NodeId, body: &mut NodeBody) -> Result<Vec<u8>> {
        let bytes = self.encode(id, body)?;
        body.mark_clean();
        Ok(bytes)
    }

    /// Encodes `body` without touching its dirty flag.
    pub fn encode(&self, id: NodeId, body: &NodeBody) -> Result<Vec<u8>> {
        let started = self.serialization.start();
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&id.to_le_bytes());
        let layout = body.layout();
        let label_id = self.storage.lookup_or_create_string_id(layout.label())?;
        buf.extend_from_slice(&label_id.to_le_bytes());

        write_count(&mut buf, body.properties().len())?;
        for (key, value) in body.properties() {
            self.write_property(&mut buf, key, value)?;
        }

        for direction in [Direction::Out, Direction::In] {
            let kinds: Vec<_> = layout
                .edges(direction)
                .iter()
                .filter(|edge| body.degree(direction, edge.label()) > 0)
                .collect();
            write_count(&mut buf, kinds.len())?;
            for edge in kinds {
                let edges = body.adjacent_edges(direction, edge.label());
                let label_id = self.storage.lookup_or_create_string_id(edge.label())?;
                buf.extend_from_slice(&label_id.to_le_bytes());
                write_count(&mut buf, edges.len())?;
                for adjacent in &edges {
                    buf.extend_from_slice(&adjacent.node.id().to_le_bytes());
                    write_count(&mut buf, adjacent.properties.len())?;
                    for (key, value) in &adjacent.properties {
                        self.write_property(&mut buf, key, value)?;
                    }
                }
            }
        }

        self.serialization.record(started);
        trace!(id, len = buf.len(), "codec.serialize");
        Ok(buf)
    }

    fn write_property(&self, buf: &mut Vec<u8>, key: &str, value: &Value) -> Result<()> {
        let key_id = self.storage.lookup_or_create_string_id(key)?;
        buf.extend_from_slice(&key_id.to_le_bytes());
        encode_value(buf, value, self.converter.as_ref())
    }

    /// Decodes a full record. Adjacent node ids are turned into handles by
    /// `resolver`. The returned body is clean.
    pub fn deserialize(&self, bytes: &[u8], resolver: &dyn NodeResolver) -> Result<DecodedNode> {
        let started = self.deserialization.start();
        let ctx = DecodeContext {
            interner: self.storage.interner(),
            resolver,
        };
        let mut cursor = Cursor::new(bytes);
        let id = cursor.read_i64()?;
        let label = self.read_string_id(&mut cursor)?;
        let layout = self.schema.node_layout(&label)?;
        let mut body = NodeBody::new(Arc::clone(layout));

        for (key, value) in self.read_properties(&mut cursor, &ctx)? {
            body.set_property(key, value);
        }

        for direction in [Direction::Out, Direction::In] {
            let kind_count = cursor.read_count()?;
            for _ in 0..kind_count {
                let edge_label = self.read_string_id(&mut cursor)?;
                let edge_count = cursor.read_count()?;
                for _ in 0..edge_count {
                    let adjacent = resolver.resolve(cursor.read_i64()?)?;
                    let properties = self.read_properties(&mut cursor, &ctx)?;
                    body.store_adjacent(direction, &edge_label, adjacent, &properties)
                        .map_err(|err| match err {
                            GraphError::InvalidArgument(msg) => GraphError::corruption(format!(
                                "node {id} record does not match its layout: {msg}"
                            )),
                            other => other,
                        })?;
                }
            }
        }
        cursor.ensure_consumed()?;
        body.mark_clean();

        self.deserialization.record(started);
        trace!(id, len = bytes.len(), "codec.deserialize");
        Ok(DecodedNode { id, label, body })
    }

    /// Decodes only the id and label, for rebuilding handles at startup.
    pub fn deserialize_ref(&self, bytes: &[u8]) -> Result<DecodedRef> {
        let mut cursor = Cursor::new(bytes);
        let id = cursor.read_i64()?;
        let label = self.read_string_id(&mut cursor)?;
        self.schema.node_layout(&label)?;
        Ok(DecodedRef { id, label })
    }

    fn read_string_id(&self, cursor: &mut Cursor<'_>) -> Result<Arc<str>> {
        let id = cursor.read_i32()?;
        self.storage
            .resolve_string_id(id)
            .ok_or_else(|| GraphError::corruption(format!("unknown string id {id}")))
    }

    fn read_properties(
        &self,
        cursor: &mut Cursor<'_>,
        ctx: &DecodeContext<'_>,
    ) -> Result<Vec<(Arc<str>, Value)>> {
        let count = cursor.read_count()?;
        let mut properties = Vec::with_capacity(count.min(cursor.remaining()));
        for _ in 0..count {
            let key = self.read_string_id(cursor)?;
            let value = decode_value(cursor, ctx)?;
            if properties.iter().any(|(k, _): &(Arc<str>, Value)| *k == key) {
                return Err(GraphError::corruption(format!(
                    "duplicate property key {key} encountered"
                )));
            }
            if !value.is_null() {
                properties.push((key, value));
            }
        }
        Ok(properties)
    }
}
