//! Penumbra: an in-memory property graph that overflows node bodies to disk.
//!
//! Every node is reachable through a stable [`NodeRef`]. Its properties and
//! adjacency live in a [`NodeBody`] that the eviction engine writes to a
//! key-value store and drops under memory pressure; the next access loads it
//! back. Storage is SQLite by default and can be replaced through
//! [`storage::KvBackend`].

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod eviction;
pub mod graph;
pub mod index;
pub mod model;
pub mod node;
pub mod schema;
pub mod storage;

pub use config::Config;
pub use error::{GraphError, Result};
pub use eviction::{EvictionWorker, MemoryMonitor};
pub use graph::{CodecStatsReport, Graph};
pub use model::{CustomValue, Direction, NodeId, PropertyConverter, Value, ValueType};
pub use node::{AdjacentEdge, NodeBody, NodeRef};
pub use schema::{EdgeLayout, NodeLayout, Schema, SchemaBuilder};
pub use storage::{KvBackend, MemoryBackend, OverflowStorage, SqliteBackend};
