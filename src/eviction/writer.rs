use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::error::{GraphError, Result};
use crate::model::NodeId;
use crate::node::NodeRef;
use crate::storage::NodeCodec;

/// Result of writing a set of handles to storage.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    /// Records written to storage.
    pub written: usize,
    /// Bodies dropped from memory.
    pub evicted: usize,
    /// Handles that were modified while being written and stayed resident.
    pub redirtied: Vec<NodeRef>,
    /// Handles whose body could not be serialized; they stay dirty.
    pub failed: Vec<(NodeRef, GraphError)>,
}

enum Prepared {
    Skipped,
    Clean(NodeRef),
    Serialized(NodeRef, Vec<u8>),
    Failed(NodeRef, GraphError),
}

/// Serializes dirty bodies in parallel and persists them in one batch.
///
/// All storage writes of node records go through one writer, so a batch
/// serialized earlier can never overwrite a newer record.
pub struct NodesWriter {
    codec: Arc<NodeCodec>,
    write_lock: Mutex<()>,
}

impl NodesWriter {
    pub fn new(codec: Arc<NodeCodec>) -> Self {
        Self {
            codec,
            write_lock: Mutex::new(()),
        }
    }

    pub fn codec(&self) -> &Arc<NodeCodec> {
        &self.codec
    }

    /// Writes every dirty body among `nodes`. With `clear`, bodies that are
    /// still clean once the batch is stored are dropped from memory.
    ///
    /// Serialization failures are reported per node in the outcome; a failed
    /// storage write re-dirties everything serialized for it and is returned
    /// as an error.
    pub fn write(&self, nodes: &[NodeRef], clear: bool) -> Result<WriteOutcome> {
        let _guard = self.write_lock.lock();
        let prepared: Vec<Prepared> = nodes.par_iter().map(|node| self.prepare(node)).collect();

        let mut outcome = WriteOutcome::default();
        let mut records = Vec::new();
        let mut serialized = Vec::new();
        let mut clean = Vec::new();
        for item in prepared {
            match item {
                Prepared::Skipped => {}
                Prepared::Clean(node) => clean.push(node),
                Prepared::Serialized(node, bytes) => {
                    records.push((node.id(), bytes));
                    serialized.push(node);
                }
                Prepared::Failed(node, err) => {
                    warn!(id = node.id(), error = %err, "eviction.serialize.failed");
                    outcome.failed.push((node, err));
                }
            }
        }

        if let Err(err) = self.codec.storage().persist_batch(&records) {
            for node in &serialized {
                if let Some(body) = node.slot().as_mut() {
                    body.mark_dirty();
                }
            }
            return Err(err);
        }
        outcome.written = records.len();
        trace!(records = outcome.written, "eviction.write.persisted");

        if clear {
            for node in serialized.into_iter().chain(clean) {
                let mut slot = node.slot();
                match slot.as_ref() {
                    Some(body) if body.is_dirty() => {
                        drop(slot);
                        outcome.redirtied.push(node);
                    }
                    Some(_) => {
                        slot.take();
                        outcome.evicted += 1;
                    }
                    None => {}
                }
            }
        }
        debug!(
            written = outcome.written,
            evicted = outcome.evicted,
            redirtied = outcome.redirtied.len(),
            failed = outcome.failed.len(),
            "eviction.write.complete"
        );
        Ok(outcome)
    }

    /// Deletes the stored record of a removed node.
    pub fn remove(&self, id: NodeId) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.codec.storage().remove_record(id)
    }

    fn prepare(&self, node: &NodeRef) -> Prepared {
        if node.is_removed() {
            return Prepared::Skipped;
        }
        let mut slot = node.slot();
        let Some(body) = slot.as_mut() else {
            return Prepared::Skipped;
        };
        if !body.is_dirty() {
            drop(slot);
            return Prepared::Clean(node.clone());
        }
        match self.codec.serialize(node.id(), body) {
            Ok(bytes) => {
                drop(slot);
                Prepared::Serialized(node.clone(), bytes)
            }
            Err(err) => {
                drop(slot);
                Prepared::Failed(node.clone(), err)
            }
        }
    }
}
