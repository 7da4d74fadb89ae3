//! Persistent storage for evicted nodes.
//!
//! [`OverflowStorage`] fronts a [`KvBackend`] with everything the node codec,
//! the eviction engine and the property index share: the string dictionary,
//! the storage format marker, run bookkeeping and named index stores.

/// Key-value backend trait and the in-memory implementation.
pub mod backend;
/// Persistent string/id dictionary.
pub mod dict;
/// Weak interner for decoded strings.
pub mod interner;
/// Node record serialization.
pub mod ser;
/// SQLite backend.
pub mod sqlite;
/// Codec timing statistics.
pub mod stats;
/// Tagged property value encoding.
pub mod value_codec;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{GraphError, Result};
use crate::model::NodeId;

pub use backend::{KvBackend, MemoryBackend};
pub use dict::{DictMetrics, DictMetricsSnapshot, StringDictionary};
pub use interner::StringInterner;
pub use ser::{DecodedNode, DecodedRef, NodeCodec};
pub use sqlite::SqliteBackend;
pub use stats::{CodecStats, CodecStatsSnapshot};
pub use value_codec::{DecodeContext, NodeResolver};

/// Bumped whenever the record layout changes. Stores written with another
/// version are refused.
pub const STORAGE_FORMAT_VERSION: u32 = 1;

pub const METADATA_KEY_STORAGE_FORMAT_VERSION: &str = "STORAGE_FORMAT_VERSION";
pub const METADATA_KEY_STRING_TO_INT_MAX_ID: &str = "STRING_TO_INT_MAX_ID";
pub const METADATA_KEY_LIBRARY_VERSIONS_MAX_ID: &str = "LIBRARY_VERSIONS_MAX_ID";
pub const METADATA_PREFIX_LIBRARY_VERSIONS: &str = "LIBRARY_VERSIONS_ENTRY_";
const INDEX_PREFIX: &str = "index_";
const DB_FILE_NAME: &str = "graph.db";

enum Location {
    Persistent(PathBuf),
    Temporary {
        path: PathBuf,
        _dir: tempfile::TempDir,
    },
    Volatile,
}

/// Storage facade shared by the codec, the eviction engine and the index.
pub struct OverflowStorage {
    backend: Arc<dyn KvBackend>,
    dict: StringDictionary,
    interner: Arc<StringInterner>,
    run_id: Option<u32>,
    closed: AtomicBool,
    location: Location,
}

impl OverflowStorage {
    /// Opens (or creates) a SQLite store at `path`.
    pub fn open(path: impl AsRef<Path>, interner: Arc<StringInterner>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let backend = Arc::new(SqliteBackend::open(&path)?);
        Self::init(backend, interner, Location::Persistent(path), true)
    }

    /// Creates a SQLite store in a fresh temporary directory, removed on drop.
    pub fn temporary(interner: Arc<StringInterner>) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("penumbra").tempdir()?;
        let path = dir.path().join(DB_FILE_NAME);
        let backend = Arc::new(SqliteBackend::open(&path)?);
        Self::init(backend, interner, Location::Temporary { path, _dir: dir }, true)
    }

    /// Wraps an arbitrary backend.
    pub fn with_backend(backend: Arc<dyn KvBackend>, interner: Arc<StringInterner>) -> Result<Self> {
        Self::init(backend, interner, Location::Volatile, true)
    }

    /// Opens an existing store without recording a new run.
    pub fn inspect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(GraphError::NotFound(format!("storage file {}", path.display())));
        }
        let backend = Arc::new(SqliteBackend::open(&path)?);
        Self::init(backend, Arc::new(StringInterner::new()), Location::Persistent(path), false)
    }

    fn init(
        backend: Arc<dyn KvBackend>,
        interner: Arc<StringInterner>,
        location: Location,
        record_run: bool,
    ) -> Result<Self> {
        let fresh = backend.is_empty()?;
        if !fresh {
            verify_format_version(backend.as_ref())?;
        }
        let persisted_max_id = match backend.get_meta(METADATA_KEY_STRING_TO_INT_MAX_ID)? {
            Some(raw) => parse_meta(METADATA_KEY_STRING_TO_INT_MAX_ID, &raw)?,
            None => 0,
        };
        let dict = StringDictionary::load(Arc::clone(&backend), Arc::clone(&interner), persisted_max_id)?;

        let mut storage = Self {
            backend,
            dict,
            interner,
            run_id: None,
            closed: AtomicBool::new(false),
            location,
        };
        if record_run {
            storage.write_format_version()?;
            storage.run_id = Some(storage.next_run_id()?);
            storage.persist_library_version(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))?;
        }
        info!(
            location = ?storage.location(),
            fresh,
            strings = storage.dict.len(),
            run_id = ?storage.run_id,
            "storage.open"
        );
        Ok(storage)
    }

    fn write_format_version(&self) -> Result<()> {
        self.backend.put_meta(
            METADATA_KEY_STORAGE_FORMAT_VERSION,
            &STORAGE_FORMAT_VERSION.to_string(),
        )
    }

    fn next_run_id(&self) -> Result<u32> {
        let run_id = match self.backend.get_meta(METADATA_KEY_LIBRARY_VERSIONS_MAX_ID)? {
            Some(raw) => parse_meta::<u32>(METADATA_KEY_LIBRARY_VERSIONS_MAX_ID, &raw)? + 1,
            None => 0,
        };
        self.backend
            .put_meta(METADATA_KEY_LIBRARY_VERSIONS_MAX_ID, &run_id.to_string())?;
        Ok(run_id)
    }

    /// Path of the backing file, if any.
    pub fn location(&self) -> Option<&Path> {
        match &self.location {
            Location::Persistent(path) => Some(path),
            Location::Temporary { path, .. } => Some(path),
            Location::Volatile => None,
        }
    }

    /// Whether the store is deleted on drop.
    pub fn is_temporary(&self) -> bool {
        matches!(self.location, Location::Temporary { .. })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    pub fn interner(&self) -> &Arc<StringInterner> {
        &self.interner
    }

    pub fn dict_metrics(&self) -> DictMetricsSnapshot {
        self.dict.metrics_snapshot()
    }

    pub fn string_count(&self) -> usize {
        self.dict.len()
    }

    /// Writes one record. Ignored once the storage is closed.
    pub fn persist(&self, id: NodeId, bytes: Vec<u8>) -> Result<()> {
        self.persist_batch(&[(id, bytes)])
    }

    /// Writes a batch of records atomically. Ignored once the storage is closed.
    pub fn persist_batch(&self, records: &[(NodeId, Vec<u8>)]) -> Result<()> {
        if self.is_closed() || records.is_empty() {
            return Ok(());
        }
        self.backend.persist_batch(records)
    }

    pub fn get_record(&self, id: NodeId) -> Result<Option<Vec<u8>>> {
        self.backend.get_record(id)
    }

    pub fn remove_record(&self, id: NodeId) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.backend.remove_record(id)
    }

    pub fn all_records(&self) -> Result<Vec<(NodeId, Vec<u8>)>> {
        self.backend.all_records()
    }

    pub fn record_count(&self) -> Result<u64> {
        self.backend.record_count()
    }

    pub fn lookup_or_create_string_id(&self, value: &str) -> Result<i32> {
        self.dict.lookup_or_create(value)
    }

    pub fn resolve_string_id(&self, id: i32) -> Option<Arc<str>> {
        self.dict.resolve(id)
    }

    /// Names of the persisted property indexes.
    pub fn index_names(&self) -> Result<Vec<String>> {
        Ok(self
            .backend
            .store_names()?
            .into_iter()
            .filter_map(|name| name.strip_prefix(INDEX_PREFIX).map(str::to_owned))
            .collect())
    }

    pub fn open_index_store(&self, name: &str) -> Result<()> {
        self.backend.open_store(&index_store_name(name))
    }

    /// Replaces the stored entries of one index.
    pub fn write_index_store(&self, name: &str, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        self.backend.replace_store(&index_store_name(name), entries)
    }

    pub fn index_entries(&self, name: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.backend.store_entries(&index_store_name(name))
    }

    pub fn clear_index_store(&self, name: &str) -> Result<()> {
        self.backend.clear_store(&index_store_name(name))
    }

    pub fn drop_index_store(&self, name: &str) -> Result<()> {
        self.backend.drop_store(&index_store_name(name))
    }

    pub fn clear_index_stores(&self) -> Result<()> {
        for name in self.index_names()? {
            self.clear_index_store(&name)?;
        }
        Ok(())
    }

    /// Records a library version under the current run.
    pub fn persist_library_version(&self, name: &str, version: &str) -> Result<()> {
        let Some(run_id) = self.run_id else {
            return Err(GraphError::invalid("storage opened for inspection records no run"));
        };
        let key = format!("{METADATA_PREFIX_LIBRARY_VERSIONS}{run_id}_{name}");
        self.backend.put_meta(&key, version)
    }

    /// Library versions recorded by every run that opened this store, in run
    /// order.
    pub fn all_library_versions(&self) -> Result<Vec<BTreeMap<String, String>>> {
        let mut by_run: BTreeMap<u32, BTreeMap<String, String>> = BTreeMap::new();
        for (key, version) in self.backend.meta_entries()? {
            let Some(rest) = key.strip_prefix(METADATA_PREFIX_LIBRARY_VERSIONS) else {
                continue;
            };
            let Some((run, library)) = rest.split_once('_') else {
                warn!(key = %key, "storage.library_versions.malformed");
                continue;
            };
            let run: u32 = parse_meta(&key, run)?;
            by_run
                .entry(run)
                .or_default()
                .insert(library.to_owned(), version);
        }
        Ok(by_run.into_values().collect())
    }

    pub fn format_version(&self) -> Result<Option<u32>> {
        match self.backend.get_meta(METADATA_KEY_STORAGE_FORMAT_VERSION)? {
            Some(raw) => Ok(Some(parse_meta(METADATA_KEY_STORAGE_FORMAT_VERSION, &raw)?)),
            None => Ok(None),
        }
    }

    /// Persists the format marker and dictionary counter and makes all writes
    /// durable.
    pub fn flush(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if self.run_id.is_some() {
            self.write_format_version()?;
            self.backend.put_meta(
                METADATA_KEY_STRING_TO_INT_MAX_ID,
                &self.dict.max_id().to_string(),
            )?;
        }
        self.backend.flush()?;
        debug!(max_string_id = self.dict.max_id(), "storage.flush");
        Ok(())
    }

    /// Flushes and closes. Later writes are ignored; closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.flush()?;
        self.closed.store(true, Ordering::Release);
        info!(location = ?self.location(), "storage.close");
        Ok(())
    }
}

fn index_store_name(name: &str) -> String {
    format!("{INDEX_PREFIX}{name}")
}

fn parse_meta<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| GraphError::corruption(format!("metadata {key} holds unparsable value {raw:?}")))
}

fn verify_format_version(backend: &dyn KvBackend) -> Result<()> {
    let raw = backend
        .get_meta(METADATA_KEY_STORAGE_FORMAT_VERSION)?
        .ok_or(GraphError::MissingFormatVersion)?;
    let found: u32 = parse_meta(METADATA_KEY_STORAGE_FORMAT_VERSION, &raw)?;
    if found != STORAGE_FORMAT_VERSION {
        warn!(found, expected = STORAGE_FORMAT_VERSION, "storage.version.mismatch");
        return Err(GraphError::VersionMismatch {
            found,
            expected: STORAGE_FORMAT_VERSION,
        });
    }
    Ok(())
}
