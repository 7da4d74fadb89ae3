use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::eviction::EvictionWorker;
use crate::model::PropertyConverter;

pub const DEFAULT_HEAP_PERCENTAGE_THRESHOLD: u8 = 80;
pub const DEFAULT_EVICTION_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_PRESSURE_CHECK_INTERVAL: u64 = 10_000;

/// Configuration supplied when opening a [`crate::Graph`].
///
/// Serializable fields can be loaded from TOML; the property converter and
/// an externally owned eviction worker are set in code.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Whether node bodies are evicted to storage under memory pressure.
    pub overflow_enabled: bool,
    /// System memory usage, in percent, above which eviction is requested.
    pub heap_percentage_threshold: u8,
    /// Persistent storage file. A temporary file is used when absent.
    pub storage_location: Option<PathBuf>,
    /// Whether codec timings are collected.
    pub serialization_stats_enabled: bool,
    /// Handles handed to the eviction worker per request.
    pub eviction_batch_size: usize,
    /// Requests eviction whenever more eviction candidates than this are queued.
    pub max_eviction_candidates: Option<usize>,
    /// Node creations between memory samples.
    pub pressure_check_interval: u64,
    #[serde(skip)]
    pub property_converter: Option<PropertyConverter>,
    #[serde(skip)]
    pub eviction_worker: Option<Arc<EvictionWorker>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            overflow_enabled: true,
            heap_percentage_threshold: DEFAULT_HEAP_PERCENTAGE_THRESHOLD,
            storage_location: None,
            serialization_stats_enabled: false,
            eviction_batch_size: DEFAULT_EVICTION_BATCH_SIZE,
            max_eviction_candidates: None,
            pressure_check_interval: DEFAULT_PRESSURE_CHECK_INTERVAL,
            property_converter: None,
            eviction_worker: None,
        }
    }
}

impl Config {
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Keeps every node resident; nothing is evicted.
    pub fn without_overflow() -> Self {
        Self::default().overflow(false)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|err| GraphError::invalid(format!("config not serializable: {err}")))
    }

    pub fn overflow(mut self, enabled: bool) -> Self {
        self.overflow_enabled = enabled;
        self
    }

    pub fn heap_percentage_threshold(mut self, percentage: u8) -> Self {
        self.heap_percentage_threshold = percentage;
        self
    }

    pub fn storage_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_location = Some(path.into());
        self
    }

    pub fn serialization_stats(mut self, enabled: bool) -> Self {
        self.serialization_stats_enabled = enabled;
        self
    }

    pub fn eviction_batch_size(mut self, size: usize) -> Self {
        self.eviction_batch_size = size;
        self
    }

    pub fn max_eviction_candidates(mut self, limit: usize) -> Self {
        self.max_eviction_candidates = Some(limit);
        self
    }

    pub fn pressure_check_interval(mut self, creations: u64) -> Self {
        self.pressure_check_interval = creations;
        self
    }

    pub fn property_converter(mut self, converter: PropertyConverter) -> Self {
        self.property_converter = Some(converter);
        self
    }

    /// Shares an eviction worker owned by the caller. The graph never shuts
    /// it down.
    pub fn eviction_worker(mut self, worker: Arc<EvictionWorker>) -> Self {
        self.eviction_worker = Some(worker);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.heap_percentage_threshold > 100 {
            return Err(GraphError::invalid(format!(
                "heap_percentage_threshold must be at most 100, got {}",
                self.heap_percentage_threshold
            )));
        }
        if self.eviction_batch_size == 0 {
            return Err(GraphError::invalid("eviction_batch_size must be positive"));
        }
        if self.pressure_check_interval == 0 {
            return Err(GraphError::invalid("pressure_check_interval must be positive"));
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("overflow_enabled", &self.overflow_enabled)
            .field("heap_percentage_threshold", &self.heap_percentage_threshold)
            .field("storage_location", &self.storage_location)
            .field("serialization_stats_enabled", &self.serialization_stats_enabled)
            .field("eviction_batch_size", &self.eviction_batch_size)
            .field("max_eviction_candidates", &self.max_eviction_candidates)
            .field("pressure_check_interval", &self.pressure_check_interval)
            .field("property_converter", &self.property_converter.is_some())
            .field(
                "eviction_worker",
                &self.eviction_worker.as_ref().map(|worker| worker.name().to_owned()),
            )
            .finish()
    }
}
