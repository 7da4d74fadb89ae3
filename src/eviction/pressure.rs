//! Process-wide memory pressure sampling.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tracing::debug;

/// Snapshot of host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    /// Total physical RAM in bytes.
    pub total_memory_bytes: u64,
    /// Available (re-usable) RAM in bytes.
    pub available_memory_bytes: u64,
}

impl MemorySample {
    /// Used fraction of physical memory, 0.0 to 1.0.
    pub fn memory_pressure(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 1.0;
        }
        let ratio = self.available_memory_bytes as f64 / self.total_memory_bytes as f64;
        (1.0 - ratio).clamp(0.0, 1.0)
    }
}

/// Samples memory every `check_interval` node creations and reports when
/// usage is above the configured threshold.
pub struct MemoryMonitor {
    system: Mutex<System>,
    threshold: f64,
    check_interval: u64,
    creations: AtomicU64,
}

impl MemoryMonitor {
    /// `threshold_percentage` is clamped to 0..=100; an interval of zero is
    /// treated as one.
    pub fn new(threshold_percentage: u8, check_interval: u64) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            system: Mutex::new(system),
            threshold: f64::from(threshold_percentage.min(100)) / 100.0,
            check_interval: check_interval.max(1),
            creations: AtomicU64::new(0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn sample(&self) -> MemorySample {
        let mut system = self.system.lock();
        system.refresh_memory();
        MemorySample {
            total_memory_bytes: system.total_memory(),
            available_memory_bytes: system.available_memory(),
        }
    }

    pub fn pressure(&self) -> f64 {
        self.sample().memory_pressure()
    }

    /// Fresh sample compared against the threshold. Hosts that report no
    /// memory at all are never considered under pressure.
    pub fn is_under_pressure(&self) -> bool {
        let sample = self.sample();
        if sample.total_memory_bytes == 0 {
            return false;
        }
        let pressure = sample.memory_pressure();
        let under = pressure >= self.threshold;
        if under {
            debug!(
                pressure,
                threshold = self.threshold,
                available = sample.available_memory_bytes,
                "eviction.pressure.high"
            );
        }
        under
    }

    /// Counts one node creation; samples on every `check_interval`-th call
    /// and returns whether eviction should be requested.
    pub fn on_creation(&self) -> bool {
        let count = self.creations.fetch_add(1, Ordering::Relaxed) + 1;
        count % self.check_interval == 0 && self.is_under_pressure()
    }
}
