use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{GraphError, Result};

const REPORT_MASK: u64 = 0x0001_ffff;

/// Call counts and cumulative time of one codec direction. Timing is only
/// taken when enabled.
pub struct CodecStats {
    name: &'static str,
    enabled: bool,
    count: AtomicU64,
    total_nanos: AtomicU64,
}

/// Point-in-time copy of [`CodecStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CodecStatsSnapshot {
    pub count: u64,
    pub total: Duration,
}

impl CodecStatsSnapshot {
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        self.total / self.count as u32
    }
}

impl CodecStats {
    pub fn new(name: &'static str, enabled: bool) -> Self {
        Self {
            name,
            enabled,
            count: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn start(&self) -> Option<Instant> {
        self.enabled.then(Instant::now)
    }

    pub(crate) fn record(&self, started: Option<Instant>) {
        let Some(started) = started else {
            return;
        };
        let nanos = started.elapsed().as_nanos() as u64;
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total_nanos.fetch_add(nanos, Ordering::Relaxed) + nanos;
        if count & REPORT_MASK == 0 {
            debug!(
                codec = self.name,
                count,
                avg_micros = total as f64 / count as f64 / 1_000.0,
                "codec.stats"
            );
        }
    }

    pub fn snapshot(&self) -> Result<CodecStatsSnapshot> {
        if !self.enabled {
            return Err(GraphError::invalid(format!(
                "{} statistics not enabled",
                self.name
            )));
        }
        Ok(CodecStatsSnapshot {
            count: self.count.load(Ordering::Relaxed),
            total: Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed)),
        })
    }
}
