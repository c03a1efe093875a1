//! Per-network counters, read as a snapshot.

use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Metrics snapshot for one network's crawler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlMetrics {
    pub cycles: u64,
    pub scans_ok: u64,
    pub scans_failed: u64,
    pub events_found: u64,
    pub events_notified: u64,
    pub checkpoint_failures: u64,
    pub reindex_processed: u64,
    pub reindex_failed: u64,
    pub fallback_rotations: u64,
    /// Current scan window.
    pub chunk_size: u64,
    pub last_indexed_block: Option<u64>,
}

/// Shared, cloneable handle over a [`CrawlMetrics`] record.
#[derive(Debug, Clone, Default)]
pub struct MetricsHandle {
    inner: Arc<Mutex<CrawlMetrics>>,
}

impl MetricsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to the record under the lock.
    pub fn update(&self, f: impl FnOnce(&mut CrawlMetrics)) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    pub fn snapshot(&self) -> CrawlMetrics {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
