//! Index statistics and the health probe.
//!
//! Counters are purely additive and updated under the manager's locks
//! (shared-mode holders bump atomics). They travel with every snapshot
//! manifest so a reloaded index resumes its operation counts.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time view of index statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Live documents.
    pub doc_count: u64,
    /// Tombstoned labels awaiting compaction.
    pub deleted_count: u64,
    /// Successful first-time upserts since creation.
    pub insert_count: u64,
    /// Successful replacing upserts since creation.
    pub update_count: u64,
    /// Searches served since creation.
    pub query_count: u64,
    /// When the last snapshot finished (ms since the Unix epoch; 0 = never).
    pub last_snapshot_at: u64,
    /// When the last compaction finished (0 = never).
    pub last_rebuild_at: u64,
    /// Duration of the last `load_from` in milliseconds.
    pub load_duration_ms: u64,
    /// Duration of the last snapshot write in milliseconds.
    pub last_snapshot_duration_ms: u64,
    /// Approximate resident bytes for the graph and embedding buffer.
    pub memory_usage_bytes: u64,
}

/// Health probe status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Normal operation.
    Ok,
    /// Operational but needs attention (tombstone buildup or stale
    /// snapshot).
    Degraded,
    /// An internal invariant was violated; only `close` will succeed.
    Poisoned,
}

/// Health probe result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Health {
    /// Overall status.
    pub status: HealthStatus,
    /// Live documents.
    pub doc_count: u64,
    /// `deleted_count / (doc_count + deleted_count)`, 0.0 when empty.
    pub deleted_ratio: f64,
    /// Milliseconds since the last successful snapshot, if one ever ran.
    pub last_snapshot_age_ms: Option<u64>,
}

/// Live counters shared between the manager and its snapshot worker.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub inserts: AtomicU64,
    pub updates: AtomicU64,
    pub queries: AtomicU64,
    pub last_snapshot_at: AtomicU64,
    pub last_rebuild_at: AtomicU64,
    pub load_duration_ms: AtomicU64,
    pub last_snapshot_duration_ms: AtomicU64,
}

impl StatsCounters {
    /// Materializes a stats view from the counters plus the per-call counts.
    pub fn snapshot(&self, doc_count: u64, deleted_count: u64, memory_usage_bytes: u64) -> IndexStats {
        IndexStats {
            doc_count,
            deleted_count,
            insert_count: self.inserts.load(Ordering::Relaxed),
            update_count: self.updates.load(Ordering::Relaxed),
            query_count: self.queries.load(Ordering::Relaxed),
            last_snapshot_at: self.last_snapshot_at.load(Ordering::Relaxed),
            last_rebuild_at: self.last_rebuild_at.load(Ordering::Relaxed),
            load_duration_ms: self.load_duration_ms.load(Ordering::Relaxed),
            last_snapshot_duration_ms: self.last_snapshot_duration_ms.load(Ordering::Relaxed),
            memory_usage_bytes,
        }
    }

    /// Restores counters from a loaded manifest.
    pub fn restore(&self, stats: &IndexStats) {
        self.inserts.store(stats.insert_count, Ordering::Relaxed);
        self.updates.store(stats.update_count, Ordering::Relaxed);
        self.queries.store(stats.query_count, Ordering::Relaxed);
        self.last_snapshot_at
            .store(stats.last_snapshot_at, Ordering::Relaxed);
        self.last_rebuild_at
            .store(stats.last_rebuild_at, Ordering::Relaxed);
        self.last_snapshot_duration_ms
            .store(stats.last_snapshot_duration_ms, Ordering::Relaxed);
    }

    /// Zeroes every counter. Used when an empty index replaces state.
    pub fn reset(&self) {
        self.restore(&IndexStats::default());
        self.load_duration_ms.store(0, Ordering::Relaxed);
    }
}
