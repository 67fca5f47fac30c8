//! The index manager: the public contract of the subsystem.
//!
//! [`VectorIndex`] owns the HNSW graph, the document store, the snapshot
//! codec, and the statistics, and enforces the concurrency discipline that
//! ties them together:
//!
//! - One reader-writer lock protects the graph and the store together (they
//!   are co-invariant: every doc id maps to a live label and vice versa).
//! - `search`, `get`, `stats`, `health` take the lock in shared mode;
//!   `upsert`, `remove`, `compact`, `load_from` in exclusive mode.
//! - `save_as` clones a consistent view under the shared lock and performs
//!   all disk I/O with no lock held; writers proceed concurrently.
//! - A snapshot gate serializes snapshot writers; `load_from` and `close`
//!   wait on it so no snapshot is mid-flight while state is replaced.
//!
//! Every operation accepts an optional [`Deadline`]. A deadline that
//! elapses while waiting for the lock fails with `DeadlineExceeded` and no
//! side effects; once a write holds the lock it runs to completion (writes
//! reach their commit point quickly).

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::hnsw::{DistanceKind, HnswGraph, Label};
use crate::metric;
use crate::snapshot::{self, FsIo};
use crate::stats::{Health, HealthStatus, IndexStats, StatsCounters};
use crate::store::metadata::{validate_metadata, MetadataValue};
use crate::store::DocumentStore;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const STATE_OPEN: u8 = 0;
const STATE_POISONED: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Pressure mode compacts instead of growing once this fraction of live
/// documents is tombstoned.
const PRESSURE_COMPACT_RATIO: f64 = 0.25;

/// An absolute point in time after which an operation should give up
/// waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// A deadline `budget` from now.
    #[must_use]
    pub fn within(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    /// A deadline at an absolute instant.
    #[must_use]
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// True once the deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// What an `upsert` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The doc id was new; a document was created.
    Inserted,
    /// The doc id existed; its vector and payload were replaced.
    Updated,
}

/// What a `remove` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The document existed and is now tombstoned.
    Removed,
    /// No such doc id.
    NotFound,
}

/// What a `load_from` did. Callers must treat the two as distinct: only
/// `Loaded` asserts that previously persisted data is now live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The snapshot at the path was verified and installed.
    Loaded,
    /// The path did not exist; a fresh empty index was installed and the
    /// default snapshot path now points there.
    InitializedEmpty,
}

/// One search result, hydrated with its payload.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    /// The document's external id.
    pub doc_id: String,
    /// Similarity score; higher is better. In `[-1, 1]` under cosine,
    /// negated squared distance otherwise.
    pub score: f32,
    /// The stored text payload.
    pub text: String,
    /// The stored metadata.
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// A full document as returned by [`VectorIndex::get`].
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    /// External id.
    pub doc_id: String,
    /// The stored embedding (normalized if the index normalizes).
    pub embedding: Vec<f32>,
    /// Text payload.
    pub text: String,
    /// Metadata.
    pub metadata: BTreeMap<String, MetadataValue>,
    /// Creation timestamp (ms since the Unix epoch).
    pub created_at: u64,
    /// Last update timestamp.
    pub updated_at: u64,
}

/// A conjunction of metadata equality terms. A document matches when every
/// term's key holds exactly the given value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchFilter {
    terms: Vec<(String, MetadataValue)>,
}

impl SearchFilter {
    /// A filter with a single `key == value` term.
    #[must_use]
    pub fn equals(key: impl Into<String>, value: MetadataValue) -> Self {
        Self {
            terms: vec![(key.into(), value)],
        }
    }

    /// Adds another `key == value` term.
    #[must_use]
    pub fn and_equals(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.terms.push((key.into(), value));
        self
    }

    fn matches(&self, metadata: &BTreeMap<String, MetadataValue>) -> bool {
        self.terms
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

/// One record of an [`upsert_batch`](VectorIndex::upsert_batch) call.
#[derive(Clone, Debug)]
pub struct BatchRecord {
    /// External id.
    pub doc_id: String,
    /// Embedding; must match the index dimensionality.
    pub embedding: Vec<f32>,
    /// Text payload.
    pub text: String,
    /// Metadata.
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// Per-record status of a batch upsert.
#[derive(Debug)]
pub struct BatchStatus {
    /// The record's doc id.
    pub doc_id: String,
    /// The record's individual outcome. A failed record never aborts the
    /// rest of the batch.
    pub result: Result<UpsertOutcome, IndexError>,
}

struct IndexCore {
    config: IndexConfig,
    graph: HnswGraph,
    store: DocumentStore,
    /// Monotonic timestamp source: never hands out the same or a smaller
    /// value twice, even if the wall clock steps backwards.
    clock_ms: u64,
}

impl IndexCore {
    fn fresh(config: IndexConfig) -> Self {
        let graph = HnswGraph::new(config.hnsw_params(), config.rng_seed);
        let store = DocumentStore::new(config.embedding_dim);
        Self {
            config,
            graph,
            store,
            clock_ms: 0,
        }
    }

    fn next_timestamp(&mut self) -> u64 {
        self.clock_ms = now_ms().max(self.clock_ms + 1);
        self.clock_ms
    }

    fn memory_usage(&self) -> u64 {
        (self.graph.memory_usage() + self.store.memory_usage()) as u64
    }
}

struct IndexInner {
    core: RwLock<IndexCore>,
    counters: StatsCounters,
    /// Serializes snapshot writers; `load_from`/`close` lock it to await an
    /// in-flight snapshot.
    snapshot_gate: Mutex<()>,
    /// Successful writes since the last snapshot.
    snapshot_pending: AtomicU64,
    snapshot_running: AtomicBool,
    /// Cached copy of `config.sync_interval_docs`, readable without the
    /// core lock.
    sync_interval_docs: AtomicU64,
    state: AtomicU8,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// The thread-safe, persistent ANN document index.
///
/// Cloning the handle is cheap and shares the underlying index; this is how
/// the index is handed to multiple threads.
///
/// # Example
///
/// ```rust
/// use docvec::{IndexConfig, VectorIndex};
///
/// let index = VectorIndex::open(IndexConfig::new(4, "/tmp/docvec-example")).unwrap();
/// index
///     .upsert("a", &[1.0, 0.0, 0.0, 0.0], "alpha", Default::default(), None)
///     .unwrap();
/// let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 1, None, None).unwrap();
/// assert_eq!(hits[0].doc_id, "a");
/// ```
#[derive(Clone)]
pub struct VectorIndex {
    inner: Arc<IndexInner>,
}

impl VectorIndex {
    /// Opens a fresh, empty index with the given configuration.
    ///
    /// Nothing is read from or written to `config.index_path` here; use
    /// [`load_from`](Self::load_from) to restore persisted state.
    ///
    /// # Errors
    ///
    /// [`IndexError::InvalidConfig`] if validation fails.
    pub fn open(config: IndexConfig) -> Result<Self, IndexError> {
        config.validate()?;
        log::info!(
            "opening index: dim={}, m={}, metric={:?}, path={}",
            config.embedding_dim,
            config.m,
            config.distance_kind(),
            config.index_path.display()
        );
        let sync_interval = config.sync_interval_docs;
        let inner = Arc::new(IndexInner {
            core: RwLock::new(IndexCore::fresh(config)),
            counters: StatsCounters::default(),
            snapshot_gate: Mutex::new(()),
            snapshot_pending: AtomicU64::new(0),
            snapshot_running: AtomicBool::new(false),
            sync_interval_docs: AtomicU64::new(sync_interval),
            state: AtomicU8::new(STATE_OPEN),
        });
        Ok(Self { inner })
    }

    /// Closes the index: awaits any in-flight snapshot, then rejects every
    /// subsequent operation with `Unavailable`.
    pub fn close(&self) {
        self.inner.state.store(STATE_CLOSED, Ordering::SeqCst);
        // Taking the gate waits out an in-flight background snapshot.
        drop(self.inner.snapshot_gate.lock());
        log::info!("index closed");
    }

    /// Inserts or replaces the document `doc_id`.
    ///
    /// An unknown id allocates a fresh label and inserts; a known id
    /// tombstones the old label and inserts the new vector under a fresh
    /// one (replacing the vector wholesale keeps HNSW neighbor integrity
    /// simpler than editing in place). All-or-nothing: on failure the store
    /// and graph roll back to the pre-call state.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty id, wrong dimension, non-finite or
    /// zero-norm embedding, or invalid metadata; `CapacityExhausted` when
    /// the pressure policy cannot make room; `DeadlineExceeded`;
    /// `Unavailable`.
    pub fn upsert(
        &self,
        doc_id: &str,
        embedding: &[f32],
        text: &str,
        metadata: BTreeMap<String, MetadataValue>,
        deadline: Option<Deadline>,
    ) -> Result<UpsertOutcome, IndexError> {
        self.check_available()?;
        let outcome = {
            let mut core = self.write_guard(deadline)?;
            self.upsert_locked(&mut core, doc_id, embedding, text, metadata)?
        };
        self.note_writes(1);
        Ok(outcome)
    }

    /// Upserts a batch of records under a single lock acquisition.
    ///
    /// Best-effort: each record gets an independent status and a failing
    /// record never aborts the rest.
    ///
    /// # Errors
    ///
    /// Only batch-level failures (`DeadlineExceeded`, `Unavailable`) error;
    /// per-record failures are reported inside the returned statuses.
    pub fn upsert_batch(
        &self,
        records: Vec<BatchRecord>,
        deadline: Option<Deadline>,
    ) -> Result<Vec<BatchStatus>, IndexError> {
        self.check_available()?;
        let mut statuses = Vec::with_capacity(records.len());
        let mut written = 0u64;
        {
            let mut core = self.write_guard(deadline)?;
            for record in records {
                let result = self.upsert_locked(
                    &mut core,
                    &record.doc_id,
                    &record.embedding,
                    &record.text,
                    record.metadata,
                );
                if result.is_ok() {
                    written += 1;
                }
                statuses.push(BatchStatus {
                    doc_id: record.doc_id,
                    result,
                });
            }
        }
        if written > 0 {
            self.note_writes(written);
        }
        Ok(statuses)
    }

    /// Removes `doc_id`, tombstoning its label.
    ///
    /// # Errors
    ///
    /// `DeadlineExceeded` or `Unavailable`. A missing id is reported as
    /// [`RemoveOutcome::NotFound`], not an error.
    pub fn remove(
        &self,
        doc_id: &str,
        deadline: Option<Deadline>,
    ) -> Result<RemoveOutcome, IndexError> {
        self.check_available()?;
        let removed = {
            let mut core = self.write_guard(deadline)?;
            match core.store.erase(doc_id) {
                None => false,
                Some((label, record)) => {
                    if let Err(e) = core.graph.mark_deleted(label) {
                        core.store.reinstate(label, record);
                        return Err(self.poison(format!(
                            "remove('{doc_id}'): store handed out label {label} unknown to the graph: {e}"
                        )));
                    }
                    true
                }
            }
        };
        if removed {
            self.note_writes(1);
            Ok(RemoveOutcome::Removed)
        } else {
            Ok(RemoveOutcome::NotFound)
        }
    }

    /// Top-`k` similarity search.
    ///
    /// Results are ordered by descending score (ascending distance), ties
    /// broken deterministically by insertion order. With a `filter`, only
    /// documents whose metadata matches every term are returned; the
    /// candidate list is widened to compensate.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a wrong-dimension or non-finite query;
    /// `DeadlineExceeded`; `Unavailable`.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
        deadline: Option<Deadline>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        self.search_inner(query, k, None, filter, deadline)
    }

    /// [`search`](Self::search) with a per-query `ef` override, for
    /// recall/latency tuning without reconfiguring the index.
    ///
    /// # Errors
    ///
    /// As for [`search`](Self::search).
    pub fn search_with_ef(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        filter: Option<&SearchFilter>,
        deadline: Option<Deadline>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        self.search_inner(query, k, Some(ef), filter, deadline)
    }

    fn search_inner(
        &self,
        query: &[f32],
        k: usize,
        ef_override: Option<usize>,
        filter: Option<&SearchFilter>,
        deadline: Option<Deadline>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        self.check_available()?;
        let core = self.read_guard(deadline)?;

        if query.len() != core.config.embedding_dim {
            return Err(IndexError::invalid(format!(
                "query has {} components, index expects {}",
                query.len(),
                core.config.embedding_dim
            )));
        }
        if !query.iter().all(|v| v.is_finite()) {
            return Err(IndexError::invalid(
                "query contains non-finite components",
            ));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut owned_query = query.to_vec();
        if core.config.normalize_embeddings {
            metric::normalize_in_place(&mut owned_query);
        }

        let mut ef = ef_override
            .unwrap_or(core.config.ef_search as usize)
            .max(k);
        if filter.is_some() {
            // Filtered candidates are dropped during collection; widen the
            // pool so k matches can still surface.
            ef = ef.saturating_mul(4);
        }

        let IndexCore {
            ref graph,
            ref store,
            ref config,
            ..
        } = *core;

        let accept_fn;
        let accept: Option<&dyn Fn(Label) -> bool> = match filter {
            Some(f) => {
                accept_fn = move |label: Label| {
                    store.get(label).map_or(false, |r| f.matches(&r.metadata))
                };
                Some(&accept_fn)
            }
            None => None,
        };

        let raw = graph
            .search(&owned_query, k, ef, store, accept)
            .map_err(IndexError::from)?;

        self.inner.counters.queries.fetch_add(1, Ordering::Relaxed);

        let mut hits = Vec::with_capacity(raw.len());
        for (label, distance) in raw {
            let Some(record) = store.get(label) else {
                return Err(self.poison(format!(
                    "search returned live label {label} with no document record"
                )));
            };
            let score = match config.distance_kind() {
                DistanceKind::Cosine => 1.0 - distance,
                DistanceKind::L2Squared => -distance,
            };
            hits.push(SearchHit {
                doc_id: record.doc_id.clone(),
                score,
                text: record.text.clone(),
                metadata: record.metadata.clone(),
            });
        }
        Ok(hits)
    }

    /// Fetches a document by id.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id is absent; `DeadlineExceeded`; `Unavailable`.
    pub fn get(&self, doc_id: &str, deadline: Option<Deadline>) -> Result<Document, IndexError> {
        self.check_available()?;
        let core = self.read_guard(deadline)?;
        let (label, record) = core
            .store
            .get_by_doc_id(doc_id)
            .ok_or_else(|| IndexError::NotFound {
                doc_id: doc_id.to_string(),
            })?;
        Ok(Document {
            doc_id: record.doc_id.clone(),
            embedding: core.store.embedding(label).to_vec(),
            text: record.text.clone(),
            metadata: record.metadata.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Writes a snapshot of the current state to `path`.
    ///
    /// A consistent view is captured under the shared lock; all disk I/O
    /// happens with no lock held, so writers proceed concurrently. With
    /// `update_default`, a successful save repoints `config.index_path` at
    /// `path`.
    ///
    /// # Errors
    ///
    /// `io_error`-kind failures leave any prior snapshot at `path`
    /// untouched. `DeadlineExceeded` applies to lock acquisition only;
    /// once disk writes begin the operation is not cancellable.
    pub fn save_as(
        &self,
        path: &Path,
        update_default: bool,
        deadline: Option<Deadline>,
    ) -> Result<(), IndexError> {
        self.check_available()?;
        let _gate = self.gate_guard(deadline)?;

        let (graph, store, config, stats) = {
            let core = self.read_guard(deadline)?;
            let stats = self.inner.counters.snapshot(
                core.store.len() as u64,
                core.graph.deleted_count() as u64,
                core.memory_usage(),
            );
            (
                core.graph.clone(),
                core.store.clone(),
                core.config.clone(),
                stats,
            )
        };

        let started = Instant::now();
        snapshot::write_snapshot(&FsIo, path, &graph, &store, &config, &stats, now_ms())?;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        self.inner
            .counters
            .last_snapshot_at
            .store(now_ms(), Ordering::Relaxed);
        self.inner
            .counters
            .last_snapshot_duration_ms
            .store(elapsed, Ordering::Relaxed);
        self.inner.snapshot_pending.store(0, Ordering::Relaxed);
        log::info!("snapshot written to {} in {elapsed}ms", path.display());

        if update_default {
            let mut core = self.write_guard(deadline)?;
            core.config.index_path = path.to_path_buf();
        }
        Ok(())
    }

    /// Replaces the in-memory state with the snapshot at `path`.
    ///
    /// Return statuses:
    ///
    /// - path exists and verifies -> `Ok(Loaded)`; `update_default`
    ///   controls `config.index_path`.
    /// - path exists but fails verification -> `Err` (checksum, version,
    ///   I/O); in-memory state provably unchanged.
    /// - path missing, `update_default == false` -> `Err` (`io_error`
    ///   kind); state unchanged.
    /// - path missing, `update_default == true` -> `Ok(InitializedEmpty)`:
    ///   a fresh empty index is installed and `config.index_path = path`.
    ///
    /// Any in-flight snapshot is awaited first; the exclusive lock is held
    /// for the whole duration.
    ///
    /// # Errors
    ///
    /// As enumerated above, plus `DeadlineExceeded` and `Unavailable`.
    pub fn load_from(
        &self,
        path: &Path,
        update_default: bool,
        deadline: Option<Deadline>,
    ) -> Result<LoadOutcome, IndexError> {
        self.check_available()?;
        let _gate = self.gate_guard(deadline)?;
        let mut core = self.write_guard(deadline)?;

        if !path.exists() {
            if !update_default {
                return Err(IndexError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("snapshot path does not exist: {}", path.display()),
                )));
            }
            let mut config = core.config.clone();
            config.index_path = path.to_path_buf();
            log::info!(
                "no snapshot at {}; initializing empty index there",
                path.display()
            );
            *core = IndexCore::fresh(config);
            self.inner.counters.reset();
            self.inner.snapshot_pending.store(0, Ordering::Relaxed);
            return Ok(LoadOutcome::InitializedEmpty);
        }

        let started = Instant::now();
        let loaded = snapshot::read_snapshot(&FsIo, path)?;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut config = loaded.manifest.config.clone();
        config.index_path = if update_default {
            path.to_path_buf()
        } else {
            core.config.index_path.clone()
        };
        config.validate()?;

        self.inner.sync_interval_docs.store(
            config.sync_interval_docs,
            Ordering::Relaxed,
        );
        self.inner.counters.restore(&loaded.manifest.stats);
        self.inner
            .counters
            .load_duration_ms
            .store(elapsed, Ordering::Relaxed);
        self.inner.snapshot_pending.store(0, Ordering::Relaxed);

        *core = IndexCore {
            config,
            graph: loaded.graph,
            store: loaded.store,
            clock_ms: 0,
        };
        log::info!(
            "loaded snapshot from {}: {} documents in {elapsed}ms",
            path.display(),
            core.store.len()
        );
        Ok(LoadOutcome::Loaded)
    }

    /// Rebuilds the index without tombstones: renumbers labels densely,
    /// reinserts every live vector in ascending new-label order, and swaps
    /// the new graph/store pair in atomically. On failure the old pair is
    /// retained.
    ///
    /// # Errors
    ///
    /// `DeadlineExceeded`, `Unavailable`, or `Internal` if the rebuild
    /// itself fails (old state intact).
    pub fn compact(&self, deadline: Option<Deadline>) -> Result<(), IndexError> {
        self.check_available()?;
        let mut core = self.write_guard(deadline)?;
        self.compact_locked(&mut core)
    }

    /// A point-in-time statistics view.
    ///
    /// # Errors
    ///
    /// `DeadlineExceeded` or `Unavailable`.
    pub fn stats(&self, deadline: Option<Deadline>) -> Result<IndexStats, IndexError> {
        self.check_available()?;
        let core = self.read_guard(deadline)?;
        Ok(self.inner.counters.snapshot(
            core.store.len() as u64,
            core.graph.deleted_count() as u64,
            core.memory_usage(),
        ))
    }

    /// The health probe.
    ///
    /// Unlike other operations this still answers on a poisoned index
    /// (reporting `Poisoned`); only a closed index refuses.
    ///
    /// # Errors
    ///
    /// `DeadlineExceeded` or `Unavailable` (closed).
    pub fn health(&self, deadline: Option<Deadline>) -> Result<Health, IndexError> {
        let state = self.inner.state.load(Ordering::SeqCst);
        if state == STATE_CLOSED {
            return Err(IndexError::Unavailable("closed"));
        }
        let core = self.read_guard(deadline)?;

        let doc_count = core.store.len() as u64;
        let deleted = core.graph.deleted_count() as u64;
        let total = doc_count + deleted;
        #[allow(clippy::cast_precision_loss)]
        let deleted_ratio = if total == 0 {
            0.0
        } else {
            deleted as f64 / total as f64
        };

        let last_snapshot = self.inner.counters.last_snapshot_at.load(Ordering::Relaxed);
        let last_snapshot_age_ms = if last_snapshot == 0 {
            None
        } else {
            Some(now_ms().saturating_sub(last_snapshot))
        };

        let status = if state == STATE_POISONED {
            HealthStatus::Poisoned
        } else if deleted_ratio > PRESSURE_COMPACT_RATIO {
            HealthStatus::Degraded
        } else if let (Some(interval), Some(age)) =
            (core.config.sync_interval_time, last_snapshot_age_ms)
        {
            if age > interval.saturating_mul(10) {
                HealthStatus::Degraded
            } else {
                HealthStatus::Ok
            }
        } else {
            HealthStatus::Ok
        };

        Ok(Health {
            status,
            doc_count,
            deleted_ratio,
            last_snapshot_age_ms,
        })
    }

    /// The active configuration (a copy).
    ///
    /// # Errors
    ///
    /// `DeadlineExceeded` or `Unavailable`.
    pub fn config(&self, deadline: Option<Deadline>) -> Result<IndexConfig, IndexError> {
        self.check_available()?;
        let core = self.read_guard(deadline)?;
        Ok(core.config.clone())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_available(&self) -> Result<(), IndexError> {
        match self.inner.state.load(Ordering::SeqCst) {
            STATE_OPEN => Ok(()),
            STATE_POISONED => Err(IndexError::Unavailable("poisoned")),
            _ => Err(IndexError::Unavailable("closed")),
        }
    }

    fn read_guard(
        &self,
        deadline: Option<Deadline>,
    ) -> Result<RwLockReadGuard<'_, IndexCore>, IndexError> {
        match deadline {
            None => Ok(self.inner.core.read()),
            Some(d) => self
                .inner
                .core
                .try_read_until(d.0)
                .ok_or(IndexError::DeadlineExceeded),
        }
    }

    fn write_guard(
        &self,
        deadline: Option<Deadline>,
    ) -> Result<RwLockWriteGuard<'_, IndexCore>, IndexError> {
        match deadline {
            None => Ok(self.inner.core.write()),
            Some(d) => self
                .inner
                .core
                .try_write_until(d.0)
                .ok_or(IndexError::DeadlineExceeded),
        }
    }

    fn gate_guard(
        &self,
        deadline: Option<Deadline>,
    ) -> Result<parking_lot::MutexGuard<'_, ()>, IndexError> {
        match deadline {
            None => Ok(self.inner.snapshot_gate.lock()),
            Some(d) => self
                .inner
                .snapshot_gate
                .try_lock_until(d.0)
                .ok_or(IndexError::DeadlineExceeded),
        }
    }

    /// Transitions to `poisoned` and returns the `Internal` error, logging
    /// enough context to reconstruct the violated invariant.
    fn poison(&self, context: String) -> IndexError {
        log::error!("index poisoned: {context}");
        self.inner.state.store(STATE_POISONED, Ordering::SeqCst);
        IndexError::Internal(context)
    }

    fn upsert_locked(
        &self,
        core: &mut IndexCore,
        doc_id: &str,
        embedding: &[f32],
        text: &str,
        metadata: BTreeMap<String, MetadataValue>,
    ) -> Result<UpsertOutcome, IndexError> {
        if doc_id.is_empty() {
            return Err(IndexError::invalid("doc_id must not be empty"));
        }
        if embedding.len() != core.config.embedding_dim {
            return Err(IndexError::invalid_for(
                doc_id,
                format!(
                    "embedding has {} components, index expects {}",
                    embedding.len(),
                    core.config.embedding_dim
                ),
            ));
        }
        if !embedding.iter().all(|v| v.is_finite()) {
            return Err(IndexError::invalid_for(
                doc_id,
                "embedding contains non-finite components",
            ));
        }
        validate_metadata(&metadata).map_err(|e| IndexError::InvalidArgument {
            message: e.to_string(),
            doc_id: Some(doc_id.to_string()),
        })?;

        let mut vector = embedding.to_vec();
        if core.config.normalize_embeddings {
            if metric::l2_norm(&vector) == 0.0 {
                return Err(IndexError::invalid_for(
                    doc_id,
                    "zero-norm embedding cannot be normalized",
                ));
            }
            metric::normalize_in_place(&mut vector);
        }

        let now = core.next_timestamp();

        if core.store.label_of(doc_id).is_none() {
            // Insert path.
            self.ensure_capacity(core)?;
            let label = core.store.assign_or_get_label(doc_id);
            core.store
                .put(label, doc_id, &vector, text, metadata, now, now)?;
            {
                let IndexCore {
                    ref mut graph,
                    ref store,
                    ..
                } = *core;
                if let Err(e) = graph.insert(label, &vector, store) {
                    core.store.discard_tail(label);
                    return Err(e.into());
                }
            }
            self.inner.counters.inserts.fetch_add(1, Ordering::Relaxed);
            Ok(UpsertOutcome::Inserted)
        } else {
            // Replace path: tombstone the old label first so a pressure
            // compaction inside this critical section reclaims it.
            let Some((old_label, old_record)) = core.store.erase(doc_id) else {
                return Err(self.poison(format!(
                    "upsert('{doc_id}'): label map and record slots disagree"
                )));
            };
            if core.graph.mark_deleted(old_label).is_err() {
                core.store.reinstate(old_label, old_record);
                return Err(self.poison(format!(
                    "upsert('{doc_id}'): store label {old_label} unknown to the graph"
                )));
            }

            if let Err(e) = self.ensure_capacity(core) {
                // Any pressure failure that did not poison the index left
                // the old pair in place; restore the old document. A
                // poisoned index is past restoring.
                if self.inner.state.load(Ordering::SeqCst) == STATE_OPEN {
                    core.graph.unmark_deleted(old_label);
                    core.store.reinstate(old_label, old_record);
                }
                return Err(e);
            }

            let label = core.store.allocate_label();
            core.store.put(
                label,
                doc_id,
                &vector,
                text,
                metadata,
                old_record.created_at,
                now,
            )?;
            {
                let IndexCore {
                    ref mut graph,
                    ref store,
                    ..
                } = *core;
                if let Err(e) = graph.insert(label, &vector, store) {
                    core.store.discard_tail(label);
                    core.graph.unmark_deleted(old_label);
                    core.store.reinstate(old_label, old_record);
                    return Err(e.into());
                }
            }
            self.inner.counters.updates.fetch_add(1, Ordering::Relaxed);
            Ok(UpsertOutcome::Updated)
        }
    }

    /// Capacity pressure policy: once allocated labels reach `max_elements`,
    /// compact when at least a quarter of live documents are tombstoned,
    /// otherwise grow the soft bound by 50%.
    fn ensure_capacity(&self, core: &mut IndexCore) -> Result<(), IndexError> {
        if (core.graph.node_count() as u64) < core.config.max_elements {
            return Ok(());
        }

        let live = core.graph.size();
        let deleted = core.graph.deleted_count();

        #[allow(clippy::cast_precision_loss)]
        let compactable = deleted > 0
            && (live == 0 || deleted as f64 / live as f64 >= PRESSURE_COMPACT_RATIO);

        if compactable {
            self.compact_locked(core)?;
            if (core.graph.node_count() as u64) < core.config.max_elements {
                return Ok(());
            }
        }

        let max = core.config.max_elements;
        let grown = max.saturating_add(max / 2).max(max.saturating_add(1));
        if grown == max {
            if compactable {
                // State was already rebuilt; nothing left to reclaim.
                return Err(self.poison(format!(
                    "capacity saturated at {max} even after compaction"
                )));
            }
            return Err(IndexError::CapacityExhausted {
                live,
                deleted,
                max_elements: max,
            });
        }
        log::info!(
            "index at capacity ({} labels); raising max_elements {max} -> {grown}",
            core.graph.node_count()
        );
        core.config.max_elements = grown;
        Ok(())
    }

    fn compact_locked(&self, core: &mut IndexCore) -> Result<(), IndexError> {
        let before_live = core.store.len();
        let before_deleted = core.graph.deleted_count();

        let mut new_graph = HnswGraph::new(core.config.hnsw_params(), core.config.rng_seed);
        let mut new_store = DocumentStore::new(core.config.embedding_dim);

        for (old_label, record) in core.store.iterate() {
            let embedding = core.store.embedding(old_label).to_vec();
            let label = new_store.allocate_label();
            new_store.put(
                label,
                &record.doc_id,
                &embedding,
                &record.text,
                record.metadata.clone(),
                record.created_at,
                record.updated_at,
            )?;
            if let Err(e) = new_graph.insert(label, &embedding, &new_store) {
                return Err(IndexError::Internal(format!(
                    "compaction rebuild failed at '{}': {e}",
                    record.doc_id
                )));
            }
        }

        if new_store.len() != before_live || new_graph.deleted_count() != 0 {
            return Err(self.poison(format!(
                "compaction produced {} live documents from {before_live}",
                new_store.len()
            )));
        }

        core.graph = new_graph;
        core.store = new_store;
        self.inner
            .counters
            .last_rebuild_at
            .store(now_ms(), Ordering::Relaxed);
        log::info!(
            "compacted index: {before_live} live documents, {before_deleted} tombstones reclaimed"
        );
        Ok(())
    }

    /// Bookkeeping after successful writes: bump the pending counter and
    /// kick the background snapshot worker if the threshold is crossed.
    fn note_writes(&self, count: u64) {
        self.inner
            .snapshot_pending
            .fetch_add(count, Ordering::Relaxed);
        maybe_spawn_snapshot(&self.inner);
    }
}

/// Spawns the background snapshot worker if the pending-write threshold is
/// crossed and no worker is running. Only one snapshot runs at a time; the
/// counter keeps accumulating while one is in flight and the worker loops
/// until it drops below the threshold.
fn maybe_spawn_snapshot(inner: &Arc<IndexInner>) {
    let interval = inner.sync_interval_docs.load(Ordering::Relaxed);
    if interval == 0 {
        return;
    }
    if inner.snapshot_pending.load(Ordering::Relaxed) < interval {
        return;
    }
    if inner.state.load(Ordering::SeqCst) != STATE_OPEN {
        return;
    }
    if inner.snapshot_running.swap(true, Ordering::SeqCst) {
        return;
    }
    let worker = Arc::clone(inner);
    std::thread::spawn(move || snapshot_worker(&worker));
}

fn snapshot_worker(inner: &Arc<IndexInner>) {
    {
        let _gate = inner.snapshot_gate.lock();
        loop {
            if inner.state.load(Ordering::SeqCst) != STATE_OPEN {
                break;
            }
            let interval = inner.sync_interval_docs.load(Ordering::Relaxed);
            let pending = inner.snapshot_pending.load(Ordering::Relaxed);
            if interval == 0 || pending < interval {
                break;
            }

            // Consistent view under the shared lock; disk I/O without it.
            let (graph, store, config, stats) = {
                let core = inner.core.read();
                let stats = inner.counters.snapshot(
                    core.store.len() as u64,
                    core.graph.deleted_count() as u64,
                    core.memory_usage(),
                );
                (
                    core.graph.clone(),
                    core.store.clone(),
                    core.config.clone(),
                    stats,
                )
            };

            let started = Instant::now();
            match snapshot::write_snapshot(
                &FsIo,
                &config.index_path,
                &graph,
                &store,
                &config,
                &stats,
                now_ms(),
            ) {
                Ok(()) => {
                    let elapsed =
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    inner
                        .counters
                        .last_snapshot_at
                        .store(now_ms(), Ordering::Relaxed);
                    inner
                        .counters
                        .last_snapshot_duration_ms
                        .store(elapsed, Ordering::Relaxed);
                    // Writes that landed after the capture stay counted.
                    inner.snapshot_pending.fetch_sub(pending, Ordering::Relaxed);
                    log::debug!(
                        "auto-snapshot to {} finished in {elapsed}ms",
                        config.index_path.display()
                    );
                }
                Err(e) => {
                    log::warn!(
                        "auto-snapshot to {} failed: {e}",
                        config.index_path.display()
                    );
                    break;
                }
            }
        }
    }
    inner.snapshot_running.store(false, Ordering::SeqCst);
    // A write may have crossed the threshold between the last check and the
    // flag clear; re-kick rather than lose it.
    maybe_spawn_snapshot(inner);
}
