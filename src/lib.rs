//! # docvec
//!
//! A thread-safe, persistent, approximate-nearest-neighbor document index.
//!
//! `docvec` maps external document ids to dense embedding vectors plus text
//! and metadata payloads, serves top-K similarity queries under concurrent
//! read/write load, and persists the whole index as atomically-committed
//! directory snapshots.
//!
//! ## Architecture
//!
//! - **[`VectorIndex`]** — the public contract: upsert/remove/search/get,
//!   snapshot save/load, compaction, stats, health. One reader-writer lock
//!   covers the graph and the document store together; snapshot I/O runs
//!   outside it.
//! - **[`hnsw`]** — the HNSW proximity graph with logical deletion
//!   (tombstones route but never surface) and deterministic, label-ordered
//!   tie-breaking.
//! - **[`store`]** — the doc_id <-> label map, document payloads, and the
//!   contiguous embedding buffer.
//! - **[`snapshot`]** — the on-disk format (`manifest.json`, `graph.bin`,
//!   `vectors.bin`, `documents.jsonl`, `checksum`) and the
//!   write-fsync-rename commit protocol.
//! - **[`bridge`]** — a JSON-value surface for loosely typed hosts.
//!
//! ## Example
//!
//! ```rust
//! use docvec::{IndexConfig, VectorIndex};
//!
//! let config = IndexConfig::new(4, "/tmp/docvec-readme-example");
//! let index = VectorIndex::open(config).unwrap();
//!
//! index
//!     .upsert("a", &[1.0, 0.0, 0.0, 0.0], "alpha", Default::default(), None)
//!     .unwrap();
//! index
//!     .upsert("b", &[0.0, 1.0, 0.0, 0.0], "beta", Default::default(), None)
//!     .unwrap();
//!
//! let hits = index.search(&[1.0, 0.1, 0.0, 0.0], 1, None, None).unwrap();
//! assert_eq!(hits[0].doc_id, "a");
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

/// JSON bridge for host layers.
pub mod bridge;

/// Index configuration.
pub mod config;

/// Unified error handling.
pub mod error;

/// HNSW graph implementation.
pub mod hnsw;

/// The index manager.
pub mod manager;

/// Distance metrics and vector math.
pub mod metric;

/// Snapshot format and atomic persistence.
pub mod snapshot;

/// Statistics and health.
pub mod stats;

/// Document storage.
pub mod store;

pub use bridge::IndexBridge;
pub use config::IndexConfig;
pub use error::IndexError;
pub use manager::{
    BatchRecord, BatchStatus, Deadline, Document, LoadOutcome, RemoveOutcome, SearchFilter,
    SearchHit, UpsertOutcome, VectorIndex,
};
pub use stats::{Health, HealthStatus, IndexStats};
pub use store::metadata::MetadataValue;

/// The crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version string.
///
/// # Example
///
/// ```rust
/// let version = docvec::version();
/// assert!(!version.is_empty());
/// ```
#[must_use]
pub fn version() -> &'static str {
    VERSION
}
