//! Index configuration and validation.

use crate::error::IndexError;
use crate::hnsw::{DistanceKind, HnswParams};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a [`VectorIndex`](crate::VectorIndex).
///
/// Validated at `open`; the metric (derived from `normalize_embeddings`)
/// and `embedding_dim` cannot change for the life of the index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Embedding dimensionality. Every admitted vector has exactly this
    /// many components.
    pub embedding_dim: usize,

    /// Soft upper bound on allocated labels (live + tombstoned). Crossing
    /// it triggers the grow-or-compact pressure policy.
    pub max_elements: u64,

    /// Graph connectivity (`M`). Typical range 8-64.
    pub m: u32,

    /// Build-time candidate list size; must be >= `m`.
    pub ef_construction: u32,

    /// Query-time candidate list size; widened to `k` when a query asks for
    /// more results than this.
    pub ef_search: u32,

    /// When true, embeddings are normalized to unit L2 norm on admission
    /// and the index uses cosine distance; otherwise squared Euclidean.
    pub normalize_embeddings: bool,

    /// Auto-snapshot after this many successful writes. 0 disables
    /// auto-snapshotting.
    pub sync_interval_docs: u64,

    /// Expected snapshot cadence in milliseconds, if the operator has one.
    /// Only feeds the health probe: `health()` degrades once the last
    /// snapshot is older than 10x this value.
    pub sync_interval_time: Option<u64>,

    /// Filesystem prefix for snapshots.
    pub index_path: PathBuf,

    /// Seed for the graph's level-sampling RNG. Two indexes built with the
    /// same seed and operation sequence rank identically.
    pub rng_seed: u64,
}

impl IndexConfig {
    /// Creates a configuration with defaults tuned for high recall.
    #[must_use]
    pub fn new(embedding_dim: usize, index_path: impl Into<PathBuf>) -> Self {
        Self {
            embedding_dim,
            max_elements: 1 << 20,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            normalize_embeddings: true,
            sync_interval_docs: 0,
            sync_interval_time: None,
            index_path: index_path.into(),
            rng_seed: 42,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidConfig`] naming the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.embedding_dim == 0 {
            return Err(IndexError::InvalidConfig(
                "embedding_dim must be positive".to_string(),
            ));
        }
        if self.max_elements == 0 {
            return Err(IndexError::InvalidConfig(
                "max_elements must be positive".to_string(),
            ));
        }
        if self.m < 2 {
            return Err(IndexError::InvalidConfig(format!(
                "m must be >= 2, got {}",
                self.m
            )));
        }
        if self.ef_construction < self.m {
            return Err(IndexError::InvalidConfig(format!(
                "ef_construction ({}) must be >= m ({})",
                self.ef_construction, self.m
            )));
        }
        if self.ef_search == 0 {
            return Err(IndexError::InvalidConfig(
                "ef_search must be positive".to_string(),
            ));
        }
        if self.index_path.as_os_str().is_empty() {
            return Err(IndexError::InvalidConfig(
                "index_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The distance metric this configuration implies.
    #[must_use]
    pub fn distance_kind(&self) -> DistanceKind {
        if self.normalize_embeddings {
            DistanceKind::Cosine
        } else {
            DistanceKind::L2Squared
        }
    }

    /// Graph parameters derived from this configuration.
    #[must_use]
    pub fn hnsw_params(&self) -> HnswParams {
        #[allow(clippy::cast_possible_truncation)]
        let dim = self.embedding_dim as u32;
        HnswParams::new(
            dim,
            self.m,
            self.ef_construction,
            self.ef_search,
            self.distance_kind(),
        )
    }
}
