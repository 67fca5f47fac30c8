//! HNSW algorithm parameters.

use serde::{Deserialize, Serialize};

/// Distance metric selected for an index.
///
/// Fixed at `open` time and recorded in every snapshot; a graph built with
/// one metric is never searched with another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceKind {
    /// Cosine distance (`1 - dot`) over unit-norm vectors.
    Cosine,
    /// Squared Euclidean distance.
    L2Squared,
}

/// HNSW algorithm parameters.
///
/// # Parameter Guidelines (from the paper)
///
/// - `m`: 12-48 for high recall, 4-8 for speed
/// - `ef_construction`: higher = better build quality, slower build
/// - `ef_search`: higher = better recall, slower search
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Vector dimensionality.
    pub dim: u32,

    /// Max connections per node in layers > 0.
    pub m: u32,

    /// Max connections per node in layer 0 (2 * M, per the algorithm).
    pub m0: u32,

    /// Construction-time candidate list size.
    pub ef_construction: u32,

    /// Default search-time candidate list size.
    pub ef_search: u32,

    /// Distance metric.
    pub metric: DistanceKind,
}

impl HnswParams {
    /// Creates parameters with the algorithm's `m0 = 2 * m` convention.
    #[must_use]
    pub fn new(dim: u32, m: u32, ef_construction: u32, ef_search: u32, metric: DistanceKind) -> Self {
        Self {
            dim,
            m,
            m0: m * 2,
            ef_construction,
            ef_search,
            metric,
        }
    }
}
