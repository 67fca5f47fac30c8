use super::params::HnswParams;
use bitvec::prelude::BitVec;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Internal identifier of a vector slot inside the graph.
///
/// Labels are allocated strictly monotonically by the document store and are
/// never reused until `compact()` renumbers the whole index. They are never
/// exposed outside the crate's public surface.
pub type Label = u64;

/// Hard cap on the top layer a node can be assigned.
///
/// The geometric distribution makes higher layers astronomically unlikely;
/// the cap bounds worst-case memory for adversarial RNG states.
const MAX_LEVEL: u8 = 16;

/// Errors that can occur during graph operations.
///
/// Every failure is recoverable by the caller: the graph validates its
/// preconditions before mutating, so an error never leaves a partial
/// insertion behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Vector has wrong dimensionality for this graph.
    #[error("invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension {
        /// Expected dimensions.
        expected: usize,
        /// Actual dimensions provided.
        actual: usize,
    },

    /// The label is already present and live.
    #[error("label {0} already exists")]
    LabelExists(Label),

    /// The label is outside the allocated range.
    #[error("invalid label {0}")]
    InvalidLabel(Label),
}

/// Read-only access to the embedding backing a label.
///
/// The document store owns the float buffer exclusively; the graph only ever
/// sees borrowed slices through this trait.
pub trait VectorProvider {
    /// Returns the embedding stored for `label`.
    fn vector(&self, label: Label) -> &[f32];
}

/// Per-node adjacency: one neighbor list per layer the node participates in.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct GraphNode {
    /// `layers[l]` holds the neighbors at layer `l`; `layers.len() - 1` is
    /// the node's top layer.
    pub(crate) layers: Vec<Vec<Label>>,
}

/// The HNSW graph: a stack of proximity graphs with exponentially shrinking
/// occupancy, plus the tombstone bitmap for logical deletion.
///
/// Deleted labels stay in the graph and keep routing traffic (removing them
/// would tear holes in the navigable small world); they are filtered from
/// results and physically removed only by compaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HnswGraph {
    /// Algorithm parameters, fixed at construction.
    pub(crate) params: HnswParams,

    /// Node adjacency, indexed by label.
    pub(crate) nodes: Vec<GraphNode>,

    /// Tombstone bitmap, indexed by label.
    pub(crate) tombstones: BitVec,

    /// Count of set bits in `tombstones`.
    pub(crate) deleted: usize,

    /// Entry point for searches (highest-layer node).
    pub(crate) entry_point: Option<Label>,

    /// Highest layer currently present in the graph.
    pub(crate) max_layer: u8,

    /// Level probability multiplier (`1 / ln(M)`).
    level_mult: f32,

    /// Deterministic RNG for level sampling. Serialized with the graph so a
    /// reloaded index replays insertions identically.
    rng: ChaCha8Rng,
}

impl HnswGraph {
    /// Creates an empty graph.
    ///
    /// Parameters are validated by the index configuration before they reach
    /// this constructor.
    #[must_use]
    pub fn new(params: HnswParams, rng_seed: u64) -> Self {
        debug_assert!(params.m >= 2, "m must be >= 2");
        debug_assert!(params.m0 >= params.m, "m0 must be >= m");

        let m_float = params.m as f32;
        let level_mult = if m_float > 1.0 { 1.0 / m_float.ln() } else { 0.0 };

        Self {
            params,
            nodes: Vec::new(),
            tombstones: BitVec::new(),
            deleted: 0,
            entry_point: None,
            max_layer: 0,
            level_mult,
            rng: ChaCha8Rng::seed_from_u64(rng_seed),
        }
    }

    /// Samples a top layer for a new node.
    ///
    /// Formula: `floor(-ln(uniform(0,1)) * (1/ln(M)))`, clamped to
    /// [`MAX_LEVEL`].
    pub(crate) fn random_level(&mut self) -> u8 {
        let r: f32 = self.rng.gen_range(f32::EPSILON..=1.0);
        let level = (-r.ln() * self.level_mult).floor();
        if level >= f32::from(MAX_LEVEL) {
            return MAX_LEVEL;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let level = level as u8;
        level
    }

    /// Returns the graph's parameters.
    #[must_use]
    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Number of live (non-tombstoned) labels.
    #[must_use]
    pub fn size(&self) -> usize {
        self.nodes.len() - self.deleted
    }

    /// Number of tombstoned labels still occupying graph slots.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.deleted
    }

    /// Total allocated labels (live + tombstoned).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// True if the graph holds no nodes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if `label` is allocated (live or tombstoned).
    #[must_use]
    pub fn contains(&self, label: Label) -> bool {
        (label as usize) < self.nodes.len()
    }

    /// True if `label` is tombstoned.
    #[must_use]
    pub fn is_deleted(&self, label: Label) -> bool {
        self.tombstones
            .get(label as usize)
            .map_or(false, |b| *b)
    }

    /// Marks `label` as logically deleted. Idempotent.
    ///
    /// The node stays in the graph for routing; `search` will no longer
    /// return it.
    ///
    /// # Returns
    ///
    /// `true` if the label was live and is now tombstoned, `false` if it was
    /// already tombstoned.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidLabel`] if the label was never allocated.
    pub fn mark_deleted(&mut self, label: Label) -> Result<bool, GraphError> {
        let idx = label as usize;
        if idx >= self.nodes.len() {
            return Err(GraphError::InvalidLabel(label));
        }
        if self.tombstones[idx] {
            return Ok(false);
        }
        self.tombstones.set(idx, true);
        self.deleted += 1;
        Ok(true)
    }

    /// Reverts a tombstone. Used only to roll back a failed replace.
    pub(crate) fn unmark_deleted(&mut self, label: Label) {
        let idx = label as usize;
        if idx < self.nodes.len() && self.tombstones[idx] {
            self.tombstones.set(idx, false);
            self.deleted -= 1;
        }
    }

    /// Neighbors of `label` at `level`; empty if the node does not reach
    /// that layer.
    pub(crate) fn neighbors(&self, label: Label, level: u8) -> &[Label] {
        self.nodes[label as usize]
            .layers
            .get(level as usize)
            .map_or(&[], Vec::as_slice)
    }

    /// Entry point label, if the graph is non-empty.
    #[must_use]
    pub fn entry_point(&self) -> Option<Label> {
        self.entry_point
    }

    /// Highest layer currently present.
    #[must_use]
    pub fn max_layer(&self) -> u8 {
        self.max_layer
    }

    /// Approximate resident memory in bytes.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let adjacency: usize = self
            .nodes
            .iter()
            .map(|n| {
                std::mem::size_of::<GraphNode>()
                    + n.layers
                        .iter()
                        .map(|l| l.capacity() * std::mem::size_of::<Label>())
                        .sum::<usize>()
            })
            .sum();
        std::mem::size_of::<Self>() + adjacency + self.tombstones.capacity() / 8
    }

    /// Validates an insertion slot for `label` and installs an empty node.
    ///
    /// Accepts the next fresh label (append) or a previously tombstoned
    /// label (revive); anything else is an error.
    pub(crate) fn claim_slot(&mut self, label: Label) -> Result<(), GraphError> {
        let idx = label as usize;
        if idx == self.nodes.len() {
            self.nodes.push(GraphNode::default());
            self.tombstones.push(false);
            Ok(())
        } else if idx < self.nodes.len() {
            if self.tombstones[idx] {
                // Revive a tombstoned slot: the old adjacency is stale.
                self.tombstones.set(idx, false);
                self.deleted -= 1;
                self.nodes[idx] = GraphNode::default();
                Ok(())
            } else {
                Err(GraphError::LabelExists(label))
            }
        } else {
            Err(GraphError::InvalidLabel(label))
        }
    }
}
