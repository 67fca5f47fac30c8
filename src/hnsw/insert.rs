use super::graph::{GraphError, HnswGraph, Label, VectorProvider};
use super::params::DistanceKind;
use super::search::{Candidate, SearchContext};
use crate::metric::{CosineDistance, L2Squared, Metric};

impl HnswGraph {
    /// Inserts `label` into the graph.
    ///
    /// The embedding must already be stored in the provider under `label`;
    /// the graph never copies vector data.
    ///
    /// Algorithm: sample a top layer from the geometric distribution, greedy
    /// descend from the entry point to that layer, then at each layer from
    /// the top down to 0 run a bounded best-first search with
    /// `ef_construction` candidates, connect to the heuristically selected
    /// `M` nearest (`2M` at layer 0), and prune the neighbors' adjacency with
    /// the same heuristic.
    ///
    /// # Preconditions
    ///
    /// `label` is either the next fresh label or a previously tombstoned
    /// label; `vector` has the configured dimensionality.
    ///
    /// # Errors
    ///
    /// - [`GraphError::InvalidDimension`] on a wrong-sized vector.
    /// - [`GraphError::LabelExists`] if the label is live.
    /// - [`GraphError::InvalidLabel`] if the label skips ahead of the
    ///   allocation sequence.
    ///
    /// All validation happens before any mutation; a failed insert leaves
    /// the graph exactly as it was.
    pub fn insert(
        &mut self,
        label: Label,
        vector: &[f32],
        provider: &dyn VectorProvider,
    ) -> Result<(), GraphError> {
        if vector.len() != self.params.dim as usize {
            return Err(GraphError::InvalidDimension {
                expected: self.params.dim as usize,
                actual: vector.len(),
            });
        }

        self.claim_slot(label)?;

        match self.params.metric {
            DistanceKind::Cosine => self.insert_impl::<CosineDistance>(label, vector, provider),
            DistanceKind::L2Squared => self.insert_impl::<L2Squared>(label, vector, provider),
        }

        Ok(())
    }

    fn insert_impl<M: Metric>(
        &mut self,
        label: Label,
        vector: &[f32],
        provider: &dyn VectorProvider,
    ) {
        let level = self.random_level();
        let idx = label as usize;
        self.nodes[idx].layers = vec![Vec::new(); level as usize + 1];

        let Some(entry) = self.entry_point else {
            // First node becomes the entry point.
            self.entry_point = Some(label);
            self.max_layer = level;
            return;
        };

        let mut ctx = SearchContext::new();
        let mut ep = entry;

        // Phase 1: greedy descent from the top layer down to level + 1.
        if level < self.max_layer {
            for lc in ((level + 1)..=self.max_layer).rev() {
                self.search_layer::<M>(&mut ctx, ep, vector, 1, lc, provider, None);
                if let Some(best) = ctx.scratch.first() {
                    ep = best.label;
                }
            }
        }

        // Phase 2: connect at each layer from min(level, max_layer) down to 0.
        let start_layer = level.min(self.max_layer);
        for lc in (0..=start_layer).rev() {
            let ef = self.params.ef_construction as usize;
            self.search_layer::<M>(&mut ctx, ep, vector, ef, lc, provider, None);

            // Best candidate seeds the next (lower) layer.
            let next_ep = ctx.scratch.first().map(|c| c.label);

            let m_max = if lc == 0 {
                self.params.m0
            } else {
                self.params.m
            } as usize;

            {
                // Split borrow: scratch is read, selected is written.
                let SearchContext {
                    ref scratch,
                    ref mut selected,
                    ..
                } = ctx;
                Self::select_neighbors_heuristic::<M>(scratch, m_max, provider, selected);
            }

            self.nodes[idx].layers[lc as usize] = ctx.selected.clone();

            let chosen = std::mem::take(&mut ctx.selected);
            for &neighbor in &chosen {
                self.connect::<M>(neighbor, label, lc, provider);
            }
            ctx.selected = chosen;

            if let Some(best) = next_ep {
                ep = best;
            }
        }

        // Phase 3: a node above the current top layer becomes the new entry.
        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(label);
        }
    }

    /// The HNSW neighbor selection heuristic.
    ///
    /// Walks candidates in ascending distance and keeps one only if no
    /// already-kept neighbor is strictly closer to it than the query is.
    /// This spreads the kept set across directions instead of clustering it,
    /// which is what keeps recall high at low `M`.
    fn select_neighbors_heuristic<M: Metric>(
        candidates: &[Candidate],
        m: usize,
        provider: &dyn VectorProvider,
        output: &mut Vec<Label>,
    ) {
        output.clear();

        for c in candidates {
            if output.len() >= m {
                break;
            }

            let c_vec = provider.vector(c.label);
            let mut closer_to_existing = false;

            for &kept in output.iter() {
                let dist_c_kept = M::distance(c_vec, provider.vector(kept));
                if dist_c_kept < c.distance {
                    closer_to_existing = true;
                    break;
                }
            }

            if !closer_to_existing {
                output.push(c.label);
            }
        }
    }

    /// Adds `target` to `source`'s adjacency at `level`, pruning with the
    /// selection heuristic if the list overflows `M` (`2M` at layer 0).
    fn connect<M: Metric>(
        &mut self,
        source: Label,
        target: Label,
        level: u8,
        provider: &dyn VectorProvider,
    ) {
        let s = source as usize;
        let lv = level as usize;

        if lv >= self.nodes[s].layers.len() {
            return;
        }
        if self.nodes[s].layers[lv].contains(&target) {
            return;
        }
        self.nodes[s].layers[lv].push(target);

        let m_max = if level == 0 {
            self.params.m0
        } else {
            self.params.m
        } as usize;

        if self.nodes[s].layers[lv].len() <= m_max {
            return;
        }

        // Overflow: re-rank the list from the source's perspective and keep
        // the heuristic selection.
        let source_vec = provider.vector(source);
        let mut candidates: Vec<Candidate> = self.nodes[s].layers[lv]
            .iter()
            .map(|&n| Candidate {
                distance: M::distance(source_vec, provider.vector(n)),
                label: n,
            })
            .collect();
        candidates.sort_unstable();

        let mut kept = Vec::with_capacity(m_max);
        Self::select_neighbors_heuristic::<M>(&candidates, m_max, provider, &mut kept);
        self.nodes[s].layers[lv] = kept;
    }
}
