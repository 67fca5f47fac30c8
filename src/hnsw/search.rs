use super::graph::{GraphError, HnswGraph, Label, VectorProvider};
use super::params::DistanceKind;
use crate::metric::{CosineDistance, L2Squared, Metric};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

/// Bounded best-first search gives up after visiting this multiple of `ef`
/// nodes. Prevents pathological graphs from stalling a query.
const MAX_TRAVERSAL_MULT: usize = 10;

/// A candidate node during search: its distance to the query and its label.
///
/// Ordering is by ascending distance, then ascending label. The label
/// tie-break is what makes search results deterministic across runs.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Candidate {
    /// Distance to the query vector.
    pub distance: f32,
    /// The graph label.
    pub label: Label,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.label == other.label
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.label.cmp(&other.label))
    }
}

/// Reusable buffers for search operations.
///
/// One context serves a whole insertion or query; reusing it across layers
/// avoids re-allocating the heaps and the visited set.
pub(crate) struct SearchContext {
    /// Nodes already expanded or enqueued.
    pub visited: HashSet<Label>,
    /// Min-heap of candidates to explore (nearest first).
    pub candidates: BinaryHeap<Reverse<Candidate>>,
    /// Max-heap of current best results (furthest first, for cheap pruning).
    pub results: BinaryHeap<Candidate>,
    /// Sorted output of the last `search_layer` call, ascending.
    pub scratch: Vec<Candidate>,
    /// Output buffer for neighbor selection.
    pub selected: Vec<Label>,
}

impl SearchContext {
    pub fn new() -> Self {
        Self {
            visited: HashSet::new(),
            candidates: BinaryHeap::new(),
            results: BinaryHeap::new(),
            scratch: Vec::new(),
            selected: Vec::new(),
        }
    }

    /// Clears per-layer state. `selected` survives; callers overwrite it.
    fn clear(&mut self) {
        self.visited.clear();
        self.candidates.clear();
        self.results.clear();
        self.scratch.clear();
    }
}

impl HnswGraph {
    /// Bounded best-first search on a single layer.
    ///
    /// Seeds from `entry`, explores up to `ef * MAX_TRAVERSAL_MULT` nodes,
    /// and leaves the best `ef` results in `ctx.scratch`, sorted ascending.
    ///
    /// Tombstoned nodes route (they stay in `candidates`) but never land in
    /// `results`. The optional `accept` predicate further restricts results
    /// without affecting routing; `None` accepts everything.
    pub(crate) fn search_layer<M: Metric>(
        &self,
        ctx: &mut SearchContext,
        entry: Label,
        query: &[f32],
        ef: usize,
        level: u8,
        provider: &dyn VectorProvider,
        accept: Option<&dyn Fn(Label) -> bool>,
    ) {
        ctx.clear();

        let admits = |label: Label| -> bool {
            !self.is_deleted(label) && accept.map_or(true, |f| f(label))
        };

        let dist = M::distance(query, provider.vector(entry));
        let seed = Candidate {
            distance: dist,
            label: entry,
        };
        ctx.candidates.push(Reverse(seed));
        if admits(entry) {
            ctx.results.push(seed);
        }
        ctx.visited.insert(entry);

        let traversal_limit = ef.saturating_mul(MAX_TRAVERSAL_MULT);
        let mut traversed = 0;

        while let Some(Reverse(candidate)) = ctx.candidates.pop() {
            traversed += 1;
            if traversed > traversal_limit {
                log::warn!(
                    "graph search traversal limit exceeded (ef={ef}, limit={traversal_limit}); stopping early"
                );
                break;
            }

            if let Some(furthest) = ctx.results.peek() {
                if candidate.distance > furthest.distance && ctx.results.len() >= ef {
                    break;
                }
            }

            for &neighbor in self.neighbors(candidate.label, level) {
                if !ctx.visited.insert(neighbor) {
                    continue;
                }

                let d = M::distance(query, provider.vector(neighbor));
                let next = Candidate {
                    distance: d,
                    label: neighbor,
                };

                let should_add = ctx.results.len() < ef
                    || ctx.results.peek().map_or(true, |furthest| next < *furthest);

                if should_add {
                    // Tombstoned nodes are ghosts: they route but never
                    // surface in results.
                    ctx.candidates.push(Reverse(next));
                    if admits(neighbor) {
                        ctx.results.push(next);
                        if ctx.results.len() > ef {
                            ctx.results.pop();
                        }
                    }
                }
            }
        }

        while let Some(c) = ctx.results.pop() {
            ctx.scratch.push(c);
        }
        // Max-heap pops furthest first; reverse to ascending.
        ctx.scratch.reverse();
    }

    /// Searches the graph for the `k` nearest live labels.
    ///
    /// Greedy descent through the upper layers with a single best neighbor,
    /// then a bounded best-first pass at layer 0 with candidate list size
    /// `max(ef, k)`, widened to compensate for tombstones.
    ///
    /// # Returns
    ///
    /// At most `k` `(label, distance)` pairs sorted by ascending distance,
    /// ties broken by ascending label. Tombstoned labels never appear.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidDimension`] if the query has the wrong
    /// dimensionality.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        provider: &dyn VectorProvider,
        accept: Option<&dyn Fn(Label) -> bool>,
    ) -> Result<Vec<(Label, f32)>, GraphError> {
        if query.len() != self.params.dim as usize {
            return Err(GraphError::InvalidDimension {
                expected: self.params.dim as usize,
                actual: query.len(),
            });
        }

        if k == 0 {
            return Ok(Vec::new());
        }

        match self.params.metric {
            DistanceKind::Cosine => Ok(self.search_impl::<CosineDistance>(query, k, ef, provider, accept)),
            DistanceKind::L2Squared => Ok(self.search_impl::<L2Squared>(query, k, ef, provider, accept)),
        }
    }

    fn search_impl<M: Metric>(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        provider: &dyn VectorProvider,
        accept: Option<&dyn Fn(Label) -> bool>,
    ) -> Vec<(Label, f32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };

        let mut ctx = SearchContext::new();
        let mut ep = entry;

        // 1. Greedy descent from the top layer down to layer 1.
        for level in (1..=self.max_layer).rev() {
            self.search_layer::<M>(&mut ctx, ep, query, 1, level, provider, None);
            if let Some(best) = ctx.scratch.first() {
                ep = best.label;
            }
        }

        // 2. Best-first at layer 0, over-fetching to compensate for
        //    tombstones occupying graph slots.
        let ef_eff = self.adjusted_k(k).max(ef).max(k);
        self.search_layer::<M>(&mut ctx, ep, query, ef_eff, 0, provider, accept);

        // 3. Top k. search_layer already excluded tombstones and filter
        //    rejections from results; the re-check here is a final guard.
        let mut out = Vec::with_capacity(k);
        for c in &ctx.scratch {
            if out.len() >= k {
                break;
            }
            if self.is_deleted(c.label) {
                continue;
            }
            out.push((c.label, c.distance));
        }
        out
    }

    /// Widens `k` in proportion to the tombstone ratio so that `k` live
    /// results survive the filtering pass.
    pub(crate) fn adjusted_k(&self, k: usize) -> usize {
        let live = self.size();
        let total = self.node_count();
        if live == 0 || live == total {
            return k;
        }
        let scaled = k.saturating_mul(total) / live + 1;
        scaled.min(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::params::HnswParams;

    pub(crate) struct TestVectors(pub Vec<Vec<f32>>);

    impl VectorProvider for TestVectors {
        fn vector(&self, label: Label) -> &[f32] {
            &self.0[label as usize]
        }
    }

    fn build_graph(vectors: &TestVectors, dim: u32) -> HnswGraph {
        let params = HnswParams::new(dim, 8, 32, 32, DistanceKind::L2Squared);
        let mut graph = HnswGraph::new(params, 42);
        for label in 0..vectors.0.len() as Label {
            graph.insert(label, &vectors.0[label as usize], vectors).unwrap();
        }
        graph
    }

    #[test]
    fn test_candidate_ordering() {
        let c1 = Candidate {
            distance: 1.0,
            label: 1,
        };
        let c2 = Candidate {
            distance: 2.0,
            label: 2,
        };
        assert!(c1 < c2);
    }

    #[test]
    fn test_candidate_tie_break_by_label() {
        let c1 = Candidate {
            distance: 1.0,
            label: 3,
        };
        let c2 = Candidate {
            distance: 1.0,
            label: 7,
        };
        assert!(c1 < c2);
    }

    #[test]
    fn test_search_empty_graph() {
        let params = HnswParams::new(2, 8, 32, 32, DistanceKind::L2Squared);
        let graph = HnswGraph::new(params, 42);
        let provider = TestVectors(vec![]);
        let results = graph.search(&[0.0, 0.0], 5, 32, &provider, None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let params = HnswParams::new(2, 8, 32, 32, DistanceKind::L2Squared);
        let graph = HnswGraph::new(params, 42);
        let provider = TestVectors(vec![]);
        let result = graph.search(&[0.0, 0.0, 0.0], 5, 32, &provider, None);
        assert_eq!(
            result,
            Err(GraphError::InvalidDimension {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_search_finds_nearest() {
        let provider = TestVectors(vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![5.0, 5.0],
        ]);
        let graph = build_graph(&provider, 2);

        let results = graph.search(&[0.9, 0.0], 2, 32, &provider, None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 1);
        assert!(results[0].1 <= results[1].1);
    }

    #[test]
    fn test_search_excludes_tombstones() {
        let provider = TestVectors(vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![2.0, 0.0],
        ]);
        let mut graph = build_graph(&provider, 2);
        graph.mark_deleted(1).unwrap();

        let results = graph.search(&[1.0, 0.0], 3, 32, &provider, None).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(label, _)| *label != 1));
    }

    #[test]
    fn test_search_accept_filter() {
        let provider = TestVectors(vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![2.0, 0.0],
        ]);
        let graph = build_graph(&provider, 2);

        let only_even = |label: Label| label % 2 == 0;
        let results = graph
            .search(&[1.0, 0.0], 3, 32, &provider, Some(&only_even))
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(label, _)| label % 2 == 0));
    }

    #[test]
    fn test_search_deterministic_tie_break() {
        // Two points equidistant from the query: the smaller label wins.
        let provider = TestVectors(vec![
            vec![1.0, 0.0],
            vec![-1.0, 0.0],
        ]);
        let graph = build_graph(&provider, 2);

        let results = graph.search(&[0.0, 0.0], 2, 32, &provider, None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 0);
        assert_eq!(results[1].0, 1);
    }
}
