//! ANN quality: recall@10 against brute force on a synthetic corpus of
//! uniformly random unit vectors.

use docvec::{IndexConfig, VectorIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};

fn random_unit_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    loop {
        let v: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-3 {
            return v.iter().map(|x| x / norm).collect();
        }
    }
}

fn brute_force_top_k(corpus: &[Vec<f32>], query: &[f32], k: usize) -> Vec<usize> {
    let mut scored: Vec<(f32, usize)> = corpus
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let dot: f32 = v.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
            (dot, i)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, i)| i).collect()
}

fn measure_recall(num_vectors: usize, num_queries: usize, dim: usize, ef_search: u32) -> f64 {
    const K: usize = 10;
    let mut rng = StdRng::seed_from_u64(42);

    let mut config = IndexConfig::new(dim, "/tmp/docvec-recall");
    config.m = 16;
    config.ef_construction = 200;
    config.ef_search = ef_search;
    config.normalize_embeddings = true;
    let index = VectorIndex::open(config).unwrap();

    let corpus: Vec<Vec<f32>> = (0..num_vectors)
        .map(|_| random_unit_vector(&mut rng, dim))
        .collect();
    for (i, v) in corpus.iter().enumerate() {
        index
            .upsert(&format!("v{i}"), v, "", BTreeMap::new(), None)
            .unwrap();
    }

    let mut matched = 0usize;
    let mut expected = 0usize;
    for _ in 0..num_queries {
        let query = random_unit_vector(&mut rng, dim);

        let truth: HashSet<String> = brute_force_top_k(&corpus, &query, K)
            .into_iter()
            .map(|i| format!("v{i}"))
            .collect();
        let hits = index.search(&query, K, None, None).unwrap();

        expected += truth.len();
        matched += hits.iter().filter(|h| truth.contains(&h.doc_id)).count();
    }

    #[allow(clippy::cast_precision_loss)]
    let recall = matched as f64 / expected as f64;
    recall
}

/// Fast smoke version of the recall bound, kept in the default test run.
#[test]
fn recall_at_10_smoke() {
    let recall = measure_recall(1_000, 50, 32, 64);
    assert!(
        recall >= 0.95,
        "recall@10 {recall:.3} below 0.95 on 1k corpus"
    );
}

/// The full-size recall target: 10k uniformly random unit vectors,
/// recall@10 >= 0.95 at ef_search = 64. Minutes-long in debug builds, so
/// ignored by default; run with `cargo test --release -- --ignored`.
#[test]
#[ignore = "slow: builds a 10k-vector index"]
fn recall_at_10_full_corpus() {
    let recall = measure_recall(10_000, 100, 32, 64);
    assert!(
        recall >= 0.95,
        "recall@10 {recall:.3} below 0.95 on 10k corpus"
    );
}
