//! Insert throughput benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docvec::{IndexConfig, VectorIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

fn random_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for &count in &[100usize, 1_000] {
        let vectors = random_vectors(count, 128, 42);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &vectors, |b, vectors| {
            b.iter(|| {
                let mut config = IndexConfig::new(128, "/tmp/docvec-insert-bench");
                config.ef_construction = 100;
                let index = VectorIndex::open(config).unwrap();
                for (i, v) in vectors.iter().enumerate() {
                    index
                        .upsert(&format!("doc-{i}"), v, "", BTreeMap::new(), None)
                        .unwrap();
                }
                index
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert);
criterion_main!(benches);
