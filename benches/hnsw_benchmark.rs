//! HNSW index insert/search benchmarks.
//!
//! Run with: `cargo bench --bench hnsw_benchmark`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vectra_core::{DistanceMetric, HnswIndex, HnswParams};

/// Deterministic pseudo-random unit vector, stable across runs so benches
/// are comparable without pulling in an RNG dependency here.
fn generate_vector(dim: usize, seed: u64) -> Vec<f32> {
    (0..dim)
        .map(|i| ((seed as f32 * 0.1 + i as f32 * 0.01).sin() + 1.0) / 2.0)
        .collect()
}

fn bench_hnsw_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_insert");

    for count in [1_000, 5_000].iter() {
        let dim = 128;
        group.throughput(Throughput::Elements(*count as u64));

        group.bench_with_input(
            BenchmarkId::new("vectors", format!("{count}x{dim}d")),
            count,
            |b, &count| {
                b.iter(|| {
                    let index = HnswIndex::new(HnswParams::default(), DistanceMetric::Cosine);
                    for i in 0..count {
                        let vector = generate_vector(dim, i as u64);
                        index.insert(&format!("v{i}"), vector).unwrap();
                    }
                    black_box(index.len())
                });
            },
        );
    }

    group.finish();
}

fn bench_hnsw_search_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_search_latency");

    let dim = 128;
    let index = HnswIndex::new(HnswParams::default(), DistanceMetric::Cosine);
    for i in 0..5_000 {
        index.insert(&format!("v{i}"), generate_vector(dim, i)).unwrap();
    }

    let query = generate_vector(dim, 99_999);

    for k in [10, 50, 100].iter() {
        group.bench_with_input(BenchmarkId::new("top_k", k), k, |b, &k| {
            b.iter(|| {
                let hits = index.search(&query, k, 200, None).unwrap();
                black_box(hits)
            });
        });
    }

    group.finish();
}

fn bench_hnsw_search_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_search_throughput");

    let dim = 128;
    let index = HnswIndex::new(HnswParams::default(), DistanceMetric::Cosine);
    for i in 0..5_000 {
        index.insert(&format!("v{i}"), generate_vector(dim, i)).unwrap();
    }

    let queries: Vec<Vec<f32>> = (0..100).map(|i| generate_vector(dim, 100_000 + i)).collect();

    group.throughput(Throughput::Elements(queries.len() as u64));
    group.bench_function("100_queries_top10", |b| {
        b.iter(|| {
            for query in &queries {
                let hits = index.search(query, 10, 200, None).unwrap();
                black_box(hits);
            }
        });
    });

    group.finish();
}

fn bench_distance_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("distance_metrics");

    let dim = 128;
    let query = generate_vector(dim, 0);

    for metric in [DistanceMetric::Cosine, DistanceMetric::Euclidean, DistanceMetric::Dot] {
        let index = HnswIndex::new(HnswParams::default(), metric);
        for i in 0..2_000 {
            index.insert(&format!("v{i}"), generate_vector(dim, i)).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("search", format!("{metric:?}")), &metric, |b, _| {
            b.iter(|| {
                let hits = index.search(&query, 10, 200, None).unwrap();
                black_box(hits)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_hnsw_insert,
    bench_hnsw_search_latency,
    bench_hnsw_search_throughput,
    bench_distance_metrics
);
criterion_main!(benches);
