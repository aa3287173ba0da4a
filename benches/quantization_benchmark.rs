//! Scalar and product quantization encode/decode/distance benchmarks.
//!
//! Run with: `cargo bench --bench quantization_benchmark`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vectra_core::codec::product::{train, AsymmetricTable, PqTrainOptions};
use vectra_core::codec::scalar::{encode, ScalarEncodeOptions, ScalarStrategy};
use vectra_core::DistanceMetric;

fn generate_vector(dim: usize, seed: u64) -> Vec<f32> {
    (0..dim)
        .map(|i| ((seed as f32 * 0.1 + i as f32 * 0.01).sin() + 1.0) / 2.0)
        .collect()
}

fn bench_scalar_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalar_encode");

    for bits in [4u8, 8, 16] {
        let dim = 768;
        let vector = generate_vector(dim, 1);
        group.throughput(Throughput::Elements(dim as u64));

        group.bench_with_input(BenchmarkId::new("bits", bits), &bits, |b, &bits| {
            let options = ScalarEncodeOptions {
                strategy: ScalarStrategy::Uniform,
                bits,
                ..ScalarEncodeOptions::default()
            };
            b.iter(|| black_box(encode(&vector, &options).unwrap()));
        });
    }

    group.finish();
}

fn bench_scalar_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalar_decode");

    let dim = 768;
    let vector = generate_vector(dim, 1);
    let options = ScalarEncodeOptions {
        strategy: ScalarStrategy::PerDimension,
        bits: 8,
        ..ScalarEncodeOptions::default()
    };
    let payload = encode(&vector, &options).unwrap();

    group.throughput(Throughput::Elements(dim as u64));
    group.bench_function("per_dimension_8bit", |b| {
        b.iter(|| black_box(payload.decode()));
    });

    group.finish();
}

fn bench_pq_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("pq_training");
    group.sample_size(10);

    let dim = 128;
    let training: Vec<Vec<f32>> = (0..2_000).map(|i| generate_vector(dim, i)).collect();
    let refs: Vec<&[f32]> = training.iter().map(Vec::as_slice).collect();

    for subspaces in [4usize, 8, 16] {
        group.bench_with_input(BenchmarkId::new("subspaces", subspaces), &subspaces, |b, &subspaces| {
            let options = PqTrainOptions {
                subspaces,
                centroids: 64,
                max_iterations: 10,
                metric: DistanceMetric::Euclidean,
                ..PqTrainOptions::default()
            };
            b.iter(|| black_box(train(&refs, &options).unwrap()));
        });
    }

    group.finish();
}

fn bench_pq_asymmetric_distance(c: &mut Criterion) {
    let mut group = c.benchmark_group("pq_asymmetric_distance");

    let dim = 128;
    let training: Vec<Vec<f32>> = (0..2_000).map(|i| generate_vector(dim, i)).collect();
    let refs: Vec<&[f32]> = training.iter().map(Vec::as_slice).collect();
    let options = PqTrainOptions {
        subspaces: 8,
        centroids: 256,
        metric: DistanceMetric::Euclidean,
        ..PqTrainOptions::default()
    };
    let codebook = Arc::new(train(&refs, &options).unwrap());

    let encoded: Vec<_> = training
        .iter()
        .take(1_000)
        .map(|v| vectra_core::codec::product::encode(v, &codebook).unwrap())
        .collect();
    let query = generate_vector(dim, 99_999);
    let table = AsymmetricTable::build(&query, Arc::clone(&codebook)).unwrap();

    group.throughput(Throughput::Elements(encoded.len() as u64));
    group.bench_function("1000_candidates", |b| {
        b.iter(|| {
            for payload in &encoded {
                black_box(table.distance(payload).unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_scalar_encode,
    bench_scalar_decode,
    bench_pq_training,
    bench_pq_asymmetric_distance
);
criterion_main!(benches);
