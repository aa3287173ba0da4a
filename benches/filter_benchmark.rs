//! Metadata filter compile and evaluate benchmarks.
//!
//! Run with: `cargo bench --bench filter_benchmark`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Map, Value as JsonValue};
use vectra_core::{compile, Filter};

fn sample_metadata(i: u64) -> Map<String, JsonValue> {
    json!({
        "type": if i % 3 == 0 { "A" } else { "B" },
        "year": 2020 + (i % 6) as i64,
        "tags": ["alpha", "beta", "gamma"],
        "score": (i % 100) as f64 / 10.0,
    })
    .as_object()
    .unwrap()
    .clone()
}

fn flat_equality_filter() -> Filter {
    serde_json::from_value(json!({"type": "A"})).unwrap()
}

fn nested_and_or_filter() -> Filter {
    serde_json::from_value(json!({
        "$and": [
            {"$or": [{"type": "A"}, {"year": {"$gte": 2024}}]},
            {"score": {"$gte": 5.0}},
            {"tags": {"$all": ["alpha", "beta"]}}
        ]
    }))
    .unwrap()
}

fn regex_filter() -> Filter {
    serde_json::from_value(json!({"type": {"$regex": "^[AB]$"}})).unwrap()
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_compile");

    group.bench_function("flat_equality", |b| {
        b.iter(|| black_box(compile(&flat_equality_filter()).unwrap()));
    });
    group.bench_function("nested_and_or", |b| {
        b.iter(|| black_box(compile(&nested_and_or_filter()).unwrap()));
    });
    group.bench_function("regex", |b| {
        b.iter(|| black_box(compile(&regex_filter()).unwrap()));
    });

    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_evaluate");

    let records: Vec<_> = (0..10_000).map(sample_metadata).collect();

    let flat = compile(&flat_equality_filter()).unwrap();
    group.bench_function("flat_equality_10k_records", |b| {
        b.iter(|| {
            let count = records.iter().filter(|m| flat.matches(m)).count();
            black_box(count)
        });
    });

    let nested = compile(&nested_and_or_filter()).unwrap();
    group.bench_function("nested_and_or_10k_records", |b| {
        b.iter(|| {
            let count = records.iter().filter(|m| nested.matches(m)).count();
            black_box(count)
        });
    });

    let regex = compile(&regex_filter()).unwrap();
    group.bench_function("regex_10k_records", |b| {
        b.iter(|| {
            let count = records.iter().filter(|m| regex.matches(m)).count();
            black_box(count)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_compile, bench_evaluate);
criterion_main!(benches);
