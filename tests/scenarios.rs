//! End-to-end scenarios from the core's testable-properties scenario list:
//! cosine ranking and ties, brute-force euclidean routing, scalar-codec
//! round-trip precision, and metadata filter semantics.

use std::sync::Arc;

use serde_json::{json, Map};
use vectra_core::{
    compile, DistanceMetric, Filter, InMemoryRegistry, InMemoryStore, NamespaceConfig,
    SearchEngine, SearchOptions, Transaction, VectorRecord, VectorStore,
};

fn meta(value: serde_json::Value) -> Map<String, serde_json::Value> {
    value.as_object().unwrap().clone()
}

#[test]
fn cosine_ranking_breaks_ties_by_id() {
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(InMemoryRegistry::new());
    registry
        .create(NamespaceConfig::new("cosine-demo", 3, DistanceMetric::Cosine).unwrap())
        .unwrap();

    let tx = Transaction::begin();
    store
        .put(
            "cosine-demo",
            "A",
            VectorRecord::new("A", vec![1.0, 0.0, 0.0], Map::new(), 0).unwrap(),
            &tx,
        )
        .unwrap();
    store
        .put(
            "cosine-demo",
            "B",
            VectorRecord::new("B", vec![0.0, 1.0, 0.0], Map::new(), 0).unwrap(),
            &tx,
        )
        .unwrap();
    store
        .put(
            "cosine-demo",
            "C",
            VectorRecord::new("C", vec![1.0, 0.0, 0.0], Map::new(), 0).unwrap(),
            &tx,
        )
        .unwrap();

    let engine = SearchEngine::new(store, registry);
    let outcome = engine
        .search("cosine-demo", &[1.0, 0.0, 0.0], 3, &SearchOptions::default(), None)
        .unwrap();

    let ids: Vec<&str> = outcome.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "C", "B"]);
    assert!((outcome.results[0].distance - 0.0).abs() < 1e-9);
    assert!((outcome.results[1].distance - 0.0).abs() < 1e-9);
    assert!((outcome.results[2].distance - 1.0).abs() < 1e-9);
}

#[test]
fn euclidean_brute_force_orders_by_distance() {
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(InMemoryRegistry::new());
    registry
        .create(NamespaceConfig::new("euclid-demo", 4, DistanceMetric::Euclidean).unwrap())
        .unwrap();

    let tx = Transaction::begin();
    for (id, v) in [
        ("X", vec![1.0, 1.0, 1.0, 1.0]),
        ("Y", vec![2.0, 2.0, 2.0, 2.0]),
        ("Z", vec![5.0, 5.0, 5.0, 5.0]),
    ] {
        store
            .put("euclid-demo", id, VectorRecord::new(id, v, Map::new(), 0).unwrap(), &tx)
            .unwrap();
    }

    let engine = SearchEngine::new(store, registry);
    let outcome = engine
        .search(
            "euclid-demo",
            &[1.0, 1.0, 1.0, 1.0],
            2,
            &SearchOptions::default(),
            None,
        )
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].id, "X");
    assert!((outcome.results[0].distance - 0.0).abs() < 1e-9);
    assert_eq!(outcome.results[1].id, "Y");
    assert!((outcome.results[1].distance - 2.0).abs() < 1e-9);
}

#[test]
fn scalar_round_trip_preserves_cosine_similarity() {
    use vectra_core::codec::scalar::{encode, ScalarEncodeOptions, ScalarStrategy};
    use vectra_core::distance::{distance, DistanceMetric};

    let original = vec![0.1_f32, 0.5, -0.3, 0.8, -0.7];
    let options = ScalarEncodeOptions {
        strategy: ScalarStrategy::Uniform,
        bits: 8,
        ..ScalarEncodeOptions::default()
    };
    let payload = encode(&original, &options).unwrap();
    let decoded = payload.decode();

    let d = distance(&original, &decoded, DistanceMetric::Cosine).unwrap();
    let cosine_similarity = 1.0 - d;
    assert!(cosine_similarity >= 0.999, "cosine similarity was {cosine_similarity}");
}

#[test]
fn filter_and_gte_matches_exactly_one_record() {
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(InMemoryRegistry::new());
    registry
        .create(NamespaceConfig::new("filter-demo", 2, DistanceMetric::Euclidean).unwrap())
        .unwrap();

    let tx = Transaction::begin();
    let records = [
        ("r1", vec![1.0, 0.0], json!({"type": "A", "year": 2023})),
        ("r2", vec![0.0, 1.0], json!({"type": "A", "year": 2024})),
        ("r3", vec![1.0, 1.0], json!({"type": "B", "year": 2024})),
    ];
    for (id, v, m) in records {
        store
            .put("filter-demo", id, VectorRecord::new(id, v, meta(m), 0).unwrap(), &tx)
            .unwrap();
    }

    let filter: Filter = serde_json::from_value(json!({
        "$and": [
            {"type": "A"},
            {"year": {"$gte": 2024}}
        ]
    }))
    .unwrap();
    compile(&filter).unwrap();

    let engine = SearchEngine::new(store, registry);
    let options = SearchOptions {
        filter: Some(filter),
        include_metadata: true,
        ..SearchOptions::default()
    };
    let outcome = engine
        .search("filter-demo", &[0.0, 1.0], 10, &options, None)
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].id, "r2");
}

#[test]
fn unknown_metric_name_is_rejected() {
    let err = vectra_core::distance_by_name(&[1.0], &[2.0], "does-not-exist").unwrap_err();
    assert!(matches!(err, vectra_core::Error::UnknownMetric(_)));
}
