//! End-to-end HNSW recall and product-quantization asymmetric distance
//! scenarios, plus the regex-safety compile-time rejection scenario.

use std::sync::Arc;

use vectra_core::codec::product::{train, AsymmetricTable, PqTrainOptions};
use vectra_core::distance::{distance, DistanceMetric};
use vectra_core::{compile, Filter, HnswIndex, HnswParams};

fn seeded_unit_vector(dim: usize, seed: u64) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dim)
        .map(|i| ((seed as f32 * 0.37 + i as f32 * 0.91).sin()))
        .collect();
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[test]
fn hnsw_recall_1_self_retrieval() {
    let index = HnswIndex::new(
        HnswParams {
            ef_construction: 200,
            ..HnswParams::default()
        },
        DistanceMetric::Euclidean,
    );

    let dim = 32;
    let vectors: Vec<Vec<f32>> = (0..200).map(|i| seeded_unit_vector(dim, i)).collect();
    for (i, v) in vectors.iter().enumerate() {
        index.insert(&format!("v{i}"), v.clone()).unwrap();
    }

    for (i, v) in vectors.iter().enumerate() {
        let hits = index.search(v, 1, 200, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, format!("v{i}"), "self-retrieval failed for v{i}");
        assert!(hits[0].distance <= 1e-9, "expected near-zero self distance, got {}", hits[0].distance);
    }
}

#[test]
fn hnsw_delete_removes_node_from_results_and_neighbor_lists() {
    let index = HnswIndex::new(HnswParams::default(), DistanceMetric::Euclidean);
    let dim = 16;
    for i in 0..50 {
        index.insert(&format!("v{i}"), seeded_unit_vector(dim, i)).unwrap();
    }

    index.delete("v0").unwrap();
    assert_eq!(index.len(), 49);

    let hits = index.search(&seeded_unit_vector(dim, 0), 49, 200, None).unwrap();
    assert!(hits.iter().all(|h| h.id != "v0"));
}

#[test]
fn hnsw_search_respects_filter_without_breaking_traversal() {
    let index = HnswIndex::new(HnswParams::default(), DistanceMetric::Euclidean);
    let dim = 16;
    for i in 0..100 {
        index.insert(&format!("v{i}"), seeded_unit_vector(dim, i)).unwrap();
    }

    // Only ids with an even suffix "pass" the predicate.
    let predicate = |id: &str| {
        id.trim_start_matches('v')
            .parse::<usize>()
            .map(|n| n % 2 == 0)
            .unwrap_or(false)
    };

    let hits = index
        .search(&seeded_unit_vector(dim, 0), 10, 200, Some(&predicate))
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| predicate(&h.id)));
}

#[test]
fn hnsw_snapshot_round_trips_to_identical_query_results() {
    let index = HnswIndex::new(HnswParams::default(), DistanceMetric::Cosine);
    let dim = 16;
    for i in 0..64 {
        index.insert(&format!("v{i}"), seeded_unit_vector(dim, i)).unwrap();
    }

    let query = seeded_unit_vector(dim, 999);
    let before = index.search(&query, 5, 100, None).unwrap();

    let bytes = index.to_bytes();
    let restored = HnswIndex::from_bytes(&bytes, DistanceMetric::Cosine).unwrap();
    let after = restored.search(&query, 5, 100, None).unwrap();

    let before_ids: Vec<&str> = before.iter().map(|h| h.id.as_str()).collect();
    let after_ids: Vec<&str> = after.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(before_ids, after_ids);
}

#[test]
fn pq_asymmetric_distance_matches_decoded_distance() {
    let dim = 16;
    let training: Vec<Vec<f32>> = (0..300).map(|i| seeded_unit_vector(dim, i)).collect();
    let refs: Vec<&[f32]> = training.iter().map(Vec::as_slice).collect();

    let options = PqTrainOptions {
        subspaces: 4,
        centroids: 16,
        metric: DistanceMetric::Euclidean,
        ..PqTrainOptions::default()
    };
    let codebook = Arc::new(train(&refs, &options).unwrap());

    let query = seeded_unit_vector(dim, 12345);
    let encoded = vectra_core::codec::product::encode(&training[0], &codebook).unwrap();
    let decoded = encoded.decode().unwrap();

    let table = AsymmetricTable::build(&query, Arc::clone(&codebook)).unwrap();
    let asymmetric = table.distance(&encoded).unwrap();
    let direct = distance(&query, &decoded, DistanceMetric::Euclidean).unwrap();

    assert!(
        (asymmetric - direct).abs() < 1e-6,
        "asymmetric={asymmetric} direct={direct}"
    );
}

#[test]
fn nested_unbounded_quantifier_regex_is_rejected_at_compile_time() {
    let filter: Filter = serde_json::from_value(serde_json::json!({
        "field": {"$regex": "(.*)+"}
    }))
    .unwrap();
    assert!(matches!(compile(&filter), Err(vectra_core::Error::BadFilter(_))));
}

#[test]
fn anchored_regex_compiles_and_matches_selectively() {
    let filter: Filter = serde_json::from_value(serde_json::json!({
        "field": {"$regex": "^foo[0-9]+$"}
    }))
    .unwrap();
    let compiled = compile(&filter).unwrap();

    let mut matching = serde_json::Map::new();
    matching.insert("field".to_string(), serde_json::json!("foo123"));
    assert!(compiled.matches(&matching));

    let mut non_matching = serde_json::Map::new();
    non_matching.insert("field".to_string(), serde_json::json!("bar"));
    assert!(!compiled.matches(&non_matching));
}
