//! Query routing between the exact brute-force path and an attached HNSW
//! index (§4.6).

use std::collections::BinaryHeap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value as JsonValue};

use crate::cancellation::CancellationToken;
use crate::distance::{self, score_from_distance, DistanceMetric};
use crate::error::Result;
use crate::filter::{compile, CompiledFilter, Filter};
use crate::index::hnsw::HnswIndex;
use crate::registry::NamespaceRegistry;
use crate::store::VectorStore;

/// Number of records scanned between cancellation checks during a
/// brute-force search (§5 "Suspension points": "a configurable batch
/// boundary during brute-force scan").
const SCAN_BATCH: usize = 256;

/// The beam width a delegated-to-HNSW search uses when the caller does not
/// specify one (§4.6 "Routing").
const DEFAULT_EF: usize = 50;

/// Per-query options (§4.6).
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Metadata filter tree, compiled and applied during the search.
    pub filter: Option<Filter>,
    /// Overrides the namespace's default metric for this query.
    pub metric_override: Option<DistanceMetric>,
    /// Include the matched record's decoded vector in each result.
    pub include_vector: bool,
    /// Include the matched record's metadata in each result.
    pub include_metadata: bool,
    /// Overrides the HNSW beam width for this query.
    pub ef: Option<usize>,
}

/// One ranked match (§4.6 "Result").
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The matched record's id.
    pub id: String,
    /// Distance from the query under the effective metric.
    pub distance: f64,
    /// Score derived from `distance` (§4.1's mapping).
    pub score: f64,
    /// The decoded vector, present iff `include_vector` was set.
    pub vector: Option<Vec<f32>>,
    /// The record's metadata, present iff `include_metadata` was set.
    pub metadata: Option<Map<String, JsonValue>>,
}

/// The outcome of a search: ranked results, plus whether cancellation cut
/// it short (§5 "Cancellation": "searches return their best partial result
/// sorted as usual, tagged as cancelled").
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Ranked results, ascending by distance, truncated to `k`.
    pub results: Vec<SearchResult>,
    /// True if a cancellation signal cut the search short.
    pub cancelled: bool,
}

struct HeapEntry {
    distance: f64,
    id: String,
    vector: Option<Vec<f32>>,
    metadata: Option<Map<String, JsonValue>>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.id == other.id
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap by distance, so the worst-ranked kept result is the one
        // `BinaryHeap::pop` evicts when the bounded set overflows `k`.
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Ties together a vector store, a namespace registry, and zero or more
/// attached HNSW indices to answer [`SearchOptions`]-governed queries.
pub struct SearchEngine {
    store: Arc<dyn VectorStore>,
    registry: Arc<dyn NamespaceRegistry>,
    indices: DashMap<String, Arc<HnswIndex>>,
}

impl SearchEngine {
    /// Creates an engine over the given store and registry, with no indices
    /// attached.
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, registry: Arc<dyn NamespaceRegistry>) -> Self {
        Self {
            store,
            registry,
            indices: DashMap::new(),
        }
    }

    /// Attaches an HNSW index to `namespace`, so future searches route to
    /// it when eligible (§4.6 "Routing").
    pub fn attach_index(&self, namespace: &str, index: Arc<HnswIndex>) {
        self.indices.insert(namespace.to_string(), index);
    }

    /// Detaches `namespace`'s HNSW index, if any; future searches fall back
    /// to brute force.
    pub fn detach_index(&self, namespace: &str) {
        self.indices.remove(namespace);
    }

    /// Searches `namespace` for the `k` nearest neighbors of `query`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::NamespaceNotFound`] if the namespace is
    /// unregistered, [`crate::error::Error::BadFilter`] if `options.filter`
    /// fails to compile, and propagates distance/decode errors.
    pub fn search(
        &self,
        namespace: &str,
        query: &[f32],
        k: usize,
        options: &SearchOptions,
        cancellation: Option<&CancellationToken>,
    ) -> Result<SearchOutcome> {
        let config = self.registry.get(namespace)?;
        let metric = options.metric_override.unwrap_or(config.metric);
        let compiled = options.filter.as_ref().map(compile).transpose()?;

        let attached = self.indices.get(namespace).map(|e| Arc::clone(e.value()));
        if let Some(index) = attached {
            if k <= index.len() {
                return self.search_via_index(namespace, &index, query, k, metric, options, compiled.as_ref());
            }
        }
        self.search_brute_force(namespace, query, k, metric, options, compiled.as_ref(), cancellation)
    }

    fn search_via_index(
        &self,
        namespace: &str,
        index: &HnswIndex,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        options: &SearchOptions,
        compiled: Option<&CompiledFilter>,
    ) -> Result<SearchOutcome> {
        let ef = options.ef.unwrap_or(DEFAULT_EF);
        let predicate_fn = compiled.map(|c| {
            move |id: &str| {
                self.store
                    .get(namespace, id)
                    .map(|record| c.matches(&record.metadata))
                    .unwrap_or(false)
            }
        });
        let predicate: Option<&dyn Fn(&str) -> bool> =
            predicate_fn.as_ref().map(|f| f as &dyn Fn(&str) -> bool);

        let hits = index.search(query, k, ef, predicate)?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let record = self.store.get(namespace, &hit.id)?;
            let vector = options.include_vector.then(|| record.decode()).transpose()?;
            let metadata = options.include_metadata.then(|| record.metadata.clone());
            results.push(SearchResult {
                id: hit.id,
                distance: hit.distance,
                score: score_from_distance(hit.distance, metric),
                vector,
                metadata,
            });
        }
        Ok(SearchOutcome {
            results,
            cancelled: false,
        })
    }

    fn search_brute_force(
        &self,
        namespace: &str,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        options: &SearchOptions,
        compiled: Option<&CompiledFilter>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<SearchOutcome> {
        let filter_hint_fn = compiled.map(|c| move |record: &crate::point::VectorRecord| c.matches(&record.metadata));
        let filter_hint: Option<&dyn Fn(&crate::point::VectorRecord) -> bool> =
            filter_hint_fn.as_ref().map(|f| f as &dyn Fn(&crate::point::VectorRecord) -> bool);
        let records = self.store.scan(namespace, filter_hint);

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
        let mut cancelled = false;

        for (i, record) in records.iter().enumerate() {
            if i % SCAN_BATCH == 0 {
                if let Some(token) = cancellation {
                    if token.is_cancelled() {
                        cancelled = true;
                        break;
                    }
                }
            }
            if let Some(c) = compiled {
                if !c.matches(&record.metadata) {
                    continue;
                }
            }
            let decoded = record.decode()?;
            let distance = distance::distance(query, &decoded, metric)?;

            if heap.len() < k {
                heap.push(HeapEntry {
                    distance,
                    id: record.id.clone(),
                    vector: options.include_vector.then(|| decoded.clone()),
                    metadata: options.include_metadata.then(|| record.metadata.clone()),
                });
            } else if let Some(worst) = heap.peek() {
                if distance.total_cmp(&worst.distance).then_with(|| record.id.cmp(&worst.id))
                    == std::cmp::Ordering::Less
                {
                    heap.pop();
                    heap.push(HeapEntry {
                        distance,
                        id: record.id.clone(),
                        vector: options.include_vector.then(|| decoded.clone()),
                        metadata: options.include_metadata.then(|| record.metadata.clone()),
                    });
                }
            }
        }

        let mut entries: Vec<HeapEntry> = heap.into_vec();
        entries.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        entries.truncate(k);

        let results = entries
            .into_iter()
            .map(|e| SearchResult {
                score: score_from_distance(e.distance, metric),
                id: e.id,
                distance: e.distance,
                vector: e.vector,
                metadata: e.metadata,
            })
            .collect();

        Ok(SearchOutcome { results, cancelled })
    }
}
