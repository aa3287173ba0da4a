//! Hierarchical Navigable Small World approximate nearest-neighbor graph
//! (§4.5).
//!
//! The node table holds a level and a dense vector per node; neighbor
//! adjacency lives in per-level [`layer::Layer`]s. Lock order is always
//! `nodes` → `layers` → an individual layer's per-node neighbor lock, to
//! avoid deadlock between concurrent readers and the single writer the
//! surrounding [`crate::search`] layer serializes against (§5).

mod layer;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;

use crate::distance::{self, DistanceMetric};
use crate::error::{Error, Result};

use layer::Layer;

pub(crate) type NodeId = usize;

const SNAPSHOT_MAGIC: &[u8; 5] = b"HNSW1";

/// Tuning parameters for an [`HnswIndex`] (§4.5 "Parameters").
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Target neighbors per node at levels >= 1.
    pub m: usize,
    /// Target neighbors per node at level 0, conventionally `2 * m`.
    pub m0: usize,
    /// Level-generation factor `mL`; larger values produce shorter towers.
    pub ml: f64,
    /// Candidate list size during insert.
    pub ef_construction: usize,
    /// Default candidate list size during search.
    pub ef_search: usize,
    /// Hard cap on a node's level.
    pub max_level: usize,
    /// PRNG seed for level sampling.
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            m0: 32,
            ml: 2.0,
            ef_construction: 200,
            ef_search: 200,
            max_level: 5,
            seed: 0x5DEE_CE66_D1A4_B5B5,
        }
    }
}

struct NodeData {
    id: String,
    level: usize,
    vector: Vec<f32>,
}

/// One search result: an external id and its distance from the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// The matched record's id.
    pub id: String,
    /// Distance from the query under the index's metric.
    pub distance: f64,
}

#[derive(Clone, Copy)]
struct ScoredNode(f64, NodeId);

impl PartialEq for ScoredNode {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0 && self.1 == other.1
    }
}
impl Eq for ScoredNode {}
impl PartialOrd for ScoredNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScoredNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then_with(|| self.1.cmp(&other.1))
    }
}

/// A wrapper that reverses [`ScoredNode`]'s ordering, turning a max-heap
/// ([`BinaryHeap`]'s default) into a min-heap for the traversal frontier.
#[derive(Clone, Copy, PartialEq, Eq)]
struct MinScored(ScoredNode);
impl PartialOrd for MinScored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for MinScored {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

/// xorshift64* PRNG, used so level sampling is reproducible across a
/// snapshot round-trip (§4.5 "Persistence": "restores the PRNG state so
/// that further inserts are deterministic").
struct Rng {
    state: AtomicU64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self {
            state: AtomicU64::new(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed }),
        }
    }

    fn next_f64(&self) -> f64 {
        let mut x = self.state.load(AtomicOrdering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state.store(x, AtomicOrdering::Relaxed);
        (x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11) as f64 / (1u64 << 53) as f64
    }

    fn state_snapshot(&self) -> u64 {
        self.state.load(AtomicOrdering::Relaxed)
    }
}

/// A hierarchical navigable small-world graph index over dense `f32`
/// vectors, keyed by opaque external string ids.
pub struct HnswIndex {
    params: HnswParams,
    metric: DistanceMetric,
    dimension: RwLock<Option<usize>>,
    nodes: RwLock<Vec<Option<NodeData>>>,
    layers: RwLock<Vec<Layer>>,
    id_to_node: DashMap<String, NodeId>,
    entry_point: RwLock<Option<NodeId>>,
    free_list: RwLock<Vec<NodeId>>,
    rng: Rng,
}

impl HnswIndex {
    /// Creates an empty index for `metric`.
    #[must_use]
    pub fn new(params: HnswParams, metric: DistanceMetric) -> Self {
        let seed = params.seed;
        Self {
            params,
            metric,
            dimension: RwLock::new(None),
            nodes: RwLock::new(Vec::new()),
            layers: RwLock::new(Vec::new()),
            id_to_node: DashMap::new(),
            entry_point: RwLock::new(None),
            free_list: RwLock::new(Vec::new()),
            rng: Rng::new(seed),
        }
    }

    /// Number of live (non-deleted) nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.id_to_node.len()
    }

    /// True if no nodes are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sample_level(&self) -> usize {
        let mut level = 0;
        while self.rng.next_f64() < 1.0 / self.params.ml && level < self.params.max_level {
            level += 1;
        }
        level
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        let mut dim = self.dimension.write();
        match *dim {
            Some(expected) if expected != vector.len() => Err(Error::DimensionMismatch {
                expected,
                actual: vector.len(),
            }),
            Some(_) => Ok(()),
            None => {
                *dim = Some(vector.len());
                Ok(())
            }
        }
    }

    fn dist(&self, query: &[f32], node: NodeId) -> Result<f64> {
        let nodes = self.nodes.read();
        let data = nodes[node].as_ref().expect("dist against a live node");
        distance::distance(query, &data.vector, self.metric)
    }

    fn ensure_layer_capacity(&self, through_level: usize, node_count: usize) {
        let mut layers = self.layers.write();
        while layers.len() <= through_level {
            layers.push(Layer::new());
        }
        for l in 0..=through_level {
            layers[l].ensure_capacity(node_count);
        }
    }

    /// Inserts `vector` under `id`, replacing any existing record with the
    /// same id (§4.5 "Insert").
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `vector`'s length does not
    /// match the index's established dimension.
    pub fn insert(&self, id: &str, vector: Vec<f32>) -> Result<()> {
        self.check_dimension(&vector)?;
        if self.id_to_node.contains_key(id) {
            self.delete(id)?;
        }

        let level = self.sample_level();
        let node_id = self.allocate_node(id, vector.clone(), level);
        self.ensure_layer_capacity(level, node_id + 1);

        let entry = *self.entry_point.read();
        let Some(entry_id) = entry else {
            *self.entry_point.write() = Some(node_id);
            self.id_to_node.insert(id.to_string(), node_id);
            return Ok(());
        };
        let entry_level = self.node_level(entry_id);

        let mut current = entry_id;
        let mut current_dist = self.dist(&vector, current)?;
        for l in ((level + 1)..=entry_level).rev() {
            loop {
                let neighbors = self.layer_get_neighbors(l, current);
                let mut improved = false;
                for cand in neighbors {
                    let d = self.dist(&vector, cand)?;
                    if d < current_dist {
                        current = cand;
                        current_dist = d;
                        improved = true;
                    }
                }
                if !improved {
                    break;
                }
            }
        }

        for l in (0..=level.min(entry_level)).rev() {
            let candidates = self.search_layer_internal(&vector, current, self.params.ef_construction, l, None)?;
            let budget = if l == 0 { self.params.m0 } else { self.params.m };
            let selected = select_nearest(&candidates, budget);

            self.layer_set_neighbors(l, node_id, selected.clone());
            for &neighbor in &selected {
                self.layer_add_neighbor(l, neighbor, node_id);
                self.prune_neighbor(neighbor, l, budget)?;
            }

            if let Some(&(_, nearest)) = candidates.first() {
                current = nearest;
            }
        }

        if level > entry_level {
            *self.entry_point.write() = Some(node_id);
        }
        self.id_to_node.insert(id.to_string(), node_id);
        Ok(())
    }

    fn node_level(&self, node: NodeId) -> usize {
        self.nodes.read()[node].as_ref().map_or(0, |n| n.level)
    }

    fn layer_get_neighbors(&self, level: usize, node: NodeId) -> Vec<NodeId> {
        self.layers.read()[level].get_neighbors(node)
    }

    fn layer_set_neighbors(&self, level: usize, node: NodeId, neighbors: Vec<NodeId>) {
        self.layers.read()[level].set_neighbors(node, neighbors);
    }

    fn layer_add_neighbor(&self, level: usize, node: NodeId, neighbor: NodeId) {
        self.layers.read()[level].add_neighbor(node, neighbor);
    }

    fn layer_remove_neighbor(&self, level: usize, node: NodeId, neighbor: NodeId) {
        self.layers.read()[level].remove_neighbor(node, neighbor);
    }

    fn prune_neighbor(&self, node: NodeId, level: usize, budget: usize) -> Result<()> {
        let neighbors = self.layer_get_neighbors(level, node);
        if neighbors.len() <= budget {
            return Ok(());
        }
        let node_vector = {
            let nodes = self.nodes.read();
            nodes[node].as_ref().expect("live node").vector.clone()
        };
        let mut scored = Vec::with_capacity(neighbors.len());
        for n in neighbors {
            let d = self.dist(&node_vector, n)?;
            scored.push((d, n));
        }
        let kept = select_nearest(&scored, budget);
        self.layer_set_neighbors(level, node, kept);
        Ok(())
    }

    fn allocate_node(&self, id: &str, vector: Vec<f32>, level: usize) -> NodeId {
        let mut free = self.free_list.write();
        if let Some(slot) = free.pop() {
            let mut nodes = self.nodes.write();
            nodes[slot] = Some(NodeData {
                id: id.to_string(),
                level,
                vector,
            });
            return slot;
        }
        drop(free);
        let mut nodes = self.nodes.write();
        nodes.push(Some(NodeData {
            id: id.to_string(),
            level,
            vector,
        }));
        nodes.len() - 1
    }

    /// Searches for the `k` nearest neighbors of `query` (§4.5 "Search").
    ///
    /// `ef` is the beam width; effective width is `max(ef, k)`. `predicate`,
    /// if given, restricts the kept result set to ids it accepts, while
    /// graph traversal still follows every neighbor regardless (an
    /// unfiltered node is a routing hop, not a result).
    ///
    /// # Errors
    ///
    /// Propagates [`crate::distance`] errors (e.g. dimension mismatch).
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        predicate: Option<&dyn Fn(&str) -> bool>,
    ) -> Result<Vec<SearchHit>> {
        let Some(entry_id) = *self.entry_point.read() else {
            return Ok(Vec::new());
        };
        let entry_level = self.node_level(entry_id);

        let mut current = entry_id;
        let mut current_dist = self.dist(query, current)?;
        for l in (1..=entry_level).rev() {
            loop {
                let neighbors = self.layer_get_neighbors(l, current);
                let mut improved = false;
                for cand in neighbors {
                    let d = self.dist(query, cand)?;
                    if d < current_dist {
                        current = cand;
                        current_dist = d;
                        improved = true;
                    }
                }
                if !improved {
                    break;
                }
            }
        }

        let beam = ef.max(k);
        let candidates = self.search_layer_internal(query, current, beam, 0, predicate)?;

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .take(k)
            .map(|(distance, node)| SearchHit {
                id: self.node_id_string(node),
                distance,
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    fn node_id_string(&self, node: NodeId) -> String {
        self.nodes.read()[node].as_ref().expect("live node").id.clone()
    }

    /// Core best-first beam search at a single layer (§4.5 "Search" step 3).
    /// Returns up to `ef` (distance, node) pairs sorted ascending by
    /// distance, restricted to predicate-accepted ids if one is given.
    fn search_layer_internal(
        &self,
        query: &[f32],
        entry: NodeId,
        ef: usize,
        level: usize,
        predicate: Option<&dyn Fn(&str) -> bool>,
    ) -> Result<Vec<(f64, NodeId)>> {
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        visited.insert(entry);

        let entry_dist = self.dist(query, entry)?;
        let mut frontier: BinaryHeap<MinScored> = BinaryHeap::new();
        frontier.push(MinScored(ScoredNode(entry_dist, entry)));

        let mut kept: BinaryHeap<ScoredNode> = BinaryHeap::new();
        if predicate.is_none_or(|p| p(&self.node_id_string(entry))) {
            kept.push(ScoredNode(entry_dist, entry));
        }

        while let Some(MinScored(ScoredNode(d, node))) = frontier.pop() {
            if kept.len() >= ef {
                if let Some(worst) = kept.peek() {
                    if d > worst.0 {
                        break;
                    }
                }
            }

            let neighbors = self.layer_get_neighbors(level, node);
            for cand in neighbors {
                if !visited.insert(cand) {
                    continue;
                }
                let cd = self.dist(query, cand)?;
                let worst = kept.peek().map(|s| s.0);
                let accepted = predicate.is_none_or(|p| p(&self.node_id_string(cand)));
                if accepted && (kept.len() < ef || worst.is_none_or(|w| cd < w)) {
                    kept.push(ScoredNode(cd, cand));
                    if kept.len() > ef {
                        kept.pop();
                    }
                }
                frontier.push(MinScored(ScoredNode(cd, cand)));
            }
        }

        let mut out: Vec<(f64, NodeId)> = kept.into_iter().map(|s| (s.0, s.1)).collect();
        out.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(out)
    }

    /// Removes `id` from the graph, unlinking it from every neighbor at
    /// every level and promoting a new entry point if needed (§4.5
    /// "Delete"). The graph is not re-optimized afterward.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VectorNotFound`] if `id` is not present.
    pub fn delete(&self, id: &str) -> Result<()> {
        let node_id = self
            .id_to_node
            .remove(id)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::VectorNotFound(id.to_string()))?;
        let level = self.node_level(node_id);

        for l in 0..=level {
            let neighbors = self.layer_get_neighbors(l, node_id);
            for nb in neighbors {
                self.layer_remove_neighbor(l, nb, node_id);
            }
            self.layer_set_neighbors(l, node_id, Vec::new());
        }

        self.nodes.write()[node_id] = None;
        self.free_list.write().push(node_id);

        let mut entry = self.entry_point.write();
        if *entry == Some(node_id) {
            *entry = self.pick_new_entry_point();
        }
        Ok(())
    }

    fn pick_new_entry_point(&self) -> Option<NodeId> {
        let nodes = self.nodes.read();
        nodes
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|n| (id, n.level)))
            .max_by_key(|&(_, level)| level)
            .map(|(id, _)| id)
    }

    /// Serializes the graph to the persisted layout of §6: magic, params,
    /// entry point, node count, then per-node id/level/adjacency.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.extend_from_slice(&(self.params.m as u32).to_le_bytes());
        out.extend_from_slice(&self.params.ml.to_le_bytes());
        out.extend_from_slice(&(self.params.ef_construction as u32).to_le_bytes());
        out.extend_from_slice(&(self.params.max_level as u32).to_le_bytes());
        out.extend_from_slice(&self.rng.state_snapshot().to_le_bytes());
        let metric_name = self.metric.name();
        out.extend_from_slice(&(metric_name.len() as u32).to_le_bytes());
        out.extend_from_slice(metric_name.as_bytes());

        let nodes = self.nodes.read();
        let entry = self.entry_point.read();
        // Persist the entry point's external id, not its slot index: the
        // slab can have holes after deletions, so a slot index does not
        // survive a restore the way an id resolved through `id_to_node`
        // does (§6 "entryPoint id").
        match *entry {
            Some(entry_node) => {
                let entry_id = &nodes[entry_node].as_ref().expect("live entry point").id;
                out.extend_from_slice(&(entry_id.len() as u32).to_le_bytes());
                out.extend_from_slice(entry_id.as_bytes());
            }
            None => out.extend_from_slice(&0u32.to_le_bytes()),
        }
        let live: Vec<(NodeId, &NodeData)> = nodes
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|n| (id, n)))
            .collect();
        out.extend_from_slice(&(live.len() as u32).to_le_bytes());

        for (node_id, data) in live {
            out.extend_from_slice(&(data.id.len() as u32).to_le_bytes());
            out.extend_from_slice(data.id.as_bytes());
            out.extend_from_slice(&(data.level as u32).to_le_bytes());
            out.extend_from_slice(&(data.vector.len() as u32).to_le_bytes());
            for &x in &data.vector {
                out.extend_from_slice(&x.to_le_bytes());
            }
            for l in 0..=data.level {
                let neighbors = self.layer_get_neighbors(l, node_id);
                out.extend_from_slice(&(neighbors.len() as u32).to_le_bytes());
                for n in neighbors {
                    let nb_id = &nodes[n].as_ref().expect("live neighbor").id;
                    out.extend_from_slice(&(nb_id.len() as u32).to_le_bytes());
                    out.extend_from_slice(nb_id.as_bytes());
                }
            }
        }
        out
    }

    /// Reconstructs an index from [`Self::to_bytes`]'s layout, restoring the
    /// PRNG state so later inserts remain deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPayload`] on any magic/length/bounds failure.
    pub fn from_bytes(bytes: &[u8], metric: DistanceMetric) -> Result<Self> {
        let mut cursor = 0usize;
        let take = |cursor: &mut usize, n: usize| -> Result<&[u8]> {
            let end = *cursor + n;
            let slice = bytes
                .get(*cursor..end)
                .ok_or_else(|| Error::CorruptPayload("hnsw snapshot truncated".into()))?;
            *cursor = end;
            Ok(slice)
        };

        if take(&mut cursor, 5)? != SNAPSHOT_MAGIC {
            return Err(Error::CorruptPayload("bad hnsw snapshot magic".into()));
        }
        let m = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
        let ml = f64::from_le_bytes(take(&mut cursor, 8)?.try_into().unwrap());
        let ef_construction = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
        let max_level = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
        let seed = u64::from_le_bytes(take(&mut cursor, 8)?.try_into().unwrap());
        let metric_name_len = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
        let _metric_name = String::from_utf8_lossy(take(&mut cursor, metric_name_len)?).into_owned();

        let entry_id_len = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
        let entry_id = if entry_id_len == 0 {
            None
        } else {
            Some(String::from_utf8_lossy(take(&mut cursor, entry_id_len)?).into_owned())
        };
        let node_count = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;

        let params = HnswParams {
            m,
            m0: 2 * m,
            ml,
            ef_construction,
            ef_search: ef_construction,
            max_level,
            seed,
        };
        let index = Self::new(params, metric);
        index.rng.state.store(seed, AtomicOrdering::Relaxed);

        struct Pending {
            id: String,
            level: usize,
            vector: Vec<f32>,
            neighbor_ids: Vec<Vec<String>>,
        }
        let mut pending = Vec::with_capacity(node_count);

        for _ in 0..node_count {
            let id_len = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
            let id = String::from_utf8_lossy(take(&mut cursor, id_len)?).into_owned();
            let level = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
            let dim = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
            let mut vector = Vec::with_capacity(dim);
            for _ in 0..dim {
                vector.push(f32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()));
            }
            let mut neighbor_ids = Vec::with_capacity(level + 1);
            for _ in 0..=level {
                let count = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
                let mut ids = Vec::with_capacity(count);
                for _ in 0..count {
                    let nlen = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
                    ids.push(String::from_utf8_lossy(take(&mut cursor, nlen)?).into_owned());
                }
                neighbor_ids.push(ids);
            }
            pending.push(Pending {
                id,
                level,
                vector,
                neighbor_ids,
            });
        }

        // First pass: allocate every node so ids resolve to stable NodeIds.
        for p in &pending {
            let node_id = index.allocate_node(&p.id, p.vector.clone(), p.level);
            index.ensure_layer_capacity(p.level, node_id + 1);
            index.id_to_node.insert(p.id.clone(), node_id);
            *index.dimension.write() = Some(p.vector.len());
        }

        // Second pass: wire up adjacency now that every id is known.
        for p in &pending {
            let node_id = *index.id_to_node.get(&p.id).expect("just inserted");
            for (level, ids) in p.neighbor_ids.iter().enumerate() {
                let neighbor_nodes: Vec<NodeId> = ids
                    .iter()
                    .map(|nid| {
                        index
                            .id_to_node
                            .get(nid)
                            .map(|e| *e)
                            .ok_or_else(|| Error::CorruptPayload(format!("unknown neighbor id {nid}")))
                    })
                    .collect::<Result<_>>()?;
                index.layer_set_neighbors(level, node_id, neighbor_nodes);
            }
        }

        *index.entry_point.write() = match entry_id {
            None => None,
            Some(id) => {
                let node_id = *index
                    .id_to_node
                    .get(&id)
                    .ok_or_else(|| Error::CorruptPayload(format!("unknown entry point id {id}")))?;
                Some(node_id)
            }
        };

        Ok(index)
    }
}

/// Selects the `budget` nearest `(distance, node)` pairs (§4.5's "simple
/// heuristic" neighbor selection, deliberately not Vamana-style
/// alpha-diversification).
fn select_nearest(candidates: &[(f64, NodeId)], budget: usize) -> Vec<NodeId> {
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    sorted.into_iter().take(budget).map(|(_, n)| n).collect()
}
