//! Per-level adjacency storage for the HNSW graph (§4.5 "State").

use parking_lot::RwLock;

use super::NodeId;

/// One level's adjacency lists, indexed by node id. Grown lazily as nodes
/// are added at this level; a reader never observes a mid-update list since
/// each node's neighbor vector is replaced atomically under its own lock.
#[derive(Default)]
pub(super) struct Layer {
    neighbors: Vec<RwLock<Vec<NodeId>>>,
}

impl Layer {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn ensure_capacity(&mut self, node_count: usize) {
        while self.neighbors.len() < node_count {
            self.neighbors.push(RwLock::new(Vec::new()));
        }
    }

    pub(super) fn get_neighbors(&self, node: NodeId) -> Vec<NodeId> {
        self.neighbors[node].read().clone()
    }

    pub(super) fn set_neighbors(&self, node: NodeId, neighbors: Vec<NodeId>) {
        *self.neighbors[node].write() = neighbors;
    }

    pub(super) fn add_neighbor(&self, node: NodeId, neighbor: NodeId) {
        self.neighbors[node].write().push(neighbor);
    }

    pub(super) fn remove_neighbor(&self, node: NodeId, neighbor: NodeId) {
        self.neighbors[node].write().retain(|&n| n != neighbor);
    }
}
