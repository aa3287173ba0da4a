//! Approximate and exact nearest-neighbor indices (§4.5).

pub mod hnsw;
