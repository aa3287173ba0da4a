//! # Vectra Core
//!
//! The embedded similarity-search core: a metric kernel, a metadata filter
//! grammar, two vector quantization codecs, an HNSW approximate index, and
//! a search engine that routes queries between them.
//!
//! This crate does not own storage or namespace persistence, a CLI, quota
//! enforcement, or a worker pool — those are external collaborators this
//! crate only depends on through the [`store::VectorStore`] and
//! [`registry::NamespaceRegistry`] traits. An embedder wires a durable
//! implementation of each in; [`store::InMemoryStore`] and
//! [`registry::InMemoryRegistry`] are reference implementations good enough
//! for tests and small embedders that don't need durability.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vectra_core::{
//!     DistanceMetric, InMemoryRegistry, InMemoryStore, NamespaceConfig,
//!     SearchEngine, SearchOptions, Transaction, VectorRecord, VectorStore,
//! };
//!
//! let store = Arc::new(InMemoryStore::new());
//! let registry = Arc::new(InMemoryRegistry::new());
//! registry.create(NamespaceConfig::new("docs", 3, DistanceMetric::Cosine)?)?;
//!
//! let record = VectorRecord::new("a", vec![1.0, 0.0, 0.0], Default::default(), 0)?;
//! store.put("docs", "a", record, &Transaction::begin())?;
//!
//! let engine = SearchEngine::new(store, registry);
//! let outcome = engine.search("docs", &[1.0, 0.0, 0.0], 10, &SearchOptions::default(), None)?;
//! # Ok::<(), vectra_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancellation;
pub mod codec;
pub mod config;
pub mod distance;
pub mod error;
pub mod filter;
pub mod index;
pub mod namespace;
pub mod point;
pub mod registry;
pub mod search;
pub mod store;

pub use cancellation::CancellationToken;
pub use codec::CompressedVector;
pub use config::{ConfigError, HnswConfig, LimitsConfig, LoggingConfig, QuantizationConfig, SearchConfig, SearchMode, VectraConfig};
pub use distance::{distance, distance_by_name, normalize, register_metric, score_from_distance, DistanceMetric};
pub use error::{Error, Result};
pub use filter::{compile, CompiledFilter, Filter};
pub use index::hnsw::{HnswIndex, HnswParams, SearchHit};
pub use namespace::{CompressionDescriptor, IndexDescriptor, NamespaceConfig};
pub use point::{VectorData, VectorRecord};
pub use registry::{InMemoryRegistry, NamespaceRegistry};
pub use search::{SearchEngine, SearchOptions, SearchOutcome, SearchResult};
pub use store::{InMemoryStore, StoreStats, Transaction, VectorStore};
