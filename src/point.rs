//! Vector record: a stored vector plus its metadata and access-tracking
//! fields (§3 of the data model).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::codec::CompressedVector;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};

const NORMALIZATION_TOLERANCE: f64 = 1e-6;

/// A vector's payload: either dense floats, or a compressed encoding that
/// carries enough parameters to decode without an external lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VectorData {
    /// Uncompressed dense vector.
    Dense(Vec<f32>),
    /// Codec-compressed payload (scalar or product quantized).
    Compressed(CompressedVector),
}

impl VectorData {
    /// Returns the decoded dense representation, decompressing if needed.
    ///
    /// # Errors
    ///
    /// Propagates codec decode errors for compressed payloads.
    pub fn decode(&self) -> Result<Vec<f32>> {
        match self {
            Self::Dense(v) => Ok(v.clone()),
            Self::Compressed(c) => c.decode(),
        }
    }

    /// The declared dimension of this payload without decoding.
    #[must_use]
    pub fn dimension(&self) -> usize {
        match self {
            Self::Dense(v) => v.len(),
            Self::Compressed(c) => c.dimension(),
        }
    }
}

/// An immutable vector record (mutable only in its access-tracking fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Non-empty opaque id, unique within its namespace.
    pub id: String,
    /// The vector payload, dense or compressed.
    pub data: VectorData,
    /// Declared dimension; must equal the namespace's dimension.
    pub dimension: usize,
    /// Cached L2 norm of the uncompressed vector.
    pub magnitude: f64,
    /// True iff `|magnitude - 1| <= 1e-6`.
    pub normalized: bool,
    /// Arbitrary JSON-shaped metadata.
    pub metadata: Map<String, JsonValue>,
    /// Process-monotonic creation timestamp (ticks, not wall clock).
    pub created_at: u64,
    /// Process-monotonic last-access timestamp.
    pub last_accessed_at: u64,
    /// Number of times this record has been read.
    pub access_count: u64,
}

impl VectorRecord {
    /// Creates a new record from a dense vector and metadata, stamped with
    /// `now` as both creation and last-access time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if the vector is empty or contains
    /// NaN/infinite values.
    pub fn new(
        id: impl Into<String>,
        vector: Vec<f32>,
        metadata: Map<String, JsonValue>,
        now: u64,
    ) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidFormat("record id must be non-empty".into()));
        }
        if vector.is_empty() {
            return Err(Error::InvalidFormat("vector must be non-empty".into()));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidFormat(
                "vector contains NaN or infinite values".into(),
            ));
        }

        let dimension = vector.len();
        let magnitude = l2_norm(&vector);
        let normalized = (magnitude - 1.0).abs() <= NORMALIZATION_TOLERANCE;

        Ok(Self {
            id,
            data: VectorData::Dense(vector),
            dimension,
            magnitude,
            normalized,
            metadata,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        })
    }

    /// Records a read access at time `now`.
    pub fn touch(&mut self, now: u64) {
        self.last_accessed_at = now;
        self.access_count += 1;
    }

    /// Decodes the stored payload to a dense vector.
    ///
    /// # Errors
    ///
    /// Propagates codec decode errors for compressed payloads.
    pub fn decode(&self) -> Result<Vec<f32>> {
        self.data.decode()
    }

    /// Computes the distance from this record's decoded vector to `query`
    /// under `metric`.
    ///
    /// # Errors
    ///
    /// Propagates decode and dimension-mismatch errors.
    pub fn distance_to(&self, query: &[f32], metric: DistanceMetric) -> Result<f64> {
        let decoded = self.decode()?;
        crate::distance::distance(query, &decoded, metric)
    }
}

fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt()
}
