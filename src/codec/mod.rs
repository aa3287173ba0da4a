//! Vector compression codecs (§4.3, §4.4): scalar and product quantization,
//! unified behind [`CompressedVector`] so [`crate::point::VectorData`] can
//! hold either without knowing which.

pub mod product;
pub mod scalar;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A compressed vector payload, tagged by which codec produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum CompressedVector {
    /// Scalar-quantized payload (§4.3).
    Scalar(scalar::ScalarPayload),
    /// Product-quantized payload (§4.4).
    Product(product::ProductPayload),
}

impl CompressedVector {
    /// Decodes back to a dense `f32` vector.
    ///
    /// # Errors
    ///
    /// Propagates the underlying codec's decode errors (e.g. an unregistered
    /// product-quantization codebook).
    pub fn decode(&self) -> Result<Vec<f32>> {
        match self {
            Self::Scalar(payload) => Ok(payload.decode()),
            Self::Product(payload) => payload.decode(),
        }
    }

    /// The declared dimension of this payload without decoding.
    ///
    /// For scalar payloads this is exact. For product payloads it requires
    /// the codebook to be registered; if it is not, `0` is returned rather
    /// than propagating an error, since dimension is advisory metadata and
    /// every other operation on the payload will surface the same lookup
    /// failure anyway.
    #[must_use]
    pub fn dimension(&self) -> usize {
        match self {
            Self::Scalar(payload) => payload.dimension(),
            Self::Product(payload) => payload.dimension().unwrap_or(0),
        }
    }
}
