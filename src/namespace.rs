//! Namespace configuration: the unit of schema (§3).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};

const RESERVED_NAMES: &[&str] = &["root", "system", "default", "admin"];

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,64}$").expect("valid static regex"));

/// Which index, if any, a namespace maintains over its vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexDescriptor {
    /// No index; every search is a brute-force scan.
    None,
    /// Brute-force scan explicitly requested regardless of scale.
    BruteForce,
    /// Maintain an HNSW approximate index.
    Hnsw,
}

/// Which compression codec, if any, a namespace applies to new vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionDescriptor {
    /// Vectors are stored densely.
    None,
    /// Vectors are scalar-quantized on insert.
    Scalar,
    /// Vectors are product-quantized on insert.
    Product,
}

/// Fixes the schema shared by every record in a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Namespace name, validated against [`validate_name`].
    pub name: String,
    /// Dimension every record in this namespace must have.
    pub dimension: usize,
    /// Default metric used when a query does not override it.
    pub metric: DistanceMetric,
    /// Optional approximate index maintained over this namespace.
    pub index: IndexDescriptor,
    /// Optional compression applied to new vectors.
    pub compression: CompressionDescriptor,
}

impl NamespaceConfig {
    /// Creates a namespace configuration, validating the name and
    /// rejecting a zero dimension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidNamespaceName`] if `name` fails validation,
    /// or [`Error::InvalidFormat`] if `dimension` is zero.
    pub fn new(
        name: impl Into<String>,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        if dimension == 0 {
            return Err(Error::InvalidFormat(
                "namespace dimension must be positive".into(),
            ));
        }
        Ok(Self {
            name,
            dimension,
            metric,
            index: IndexDescriptor::None,
            compression: CompressionDescriptor::None,
        })
    }

    /// Builder-style setter for the index descriptor.
    #[must_use]
    pub const fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.index = index;
        self
    }

    /// Builder-style setter for the compression descriptor.
    #[must_use]
    pub const fn with_compression(mut self, compression: CompressionDescriptor) -> Self {
        self.compression = compression;
        self
    }
}

/// Validates a namespace name against `[A-Za-z0-9_-]{3,64}`, rejecting the
/// reserved names `root`, `system`, `default`, `admin`.
///
/// # Errors
///
/// Returns [`Error::InvalidNamespaceName`] on pattern or reservation
/// violation.
pub fn validate_name(name: &str) -> Result<()> {
    if RESERVED_NAMES.contains(&name) {
        return Err(Error::InvalidNamespaceName(format!(
            "'{name}' is a reserved name"
        )));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(Error::InvalidNamespaceName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_names() {
        assert!(validate_name("tenant-1").is_ok());
        assert!(validate_name("abc").is_ok());
        assert!(validate_name(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn rejects_reserved_names() {
        for reserved in RESERVED_NAMES {
            assert!(validate_name(reserved).is_err());
        }
    }

    #[test]
    fn rejects_bad_length_or_characters() {
        assert!(validate_name("ab").is_err());
        assert!(validate_name(&"a".repeat(65)).is_err());
        assert!(validate_name("bad name").is_err());
        assert!(validate_name("bad!name").is_err());
    }

    #[test]
    fn rejects_zero_dimension() {
        assert!(NamespaceConfig::new("ns1", 0, DistanceMetric::Cosine).is_err());
    }

    #[test]
    fn builder_methods_set_descriptors() {
        let cfg = NamespaceConfig::new("ns1", 128, DistanceMetric::Cosine)
            .unwrap()
            .with_index(IndexDescriptor::Hnsw)
            .with_compression(CompressionDescriptor::Scalar);
        assert_eq!(cfg.index, IndexDescriptor::Hnsw);
        assert_eq!(cfg.compression, CompressionDescriptor::Scalar);
    }
}
