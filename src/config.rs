//! Layered configuration for `vectra-core`.
//!
//! Priority (highest to lowest):
//! 1. Runtime overrides (API)
//! 2. Environment variables (`VECTRA_*`)
//! 3. Configuration file (`vectra.toml`)
//! 4. Default values

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Dotted configuration key.
        key: String,
        /// Human-readable validation failure.
        message: String,
    },
}

/// Search mode presets controlling the recall/latency tradeoff (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// `ef_search = max(k*2, 64)`.
    Fast,
    /// `ef_search = max(k*4, 128)` (default).
    #[default]
    Balanced,
    /// `ef_search = max(k*8, 256)`.
    Accurate,
    /// Forces brute-force scan, 100% recall.
    Perfect,
}

impl SearchMode {
    /// Returns the `ef_search` value for this mode given `k`.
    #[must_use]
    pub fn ef_search(self, k: usize) -> usize {
        match self {
            Self::Fast => (k * 2).max(64),
            Self::Balanced => (k * 4).max(128),
            Self::Accurate => (k * 8).max(256),
            Self::Perfect => usize::MAX,
        }
    }
}

/// Search-related defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default search mode when a query does not specify `ef`.
    pub default_mode: SearchMode,
    /// Explicit `ef_search` override; if set, takes priority over the mode.
    pub ef_search: Option<usize>,
    /// Maximum results returned by a single query.
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_mode: SearchMode::Balanced,
            ef_search: None,
            max_results: 1000,
        }
    }
}

/// HNSW construction defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Target neighbors per node at levels >= 1 (M).
    pub m: usize,
    /// Candidate list size during insert.
    pub ef_construction: usize,
    /// Hard cap on levels.
    pub max_level: usize,
    /// Level-generation factor (mL).
    pub level_factor: f64,
    /// Seed for the level-sampling PRNG.
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            max_level: 5,
            level_factor: 2.0,
            seed: 0x5DEE_CE66_D1A4_B5B5,
        }
    }
}

/// Scalar/product quantization defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizationConfig {
    /// Default scalar bit width, 1..=16.
    pub scalar_bits: u8,
    /// Whether scalar quantization picks its bit width adaptively.
    pub adaptive_bits: bool,
    /// Default PQ subspace count (M).
    pub pq_subspaces: usize,
    /// Default PQ centroid count per subspace (K).
    pub pq_centroids: usize,
    /// Maximum precision loss (1 - cosine similarity) tolerated by the
    /// quality gate when validation is requested.
    pub max_precision_loss: f64,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            scalar_bits: 8,
            adaptive_bits: false,
            pq_subspaces: 8,
            pq_centroids: 256,
            max_precision_loss: 0.01,
        }
    }
}

/// Hard limits the embedding application may want to enforce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum vector dimension accepted.
    pub max_dimensions: usize,
    /// Maximum results per query, independent of `search.max_results`.
    pub max_results_per_query: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_dimensions: 4096,
            max_results_per_query: 10_000,
        }
    }
}

/// Logging defaults, consumed by the embedding application's `tracing`
/// subscriber rather than by this crate directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `error | warn | info | debug | trace`.
    pub level: String,
    /// `text | json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VectraConfig {
    /// Search defaults.
    pub search: SearchConfig,
    /// HNSW construction defaults.
    pub hnsw: HnswConfig,
    /// Quantization defaults.
    pub quantization: QuantizationConfig,
    /// Hard limits.
    pub limits: LimitsConfig,
    /// Logging defaults.
    pub logging: LoggingConfig,
}

impl VectraConfig {
    /// Loads configuration from `vectra.toml` in the current directory,
    /// layered over defaults and under `VECTRA_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if the file or environment
    /// values fail to parse into the expected shape.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("vectra.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if parsing fails. A missing file
    /// is not an error; defaults (and env overrides) still apply.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("VECTRA_").split("_").lowercase(false));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Builds a configuration from a TOML string, layered over defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if the string fails to parse.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates range constraints on every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first out-of-range
    /// field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(4..=128).contains(&self.hnsw.m) {
            return Err(ConfigError::InvalidValue {
                key: "hnsw.m".to_string(),
                message: format!("value {} is out of range [4, 128]", self.hnsw.m),
            });
        }
        if !(100..=2000).contains(&self.hnsw.ef_construction) {
            return Err(ConfigError::InvalidValue {
                key: "hnsw.ef_construction".to_string(),
                message: format!(
                    "value {} is out of range [100, 2000]",
                    self.hnsw.ef_construction
                ),
            });
        }
        if self.hnsw.max_level == 0 || self.hnsw.max_level > 32 {
            return Err(ConfigError::InvalidValue {
                key: "hnsw.max_level".to_string(),
                message: format!("value {} is out of range [1, 32]", self.hnsw.max_level),
            });
        }
        if !(1..=16).contains(&self.quantization.scalar_bits) {
            return Err(ConfigError::InvalidValue {
                key: "quantization.scalar_bits".to_string(),
                message: format!(
                    "value {} is out of range [1, 16]",
                    self.quantization.scalar_bits
                ),
            });
        }
        if self.quantization.pq_centroids == 0 || self.quantization.pq_centroids > 256 {
            return Err(ConfigError::InvalidValue {
                key: "quantization.pq_centroids".to_string(),
                message: format!(
                    "value {} is out of range [1, 256]",
                    self.quantization.pq_centroids
                ),
            });
        }
        if self.limits.max_dimensions == 0 || self.limits.max_dimensions > 65536 {
            return Err(ConfigError::InvalidValue {
                key: "limits.max_dimensions".to_string(),
                message: format!(
                    "value {} is out of range [1, 65536]",
                    self.limits.max_dimensions
                ),
            });
        }
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }
        Ok(())
    }

    /// Returns the effective `ef_search` for a query requesting `k`
    /// results: the explicit override if set, else the mode-derived value.
    #[must_use]
    pub fn effective_ef_search(&self, k: usize) -> usize {
        self.search
            .ef_search
            .unwrap_or_else(|| self.search.default_mode.ef_search(k))
    }

    /// Serializes this configuration back to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(VectraConfig::default().validate().is_ok());
    }

    #[test]
    fn from_toml_overlays_defaults() {
        let cfg = VectraConfig::from_toml("[hnsw]\nm = 32\n").unwrap();
        assert_eq!(cfg.hnsw.m, 32);
        assert_eq!(cfg.hnsw.ef_construction, 200);
    }

    #[test]
    fn validate_rejects_out_of_range_m() {
        let mut cfg = VectraConfig::default();
        cfg.hnsw.m = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn effective_ef_search_prefers_explicit_override() {
        let mut cfg = VectraConfig::default();
        cfg.search.ef_search = Some(999);
        assert_eq!(cfg.effective_ef_search(10), 999);

        cfg.search.ef_search = None;
        assert_eq!(cfg.effective_ef_search(10), 128);
    }

    #[test]
    fn to_toml_round_trips() {
        let cfg = VectraConfig::default();
        let s = cfg.to_toml().unwrap();
        let restored = VectraConfig::from_toml(&s).unwrap();
        assert_eq!(restored.hnsw.m, cfg.hnsw.m);
    }
}
