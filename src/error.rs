//! Error types for `vectra-core`.
//!
//! A single enum covers every failure surfaced by the metric kernel, filter
//! evaluator, codecs, and HNSW index. Error codes follow the pattern
//! `VECTRA-NNN` for easy cross-referencing in logs and bug reports.

use thiserror::Error;

/// Result type alias for `vectra-core` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Field-name fragments that mark a context value as sensitive. Any context
/// string attached to an error whose key contains one of these (case
/// insensitive) is redacted before display.
const SENSITIVE_KEY_FRAGMENTS: &[&str] =
    &["password", "secret", "token", "key", "auth", "credential"];

const MAX_CONTEXT_LEN: usize = 1000;

/// Errors that can occur in `vectra-core` operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Dimension mismatch (VECTRA-001).
    #[error("[VECTRA-001] vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Unknown metric (VECTRA-002).
    #[error("[VECTRA-002] unknown metric '{0}'")]
    UnknownMetric(String),

    /// Filter compilation failure (VECTRA-003).
    #[error("[VECTRA-003] invalid filter: {0}")]
    BadFilter(String),

    /// Vector not found (VECTRA-004).
    #[error("[VECTRA-004] vector '{0}' not found")]
    VectorNotFound(String),

    /// Namespace not found (VECTRA-005).
    #[error("[VECTRA-005] namespace '{0}' not found")]
    NamespaceNotFound(String),

    /// Namespace already exists (VECTRA-006).
    #[error("[VECTRA-006] namespace '{0}' already exists")]
    NamespaceExists(String),

    /// Invalid namespace name (VECTRA-007).
    #[error("[VECTRA-007] invalid namespace name '{0}'")]
    InvalidNamespaceName(String),

    /// Insufficient PQ training data (VECTRA-008).
    #[error("[VECTRA-008] insufficient training data: have {have}, need at least {need}")]
    InsufficientTraining {
        /// Number of training vectors provided.
        have: usize,
        /// Minimum required (K, the centroid count).
        need: usize,
    },

    /// Codec quality gate tripped (VECTRA-009).
    #[error("[VECTRA-009] quality below threshold: {actual} > limit {limit}")]
    QualityBelowThreshold {
        /// Observed precision loss.
        actual: f64,
        /// Configured maximum precision loss.
        limit: f64,
    },

    /// Quota exceeded (VECTRA-010), surfaced from the external store.
    #[error("[VECTRA-010] quota exceeded: used {used}, quota {quota}")]
    QuotaExceeded {
        /// Units currently in use.
        used: u64,
        /// Configured quota.
        quota: u64,
    },

    /// Operation cancelled (VECTRA-011).
    #[error("[VECTRA-011] operation cancelled")]
    Cancelled,

    /// Corrupt persisted payload (VECTRA-012).
    #[error("[VECTRA-012] corrupt payload: {0}")]
    CorruptPayload(String),

    /// Invalid input format (VECTRA-013).
    #[error("[VECTRA-013] invalid format: {0}")]
    InvalidFormat(String),

    /// Configuration error (VECTRA-014).
    #[error("[VECTRA-014] configuration error: {0}")]
    Config(String),

    /// Serialization error (VECTRA-015).
    #[error("[VECTRA-015] serialization error: {0}")]
    Serialization(String),

    /// IO error (VECTRA-016).
    #[error("[VECTRA-016] io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (VECTRA-017).
    ///
    /// Indicates an unexpected internal invariant violation.
    #[error("[VECTRA-017] internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the stable error code (e.g. `"VECTRA-001"`).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "VECTRA-001",
            Self::UnknownMetric(_) => "VECTRA-002",
            Self::BadFilter(_) => "VECTRA-003",
            Self::VectorNotFound(_) => "VECTRA-004",
            Self::NamespaceNotFound(_) => "VECTRA-005",
            Self::NamespaceExists(_) => "VECTRA-006",
            Self::InvalidNamespaceName(_) => "VECTRA-007",
            Self::InsufficientTraining { .. } => "VECTRA-008",
            Self::QualityBelowThreshold { .. } => "VECTRA-009",
            Self::QuotaExceeded { .. } => "VECTRA-010",
            Self::Cancelled => "VECTRA-011",
            Self::CorruptPayload(_) => "VECTRA-012",
            Self::InvalidFormat(_) => "VECTRA-013",
            Self::Config(_) => "VECTRA-014",
            Self::Serialization(_) => "VECTRA-015",
            Self::Io(_) => "VECTRA-016",
            Self::Internal(_) => "VECTRA-017",
        }
    }

    /// Returns true if retrying the operation might succeed.
    ///
    /// Corruption and internal errors are not recoverable; everything else
    /// (bad input, missing resources, cancellation) is.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::CorruptPayload(_) | Self::Internal(_))
    }
}

/// Redacts a context value if its associated key looks sensitive, then
/// truncates it to [`MAX_CONTEXT_LEN`] characters.
///
/// Used when attaching user-supplied context (e.g. a filter's rejected field
/// path, a config key) to an error message for display.
#[must_use]
pub fn redact_context(key: &str, value: &str) -> String {
    let lower = key.to_ascii_lowercase();
    if SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|frag| lower.contains(frag))
    {
        return "[REDACTED]".to_string();
    }
    truncate_context(value)
}

/// Truncates a context string to [`MAX_CONTEXT_LEN`] characters, appending a
/// `[TRUNCATED]` suffix when truncation occurs.
#[must_use]
pub fn truncate_context(value: &str) -> String {
    if value.chars().count() <= MAX_CONTEXT_LEN {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(MAX_CONTEXT_LEN).collect();
    truncated.push_str("[TRUNCATED]");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            Error::DimensionMismatch {
                expected: 3,
                actual: 4
            }
            .code(),
            "VECTRA-001"
        );
        assert_eq!(Error::Cancelled.code(), "VECTRA-011");
    }

    #[test]
    fn corrupt_and_internal_are_unrecoverable() {
        assert!(!Error::CorruptPayload("bad magic".into()).is_recoverable());
        assert!(!Error::Internal("unreachable".into()).is_recoverable());
        assert!(Error::Cancelled.is_recoverable());
        assert!(Error::VectorNotFound("x".into()).is_recoverable());
    }

    #[test]
    fn redacts_sensitive_keys() {
        assert_eq!(redact_context("api_token", "sk-12345"), "[REDACTED]");
        assert_eq!(redact_context("auth_header", "Bearer xyz"), "[REDACTED]");
        assert_eq!(redact_context("category", "tech"), "tech");
    }

    #[test]
    fn truncates_long_context() {
        let long = "x".repeat(1500);
        let truncated = truncate_context(&long);
        assert!(truncated.ends_with("[TRUNCATED]"));
        assert_eq!(truncated.chars().count(), MAX_CONTEXT_LEN + "[TRUNCATED]".len());
    }
}
