//! The metric kernel: named distance functions, score mapping, and a
//! process-wide registry for custom metrics.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Built-in distance metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 − cosine similarity`.
    Cosine,
    /// L2 (Euclidean) distance.
    Euclidean,
    /// L1 (Manhattan) distance.
    Manhattan,
    /// Negated dot product (smaller is better).
    Dot,
    /// Fraction of dimensions that disagree in sign.
    Hamming,
    /// `1 −` generalized Jaccard similarity.
    Jaccard,
}

impl DistanceMetric {
    /// Returns whether higher scores indicate more similarity for this
    /// metric's distance-to-score mapping (all of them, by construction).
    #[must_use]
    pub const fn higher_is_better(self) -> bool {
        true
    }

    /// The metric's stable lowercase name, used in wire/persisted formats.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::Manhattan => "manhattan",
            Self::Dot => "dot",
            Self::Hamming => "hamming",
            Self::Jaccard => "jaccard",
        }
    }
}

/// Evaluates `distance(a, b)` under a named built-in metric.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if `a.len() != b.len()`.
pub fn distance(a: &[f32], b: &[f32], metric: DistanceMetric) -> Result<f64> {
    check_dims(a, b)?;
    Ok(match metric {
        DistanceMetric::Cosine => cosine_distance(a, b),
        DistanceMetric::Euclidean => euclidean_distance(a, b),
        DistanceMetric::Manhattan => manhattan_distance(a, b),
        DistanceMetric::Dot => dot_distance(a, b),
        DistanceMetric::Hamming => hamming_distance(a, b),
        DistanceMetric::Jaccard => jaccard_distance(a, b),
    })
}

/// Evaluates `distance(query, candidate)` for every candidate, in order.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] on the first candidate whose length
/// disagrees with `query`.
pub fn batch_distance(
    query: &[f32],
    candidates: &[&[f32]],
    metric: DistanceMetric,
) -> Result<Vec<f64>> {
    candidates.iter().map(|c| distance(query, c, metric)).collect()
}

/// Maps a distance value to a "higher is better" similarity score under the
/// given metric's convention.
#[must_use]
pub fn score_from_distance(d: f64, metric: DistanceMetric) -> f64 {
    match metric {
        DistanceMetric::Cosine => 1.0 - d / 2.0,
        DistanceMetric::Euclidean | DistanceMetric::Manhattan => (-d).exp(),
        DistanceMetric::Dot => -d,
        DistanceMetric::Hamming | DistanceMetric::Jaccard => 1.0 - d,
    }
}

fn check_dims(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// Returns true if a 4-wide unrolled fast path should be used for this
/// dimension, per the kernel's contract (D >= 16).
#[inline]
fn use_fast_path(len: usize) -> bool {
    len >= 16
}

// ---------------------------------------------------------------------
// Euclidean
// ---------------------------------------------------------------------

fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    sum_squared_diff(a, b).sqrt()
}

fn sum_squared_diff(a: &[f32], b: &[f32]) -> f64 {
    if !use_fast_path(a.len()) {
        return a
            .iter()
            .zip(b)
            .map(|(x, y)| f64::from(x - y) * f64::from(x - y))
            .sum();
    }

    let chunks = a.len() / 4;
    let mut sum0 = 0.0f64;
    let mut sum1 = 0.0f64;
    let mut sum2 = 0.0f64;
    let mut sum3 = 0.0f64;

    for i in 0..chunks {
        let base = i * 4;
        let d0 = f64::from(a[base] - b[base]);
        let d1 = f64::from(a[base + 1] - b[base + 1]);
        let d2 = f64::from(a[base + 2] - b[base + 2]);
        let d3 = f64::from(a[base + 3] - b[base + 3]);
        sum0 += d0 * d0;
        sum1 += d1 * d1;
        sum2 += d2 * d2;
        sum3 += d3 * d3;
    }

    let mut total = sum0 + sum1 + sum2 + sum3;
    for i in (chunks * 4)..a.len() {
        let d = f64::from(a[i] - b[i]);
        total += d * d;
    }
    total
}

// ---------------------------------------------------------------------
// Manhattan
// ---------------------------------------------------------------------

fn manhattan_distance(a: &[f32], b: &[f32]) -> f64 {
    if !use_fast_path(a.len()) {
        return a.iter().zip(b).map(|(x, y)| f64::from((x - y).abs())).sum();
    }

    let chunks = a.len() / 4;
    let mut sum0 = 0.0f64;
    let mut sum1 = 0.0f64;
    let mut sum2 = 0.0f64;
    let mut sum3 = 0.0f64;

    for i in 0..chunks {
        let base = i * 4;
        sum0 += f64::from((a[base] - b[base]).abs());
        sum1 += f64::from((a[base + 1] - b[base + 1]).abs());
        sum2 += f64::from((a[base + 2] - b[base + 2]).abs());
        sum3 += f64::from((a[base + 3] - b[base + 3]).abs());
    }

    let mut total = sum0 + sum1 + sum2 + sum3;
    for i in (chunks * 4)..a.len() {
        total += f64::from((a[i] - b[i]).abs());
    }
    total
}

// ---------------------------------------------------------------------
// Dot / cosine
// ---------------------------------------------------------------------

fn dot_product(a: &[f32], b: &[f32]) -> f64 {
    if !use_fast_path(a.len()) {
        return a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    }

    let chunks = a.len() / 4;
    let mut sum0 = 0.0f64;
    let mut sum1 = 0.0f64;
    let mut sum2 = 0.0f64;
    let mut sum3 = 0.0f64;

    for i in 0..chunks {
        let base = i * 4;
        sum0 += f64::from(a[base]) * f64::from(b[base]);
        sum1 += f64::from(a[base + 1]) * f64::from(b[base + 1]);
        sum2 += f64::from(a[base + 2]) * f64::from(b[base + 2]);
        sum3 += f64::from(a[base + 3]) * f64::from(b[base + 3]);
    }

    let mut total = sum0 + sum1 + sum2 + sum3;
    for i in (chunks * 4)..a.len() {
        total += f64::from(a[i]) * f64::from(b[i]);
    }
    total
}

fn dot_distance(a: &[f32], b: &[f32]) -> f64 {
    -dot_product(a, b)
}

fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let cos_sim = dot_product(a, b) / (norm_a * norm_b);
    1.0 - cos_sim.clamp(-1.0, 1.0)
}

// ---------------------------------------------------------------------
// Hamming / Jaccard
// ---------------------------------------------------------------------

fn hamming_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let disagree = a
        .iter()
        .zip(b)
        .filter(|(x, y)| (**x > 0.0) != (**y > 0.0))
        .count();
    disagree as f64 / a.len() as f64
}

fn jaccard_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut sum_min = 0.0f64;
    let mut sum_max = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        sum_min += x.min(y);
        sum_max += x.max(y);
    }
    if sum_max == 0.0 {
        return 0.0;
    }
    1.0 - sum_min / sum_max
}

// ---------------------------------------------------------------------
// Normalization helper, used by namespace/point invariants (§8.3)
// ---------------------------------------------------------------------

/// L2-normalizes a vector in place. No-op on a zero vector.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm == 0.0 {
        return;
    }
    let inv = (1.0 / norm) as f32;
    for x in v.iter_mut() {
        *x *= inv;
    }
}

// ---------------------------------------------------------------------
// Custom metric registry (§9 "Global state")
// ---------------------------------------------------------------------

/// A custom distance function: takes two equal-length slices, returns a
/// distance value. Registered functions run off the hot path.
pub type CustomMetricFn = Arc<dyn Fn(&[f32], &[f32]) -> f64 + Send + Sync>;

struct Registry {
    custom: DashMap<String, CustomMetricFn>,
}

static REGISTRY: LazyLock<Registry> = LazyLock::new(|| Registry {
    custom: DashMap::new(),
});

fn is_builtin_name(name: &str) -> bool {
    [
        DistanceMetric::Cosine,
        DistanceMetric::Euclidean,
        DistanceMetric::Manhattan,
        DistanceMetric::Dot,
        DistanceMetric::Hamming,
        DistanceMetric::Jaccard,
    ]
    .iter()
    .any(|m| m.name() == name)
}

/// Registers a custom metric under `name`. Built-in names cannot be
/// overridden, and a custom name can only be registered once.
///
/// # Errors
///
/// Returns [`Error::BadFilter`]-shaped [`Error::Internal`] style error if
/// `name` collides with a built-in or an already-registered custom metric.
pub fn register_metric(
    name: impl Into<String>,
    f: impl Fn(&[f32], &[f32]) -> f64 + Send + Sync + 'static,
) -> Result<()> {
    let name = name.into();
    if is_builtin_name(&name) {
        return Err(Error::Internal(format!(
            "cannot override built-in metric '{name}'"
        )));
    }
    if REGISTRY.custom.contains_key(&name) {
        return Err(Error::Internal(format!(
            "metric '{name}' is already registered (custom metrics are write-once)"
        )));
    }
    REGISTRY.custom.insert(name, Arc::new(f));
    Ok(())
}

/// Evaluates `distance(a, b)` under a metric looked up by name: either a
/// built-in or a previously registered custom metric.
///
/// # Errors
///
/// Returns [`Error::UnknownMetric`] if `name` is neither a built-in nor
/// registered, and [`Error::DimensionMismatch`] on length mismatch for
/// built-ins (custom metrics are responsible for their own dimension checks).
pub fn distance_by_name(a: &[f32], b: &[f32], name: &str) -> Result<f64> {
    match name {
        "cosine" => distance(a, b, DistanceMetric::Cosine),
        "euclidean" => distance(a, b, DistanceMetric::Euclidean),
        "manhattan" => distance(a, b, DistanceMetric::Manhattan),
        "dot" => distance(a, b, DistanceMetric::Dot),
        "hamming" => distance(a, b, DistanceMetric::Hamming),
        "jaccard" => distance(a, b, DistanceMetric::Jaccard),
        other => {
            let f = REGISTRY
                .custom
                .get(other)
                .ok_or_else(|| Error::UnknownMetric(other.to_string()))?;
            Ok(f(a, b))
        }
    }
}
