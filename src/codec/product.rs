//! Product quantization: splits a vector into `M` subspaces and replaces
//! each subspace with the id of its nearest centroid in a trained codebook
//! (§4.4).

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};

const MAGIC: u32 = 0x5056_5131; // "PVQ1"

/// How a [`PqCodebook`]'s centroids are seeded before Lloyd's algorithm runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMethod {
    /// Centroids are `K` vectors drawn uniformly from the training set.
    Random,
    /// k-means++: each successive centroid is drawn with probability
    /// proportional to its squared distance from the nearest existing one.
    KMeansPlusPlus,
}

/// Training parameters for [`train`].
#[derive(Debug, Clone)]
pub struct PqTrainOptions {
    /// Number of subspaces; must evenly divide the vector dimension.
    pub subspaces: usize,
    /// Centroids per subspace, at most 256 (fits in a `u8` code).
    pub centroids: usize,
    /// Seeding strategy.
    pub init: InitMethod,
    /// Hard cap on Lloyd's iterations per subspace.
    pub max_iterations: usize,
    /// Stop iterating a subspace once total inertia changes by less than
    /// this fraction of the previous round's inertia.
    pub convergence_threshold: f64,
    /// Metric the resulting asymmetric distance tables should approximate.
    pub metric: DistanceMetric,
    /// PRNG seed, for reproducible training.
    pub seed: u64,
}

impl Default for PqTrainOptions {
    fn default() -> Self {
        Self {
            subspaces: 8,
            centroids: 256,
            init: InitMethod::KMeansPlusPlus,
            max_iterations: 25,
            convergence_threshold: 1e-4,
            metric: DistanceMetric::Euclidean,
            seed: 0x5DEE_CE66_D1A4_B5B5,
        }
    }
}

/// A trained product-quantization codebook: `M` independent sets of `K`
/// centroids, one set per subspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqCodebook {
    id: u32,
    subspaces: usize,
    centroids: usize,
    dsub: usize,
    /// `[subspace][centroid][dsub]`
    vectors: Vec<Vec<Vec<f32>>>,
    metric: DistanceMetric,
    iterations: usize,
    inertia: f64,
}

impl PqCodebook {
    /// This codebook's id, used to look it up from a [`ProductPayload`].
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The dimension of vectors this codebook encodes.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.subspaces * self.dsub
    }

    /// Lloyd iterations actually run (may be less than `max_iterations` if
    /// convergence was reached first).
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Total inertia (sum of squared distances to assigned centroid) at
    /// convergence, summed across subspaces.
    #[must_use]
    pub fn inertia(&self) -> f64 {
        self.inertia
    }
}

struct SplitMix64(u64);

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn next_range(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

fn squared_euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(x - y) * f64::from(x - y))
        .sum()
}

fn subspace_slices<'a>(vectors: &'a [&'a [f32]], subspace: usize, dsub: usize) -> Vec<&'a [f32]> {
    vectors
        .iter()
        .map(|v| &v[subspace * dsub..(subspace + 1) * dsub])
        .collect()
}

fn seed_random(points: &[&[f32]], k: usize, rng: &mut SplitMix64) -> Vec<Vec<f32>> {
    let mut chosen = Vec::with_capacity(k);
    for _ in 0..k {
        let idx = rng.next_range(points.len());
        chosen.push(points[idx].to_vec());
    }
    chosen
}

fn seed_kmeans_plus_plus(points: &[&[f32]], k: usize, rng: &mut SplitMix64) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.next_range(points.len())].to_vec());
    let mut dist_sq: Vec<f64> = points.iter().map(|p| squared_euclidean(p, &centroids[0])).collect();

    while centroids.len() < k {
        let total: f64 = dist_sq.iter().sum();
        let pick = if total <= 0.0 {
            rng.next_range(points.len())
        } else {
            let target = rng.next_f64() * total;
            let mut cumulative = 0.0;
            let mut chosen = points.len() - 1;
            for (i, &d) in dist_sq.iter().enumerate() {
                cumulative += d;
                if cumulative >= target {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        let next = points[pick].to_vec();
        for (i, p) in points.iter().enumerate() {
            let d = squared_euclidean(p, &next);
            if d < dist_sq[i] {
                dist_sq[i] = d;
            }
        }
        centroids.push(next);
    }
    centroids
}

/// Runs Lloyd's algorithm on a single subspace's points, returning the
/// final centroids, iteration count, and total inertia.
fn lloyd(points: &[&[f32]], k: usize, options: &PqTrainOptions, rng: &mut SplitMix64) -> (Vec<Vec<f32>>, usize, f64) {
    let k = k.min(points.len()).max(1);
    let mut centroids = match options.init {
        InitMethod::Random => seed_random(points, k, rng),
        InitMethod::KMeansPlusPlus => seed_kmeans_plus_plus(points, k, rng),
    };

    let dsub = points[0].len();
    let mut assignments = vec![0usize; points.len()];
    let mut prev_inertia = f64::INFINITY;
    let mut final_inertia = 0.0;
    let mut iterations_run = 0;

    for iter in 0..options.max_iterations {
        iterations_run = iter + 1;
        let mut inertia = 0.0;
        for (i, p) in points.iter().enumerate() {
            let mut best = 0usize;
            let mut best_d = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = squared_euclidean(p, centroid);
                if d < best_d {
                    best_d = d;
                    best = c;
                }
            }
            assignments[i] = best;
            inertia += best_d;
        }

        let mut sums = vec![vec![0.0f64; dsub]; k];
        let mut counts = vec![0usize; k];
        for (p, &a) in points.iter().zip(&assignments) {
            counts[a] += 1;
            for (d, &x) in p.iter().enumerate() {
                sums[a][d] += f64::from(x);
            }
        }
        for c in 0..k {
            if counts[c] == 0 {
                // Empty cluster: re-seed from the point currently farthest
                // from its own assigned centroid.
                let farthest = (0..points.len())
                    .max_by(|&a, &b| {
                        let da = squared_euclidean(points[a], &centroids[assignments[a]]);
                        let db = squared_euclidean(points[b], &centroids[assignments[b]]);
                        da.total_cmp(&db)
                    })
                    .unwrap_or(0);
                centroids[c] = points[farthest].to_vec();
            } else {
                centroids[c] = sums[c].iter().map(|&s| (s / counts[c] as f64) as f32).collect();
            }
        }

        final_inertia = inertia;
        if prev_inertia.is_finite() {
            let delta = (prev_inertia - inertia).abs() / prev_inertia.max(1e-12);
            if delta < options.convergence_threshold {
                break;
            }
        }
        prev_inertia = inertia;
    }

    (centroids, iterations_run, final_inertia)
}

/// Trains a codebook from a batch of same-dimension vectors (§4.4 "Train").
///
/// # Errors
///
/// Returns [`Error::InsufficientTraining`] if fewer training vectors than
/// centroids are supplied, and [`Error::InvalidFormat`] if `subspaces` does
/// not evenly divide the dimension.
pub fn train(training_set: &[&[f32]], options: &PqTrainOptions) -> Result<PqCodebook> {
    if training_set.is_empty() {
        return Err(Error::InsufficientTraining {
            have: 0,
            need: options.centroids,
        });
    }
    if training_set.len() < options.centroids {
        return Err(Error::InsufficientTraining {
            have: training_set.len(),
            need: options.centroids,
        });
    }
    let dimension = training_set[0].len();
    if options.subspaces == 0 || dimension % options.subspaces != 0 {
        return Err(Error::InvalidFormat(format!(
            "subspaces ({}) must evenly divide dimension ({dimension})",
            options.subspaces
        )));
    }
    let dsub = dimension / options.subspaces;

    let mut rng = SplitMix64(options.seed);
    let mut all_vectors = Vec::with_capacity(options.subspaces);
    let mut total_iterations = 0;
    let mut total_inertia = 0.0;

    for m in 0..options.subspaces {
        let points = subspace_slices(training_set, m, dsub);
        let (centroids, iterations, inertia) = lloyd(&points, options.centroids, options, &mut rng);
        total_iterations = total_iterations.max(iterations);
        total_inertia += inertia;
        all_vectors.push(centroids);
        debug!(subspace = m, iterations, inertia, "trained pq subspace");
    }

    let id = rng.next_u64() as u32;
    let codebook = PqCodebook {
        id,
        subspaces: options.subspaces,
        centroids: options.centroids,
        dsub,
        vectors: all_vectors,
        metric: options.metric,
        iterations: total_iterations,
        inertia: total_inertia,
    };
    info!(codebook_id = id, dimension, subspaces = options.subspaces, "trained pq codebook");
    register_codebook(codebook.clone());
    Ok(codebook)
}

static CODEBOOK_REGISTRY: LazyLock<DashMap<u32, Arc<PqCodebook>>> = LazyLock::new(DashMap::new);

/// Registers a trained codebook so payloads carrying only its id can decode.
/// [`train`] does this automatically; exposed for callers restoring a
/// codebook from a snapshot (§6).
pub fn register_codebook(codebook: PqCodebook) {
    CODEBOOK_REGISTRY.insert(codebook.id, Arc::new(codebook));
}

fn lookup_codebook(id: u32) -> Result<Arc<PqCodebook>> {
    CODEBOOK_REGISTRY
        .get(&id)
        .map(|e| Arc::clone(e.value()))
        .ok_or_else(|| Error::CorruptPayload(format!("unknown pq codebook id {id}")))
}

/// A product-quantized payload: one byte-sized centroid index per subspace,
/// plus the codebook id needed to decode (§3 "enough parameters... codebook
/// id for product quantization").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPayload {
    codebook_id: u32,
    codes: Vec<u8>,
}

impl ProductPayload {
    /// The codebook id this payload was encoded against.
    #[must_use]
    pub fn codebook_id(&self) -> u32 {
        self.codebook_id
    }

    /// The dimension implied by the registered codebook.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPayload`] if the codebook is not registered.
    pub fn dimension(&self) -> Result<usize> {
        Ok(lookup_codebook(self.codebook_id)?.dimension())
    }

    /// Decodes by concatenating each subspace's chosen centroid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPayload`] if the codebook is not registered.
    pub fn decode(&self) -> Result<Vec<f32>> {
        let codebook = lookup_codebook(self.codebook_id)?;
        let mut out = Vec::with_capacity(codebook.dimension());
        for (m, &code) in self.codes.iter().enumerate() {
            out.extend_from_slice(&codebook.vectors[m][code as usize]);
        }
        Ok(out)
    }

    /// Serializes to the persisted layout of §6: an 8-byte header (magic,
    /// codebook id) followed by the raw code bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.codes.len());
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&self.codebook_id.to_le_bytes());
        out.extend_from_slice(&self.codes);
        out
    }

    /// Parses the persisted layout of §6.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPayload`] if the header fails the magic check
    /// or the buffer is too short.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::CorruptPayload("product payload header truncated".into()));
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(Error::CorruptPayload("bad product payload magic".into()));
        }
        let codebook_id = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        Ok(Self {
            codebook_id,
            codes: bytes[8..].to_vec(),
        })
    }
}

/// Encodes `vector` against `codebook`, choosing the nearest centroid per
/// subspace (§4.4 "Encode").
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if `vector`'s length does not match
/// the codebook's dimension.
pub fn encode(vector: &[f32], codebook: &PqCodebook) -> Result<ProductPayload> {
    if vector.len() != codebook.dimension() {
        return Err(Error::DimensionMismatch {
            expected: codebook.dimension(),
            actual: vector.len(),
        });
    }
    let mut codes = Vec::with_capacity(codebook.subspaces);
    for m in 0..codebook.subspaces {
        let sub = &vector[m * codebook.dsub..(m + 1) * codebook.dsub];
        let mut best = 0usize;
        let mut best_d = f64::INFINITY;
        for (c, centroid) in codebook.vectors[m].iter().enumerate() {
            let d = squared_euclidean(sub, centroid);
            if d < best_d {
                best_d = d;
                best = c;
            }
        }
        codes.push(best as u8);
    }
    Ok(ProductPayload {
        codebook_id: codebook.id,
        codes,
    })
}

/// An asymmetric distance lookup table for one query: per-subspace,
/// per-centroid partial distances, summed across subspaces at query time
/// without ever decoding a stored vector (§4.4 "Asymmetric distance").
pub struct AsymmetricTable {
    codebook: Arc<PqCodebook>,
    /// `[subspace][centroid]`
    partials: Vec<Vec<f64>>,
    query_norm: f64,
}

impl AsymmetricTable {
    /// Builds a lookup table for `query` against `codebook`'s metric.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `query`'s length does not
    /// match the codebook's dimension.
    pub fn build(query: &[f32], codebook: Arc<PqCodebook>) -> Result<Self> {
        if query.len() != codebook.dimension() {
            return Err(Error::DimensionMismatch {
                expected: codebook.dimension(),
                actual: query.len(),
            });
        }
        let mut partials = Vec::with_capacity(codebook.subspaces);
        for m in 0..codebook.subspaces {
            let sub = &query[m * codebook.dsub..(m + 1) * codebook.dsub];
            let row = codebook.vectors[m]
                .iter()
                .map(|centroid| match codebook.metric {
                    DistanceMetric::Cosine | DistanceMetric::Dot => {
                        -sub.iter().zip(centroid).map(|(a, b)| f64::from(*a) * f64::from(*b)).sum::<f64>()
                    }
                    DistanceMetric::Manhattan => sub
                        .iter()
                        .zip(centroid)
                        .map(|(a, b)| f64::from((a - b).abs()))
                        .sum(),
                    _ => squared_euclidean(sub, centroid),
                })
                .collect();
            partials.push(row);
        }
        let query_norm = query.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt();
        Ok(Self {
            codebook,
            partials,
            query_norm,
        })
    }

    /// Looks up the approximate distance from the built query to `payload`,
    /// summing one cached partial per subspace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPayload`] if `payload` was not encoded against
    /// this table's codebook.
    pub fn distance(&self, payload: &ProductPayload) -> Result<f64> {
        if payload.codebook_id != self.codebook.id {
            return Err(Error::CorruptPayload(
                "asymmetric table built against a different codebook than the payload".into(),
            ));
        }
        let mut total = 0.0;
        for (m, &code) in payload.codes.iter().enumerate() {
            total += self.partials[m][code as usize];
        }
        match self.codebook.metric {
            DistanceMetric::Cosine => {
                // Centroids are not guaranteed unit-norm; rescale the dot-product
                // partials by the query's own norm as the nearest available
                // approximation to cosine distance without re-decoding.
                if self.query_norm > 0.0 {
                    total /= self.query_norm.max(1e-12);
                }
            }
            DistanceMetric::Dot => {}
            DistanceMetric::Manhattan => {}
            _ => total = total.sqrt(),
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(seed: u64, center: &[f32], n: usize) -> Vec<Vec<f32>> {
        let mut rng = SplitMix64(seed);
        (0..n)
            .map(|_| {
                center
                    .iter()
                    .map(|&c| c + (rng.next_f64() as f32 - 0.5) * 0.1)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn trains_and_encodes_round_trip_is_lossy_but_close() {
        let mut points = cluster(1, &[0.0, 0.0, 0.0, 0.0], 64);
        points.extend(cluster(2, &[5.0, 5.0, 5.0, 5.0], 64));
        let refs: Vec<&[f32]> = points.iter().map(Vec::as_slice).collect();

        let options = PqTrainOptions {
            subspaces: 2,
            centroids: 4,
            max_iterations: 20,
            ..Default::default()
        };
        let codebook = train(&refs, &options).unwrap();
        assert_eq!(codebook.dimension(), 4);

        let payload = encode(&points[0], &codebook).unwrap();
        let decoded = payload.decode().unwrap();
        let err: f32 = decoded
            .iter()
            .zip(&points[0])
            .map(|(a, b)| (a - b).abs())
            .sum();
        assert!(err < 1.0, "reconstruction error too large: {err}");
    }

    #[test]
    fn rejects_subspace_count_that_does_not_divide_dimension() {
        let points: Vec<Vec<f32>> = cluster(1, &[0.0, 0.0, 0.0], 16);
        let refs: Vec<&[f32]> = points.iter().map(Vec::as_slice).collect();
        let options = PqTrainOptions {
            subspaces: 5,
            centroids: 4,
            ..Default::default()
        };
        assert!(matches!(train(&refs, &options), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn rejects_insufficient_training_vectors() {
        let points: Vec<Vec<f32>> = cluster(1, &[0.0, 0.0], 2);
        let refs: Vec<&[f32]> = points.iter().map(Vec::as_slice).collect();
        let options = PqTrainOptions {
            subspaces: 1,
            centroids: 256,
            ..Default::default()
        };
        assert!(matches!(train(&refs, &options), Err(Error::InsufficientTraining { .. })));
    }

    #[test]
    fn asymmetric_distance_orders_consistently_with_decode_then_distance() {
        let mut points = cluster(1, &[0.0, 0.0, 0.0, 0.0], 32);
        points.extend(cluster(2, &[8.0, 8.0, 8.0, 8.0], 32));
        let refs: Vec<&[f32]> = points.iter().map(Vec::as_slice).collect();
        let options = PqTrainOptions {
            subspaces: 2,
            centroids: 4,
            metric: DistanceMetric::Euclidean,
            ..Default::default()
        };
        let codebook = Arc::new(train(&refs, &options).unwrap());

        let query = vec![0.0, 0.0, 0.0, 0.0];
        let near = encode(&points[0], &codebook).unwrap();
        let far = encode(&points[points.len() - 1], &codebook).unwrap();

        let table = AsymmetricTable::build(&query, Arc::clone(&codebook)).unwrap();
        assert!(table.distance(&near).unwrap() < table.distance(&far).unwrap());
    }

    #[test]
    fn to_bytes_from_bytes_round_trips() {
        let points = cluster(1, &[0.0, 0.0], 16);
        let refs: Vec<&[f32]> = points.iter().map(Vec::as_slice).collect();
        let options = PqTrainOptions {
            subspaces: 1,
            centroids: 4,
            ..Default::default()
        };
        let codebook = train(&refs, &options).unwrap();
        let payload = encode(&points[0], &codebook).unwrap();
        let bytes = payload.to_bytes();
        let restored = ProductPayload::from_bytes(&bytes).unwrap();
        assert_eq!(restored.codebook_id(), payload.codebook_id());
        assert_eq!(restored.decode().unwrap(), payload.decode().unwrap());
    }

    #[test]
    fn from_bytes_rejects_bad_magic() {
        let bytes = vec![0u8; 12];
        assert!(matches!(ProductPayload::from_bytes(&bytes), Err(Error::CorruptPayload(_))));
    }
}
