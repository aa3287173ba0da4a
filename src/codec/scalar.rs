//! Scalar quantization: per-element bit-width compression with uniform,
//! per-dimension, or percentile bounds (§4.3).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::distance::distance;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};

/// Header size in bytes (§4.3 step 5, §6 "Persisted layouts").
pub const HEADER_LEN: usize = 128;
const HEADER_VERSION: u32 = 1;

/// Which bounds a scalar codec uses to map floats into the quantized range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarStrategy {
    /// A single (min, max) pair shared by every dimension.
    Uniform,
    /// One (min, max) pair per dimension.
    PerDimension,
    /// Bounds taken at the configured percentiles of the input distribution.
    Percentile,
}

impl ScalarStrategy {
    fn tag(self) -> u32 {
        match self {
            Self::Uniform => 0,
            Self::PerDimension => 1,
            Self::Percentile => 2,
        }
    }

    fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(Self::Uniform),
            1 => Ok(Self::PerDimension),
            2 => Ok(Self::Percentile),
            other => Err(Error::CorruptPayload(format!(
                "unknown scalar strategy tag {other}"
            ))),
        }
    }
}

/// Options controlling a scalar-quantization encode.
#[derive(Debug, Clone)]
pub struct ScalarEncodeOptions {
    /// Bounds strategy.
    pub strategy: ScalarStrategy,
    /// Requested bit width, 1..=16. Ignored if `adaptive_bits` is set.
    pub bits: u8,
    /// Pick the bit width from the source statistics instead of `bits`.
    pub adaptive_bits: bool,
    /// Percentile range used by [`ScalarStrategy::Percentile`], e.g. `(0.01, 0.99)`.
    pub percentile_range: (f64, f64),
    /// If set, reject the encode with [`Error::QualityBelowThreshold`] when
    /// `1 - cosine(original, decoded) > max_precision_loss`.
    pub max_precision_loss: Option<f64>,
}

impl Default for ScalarEncodeOptions {
    fn default() -> Self {
        Self {
            strategy: ScalarStrategy::Uniform,
            bits: 8,
            adaptive_bits: false,
            percentile_range: (0.01, 0.99),
            max_precision_loss: None,
        }
    }
}

/// A scalar-quantized payload: header plus bit-packed codes, self-describing
/// enough to decode without any external lookup (§3 "A record carrying a
/// compressed payload...").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarPayload {
    strategy: ScalarStrategy,
    bits: u8,
    dimension: usize,
    /// (lo, hi) per dimension; length 1 for [`ScalarStrategy::Uniform`],
    /// length `dimension` otherwise.
    bounds: Vec<(f32, f32)>,
    /// Diagnostic statistics block carried in the header (min/max/mean/std).
    stats: Stats,
    codes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Stats {
    min: f32,
    max: f32,
    mean: f32,
    std: f32,
}

fn compute_stats(v: &[f32]) -> Stats {
    let min = v.iter().copied().fold(f32::INFINITY, f32::min);
    let max = v.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mean = v.iter().sum::<f32>() / v.len() as f32;
    let variance = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / v.len() as f32;
    Stats {
        min,
        max,
        mean,
        std: variance.sqrt(),
    }
}

/// Picks an adaptive bit width per §4.3 step 1's loss table, then widens it
/// if the dynamic range is large.
fn adaptive_bit_width(stats: &Stats) -> u8 {
    // The "loss" input to the table is not separately specified; we use the
    // coefficient of variation (std/|mean|, or std alone when mean is ~0) as
    // the proxy signal the table's thresholds were written against.
    let loss = if stats.mean.abs() > 1e-9 {
        f64::from(stats.std / stats.mean.abs())
    } else {
        f64::from(stats.std)
    };
    let mut bits: u8 = if loss < 0.001 {
        16
    } else if loss < 0.01 {
        12
    } else if loss < 0.05 {
        8
    } else {
        4
    };
    let range = f64::from(stats.max - stats.min);
    if range > 1000.0 {
        bits = bits.max(12);
    } else if range > 100.0 {
        bits = bits.max(8);
    }
    bits.clamp(4, 16)
}

fn bounds_for(strategy: ScalarStrategy, vectors: &[&[f32]], percentile_range: (f64, f64)) -> Vec<(f32, f32)> {
    let dimension = vectors[0].len();
    match strategy {
        ScalarStrategy::Uniform => {
            let mut lo = f32::INFINITY;
            let mut hi = f32::NEG_INFINITY;
            for v in vectors {
                for &x in *v {
                    lo = lo.min(x);
                    hi = hi.max(x);
                }
            }
            vec![(lo, hi)]
        }
        ScalarStrategy::PerDimension => (0..dimension)
            .map(|d| {
                let mut lo = f32::INFINITY;
                let mut hi = f32::NEG_INFINITY;
                for v in vectors {
                    lo = lo.min(v[d]);
                    hi = hi.max(v[d]);
                }
                (lo, hi)
            })
            .collect(),
        ScalarStrategy::Percentile => (0..dimension)
            .map(|d| {
                let mut column: Vec<f32> = vectors.iter().map(|v| v[d]).collect();
                column.sort_by(|a, b| a.total_cmp(b));
                (
                    percentile(&column, percentile_range.0),
                    percentile(&column, percentile_range.1),
                )
            })
            .collect(),
    }
}

fn percentile(sorted: &[f32], p: f64) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn bounds_at(bounds: &[(f32, f32)], strategy: ScalarStrategy, dim: usize) -> (f32, f32) {
    match strategy {
        ScalarStrategy::Uniform => bounds[0],
        ScalarStrategy::PerDimension | ScalarStrategy::Percentile => bounds[dim],
    }
}

fn quantize_one(v: f32, lo: f32, hi: f32, bits: u8) -> u32 {
    if hi <= lo {
        return 0;
    }
    let max_code = (1u32 << bits) - 1;
    let scaled = (f64::from(v - lo) / f64::from(hi - lo)) * f64::from(max_code);
    scaled.round().clamp(0.0, f64::from(max_code)) as u32
}

fn dequantize_one(code: u32, lo: f32, hi: f32, bits: u8) -> f32 {
    let max_code = (1u32 << bits) - 1;
    if max_code == 0 {
        return lo;
    }
    lo + (f64::from(code) / f64::from(max_code)) as f32 * (hi - lo)
}

/// Bit-packs `codes` MSB-first, `bits` bits per code.
fn pack_bits(codes: &[u32], bits: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity((codes.len() * bits as usize).div_ceil(8));
    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;
    for &code in codes {
        acc = (acc << bits) | u64::from(code);
        acc_bits += u32::from(bits);
        while acc_bits >= 8 {
            acc_bits -= 8;
            out.push(((acc >> acc_bits) & 0xFF) as u8);
        }
    }
    if acc_bits > 0 {
        out.push(((acc << (8 - acc_bits)) & 0xFF) as u8);
    }
    out
}

/// Reverses [`pack_bits`], unpacking `count` codes of `bits` bits each.
fn unpack_bits(packed: &[u8], bits: u8, count: usize) -> Vec<u32> {
    let mut out = Vec::with_capacity(count);
    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;
    let mut byte_idx = 0;
    let mask = (1u64 << bits) - 1;
    for _ in 0..count {
        while acc_bits < u32::from(bits) {
            let byte = packed.get(byte_idx).copied().unwrap_or(0);
            acc = (acc << 8) | u64::from(byte);
            acc_bits += 8;
            byte_idx += 1;
        }
        acc_bits -= u32::from(bits);
        out.push(((acc >> acc_bits) & mask) as u32);
    }
    out
}

/// Encodes a single vector under the given options (§4.3 "Encode").
///
/// # Errors
///
/// Returns [`Error::InvalidFormat`] on an empty vector, and
/// [`Error::QualityBelowThreshold`] if a precision-loss gate is configured
/// and tripped.
pub fn encode(vector: &[f32], options: &ScalarEncodeOptions) -> Result<ScalarPayload> {
    encode_batch(&[vector], options).map(|mut v| v.remove(0))
}

/// Encodes a batch of same-dimension vectors, sharing bounds and bit width
/// across the whole batch (§4.3 "Batch").
///
/// # Errors
///
/// Returns [`Error::InvalidFormat`] on an empty batch or empty vector, and
/// [`Error::QualityBelowThreshold`] if the precision gate trips for any
/// member of the batch.
pub fn encode_batch(
    vectors: &[&[f32]],
    options: &ScalarEncodeOptions,
) -> Result<Vec<ScalarPayload>> {
    if vectors.is_empty() || vectors[0].is_empty() {
        return Err(Error::InvalidFormat(
            "scalar encode requires a non-empty batch of non-empty vectors".into(),
        ));
    }
    let dimension = vectors[0].len();

    let joint_stats = compute_stats(&vectors.iter().flat_map(|v| v.iter().copied()).collect::<Vec<_>>());
    let bits = if options.adaptive_bits {
        adaptive_bit_width(&joint_stats)
    } else {
        options.bits.clamp(1, 16)
    };
    let bounds = bounds_for(options.strategy, vectors, options.percentile_range);

    debug!(bits, strategy = ?options.strategy, dimension, "scalar quantization bounds computed");

    let mut out = Vec::with_capacity(vectors.len());
    for v in vectors {
        if v.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: v.len(),
            });
        }
        let stats = compute_stats(v);
        let codes: Vec<u32> = v
            .iter()
            .enumerate()
            .map(|(d, &x)| {
                let (lo, hi) = bounds_at(&bounds, options.strategy, d);
                quantize_one(x, lo, hi, bits)
            })
            .collect();
        let packed = pack_bits(&codes, bits);
        let payload = ScalarPayload {
            strategy: options.strategy,
            bits,
            dimension,
            bounds: bounds.clone(),
            stats,
            codes: packed,
        };

        if let Some(limit) = options.max_precision_loss {
            let decoded = payload.decode();
            let d = distance(v, &decoded, DistanceMetric::Cosine)?;
            let loss = d; // cosine distance = 1 - cosine similarity
            if loss > limit {
                return Err(Error::QualityBelowThreshold { actual: loss, limit });
            }
        }

        out.push(payload);
    }
    Ok(out)
}

impl ScalarPayload {
    /// The declared dimension of this payload.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Decodes back to a dense `f32` vector, honoring whichever bounds
    /// strategy was used at encode time (§9 open question: per-dimension
    /// decode must use per-dimension bounds, not just the global ones).
    #[must_use]
    pub fn decode(&self) -> Vec<f32> {
        let codes = unpack_bits(&self.codes, self.bits, self.dimension);
        codes
            .into_iter()
            .enumerate()
            .map(|(d, code)| {
                let (lo, hi) = bounds_at(&self.bounds, self.strategy, d);
                dequantize_one(code, lo, hi, self.bits)
            })
            .collect()
    }

    /// Serializes this payload to the persisted layout of §6: a fixed
    /// 128-byte header followed by the bit-packed codes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&HEADER_VERSION.to_le_bytes());
        header[4..8].copy_from_slice(&self.strategy.tag().to_le_bytes());
        header[8..12].copy_from_slice(&u32::from(self.bits).to_le_bytes());
        header[12..16].copy_from_slice(&(self.dimension as u32).to_le_bytes());
        let global = self.bounds[0];
        header[16..20].copy_from_slice(&global.0.to_le_bytes());
        header[20..24].copy_from_slice(&global.1.to_le_bytes());
        header[24..28].copy_from_slice(&self.stats.min.to_le_bytes());
        header[28..32].copy_from_slice(&self.stats.max.to_le_bytes());
        header[32..36].copy_from_slice(&self.stats.mean.to_le_bytes());
        header[36..40].copy_from_slice(&self.stats.std.to_le_bytes());

        let mut out = header;
        out.extend_from_slice(&self.codes);
        out
    }

    /// Parses the persisted layout of §6, reconstructing per-dimension
    /// bounds from the embedded codes is not possible for non-uniform
    /// strategies from the header alone, so this path only supports
    /// [`ScalarStrategy::Uniform`] payloads serialized by [`Self::to_bytes`].
    /// Callers needing per-dimension/percentile round-trip should keep the
    /// full [`ScalarPayload`] rather than re-parsing raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptPayload`] if the header fails magic/version
    /// checks or is too short.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::CorruptPayload("scalar header truncated".into()));
        }
        let version = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if version != HEADER_VERSION {
            return Err(Error::CorruptPayload(format!(
                "unsupported scalar codec version {version}"
            )));
        }
        let strategy = ScalarStrategy::from_tag(u32::from_le_bytes(bytes[4..8].try_into().unwrap()))?;
        let bits = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        if bits == 0 || bits > 16 {
            return Err(Error::CorruptPayload(format!("invalid bit width {bits}")));
        }
        let dimension = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        let global_min = f32::from_le_bytes(bytes[16..20].try_into().unwrap());
        let global_max = f32::from_le_bytes(bytes[20..24].try_into().unwrap());
        let stats = Stats {
            min: f32::from_le_bytes(bytes[24..28].try_into().unwrap()),
            max: f32::from_le_bytes(bytes[28..32].try_into().unwrap()),
            mean: f32::from_le_bytes(bytes[32..36].try_into().unwrap()),
            std: f32::from_le_bytes(bytes[36..40].try_into().unwrap()),
        };
        if strategy != ScalarStrategy::Uniform {
            return Err(Error::CorruptPayload(
                "non-uniform scalar payloads cannot round-trip through raw bytes alone".into(),
            ));
        }
        Ok(Self {
            strategy,
            bits: bits as u8,
            dimension,
            bounds: vec![(global_min, global_max)],
            stats,
            codes: bytes[HEADER_LEN..].to_vec(),
        })
    }
}
