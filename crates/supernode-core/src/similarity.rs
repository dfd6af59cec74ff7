//! Similarity engine and candidate selector.
//!
//! A batch of fingerprint rows restricted to one comparison group is
//! turned into a dense symmetric similarity matrix (cosine or dot), the
//! diagonal is set to a sentinel to exclude self-pairs, and top-k
//! above-threshold pairs are extracted in a deterministic global order.
//!
//! Rows without discriminative signal (dimension < 2, zero norm,
//! near-zero variance) are excluded before the matrix is built, as are
//! all members of oversized exact-duplicate groups.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::SimilarityMetric;
use crate::fingerprint::FingerprintSet;
use crate::graph::LayerKey;

/// Divisor floor for row normalization; rows below this norm are left at
/// the floor instead of dividing by zero.
pub const NORM_EPSILON: f32 = 1e-8;

/// Rows with variance below this carry no discriminative signal.
pub const VARIANCE_FLOOR: f32 = 1e-10;

/// Diagonal sentinel excluding self-pairs from candidate extraction.
pub const DIAGONAL_SENTINEL: f32 = f32::NEG_INFINITY;

/// L2 norm (Euclidean length) of a vector.
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Population variance of a vector; `0.0` for empty input.
#[inline]
pub fn variance(v: &[f32]) -> f32 {
    if v.is_empty() {
        return 0.0;
    }
    let mean = v.iter().sum::<f32>() / v.len() as f32;
    v.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / v.len() as f32
}

/// L2-normalize each row in place, flooring the divisor at
/// [`NORM_EPSILON`] so near-zero rows are scaled, never divided by zero.
pub fn l2_normalize_rows(rows: &mut [Vec<f32>]) {
    for row in rows {
        let norm = l2_norm(row).max(NORM_EPSILON);
        for x in row.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dense pairwise similarity of `rows` by `rows`ᵀ with the diagonal set
/// to [`DIAGONAL_SENTINEL`].
///
/// `Cosine` normalizes a copy of the rows first; `Dot` multiplies raw
/// rows. All rows must share one dimension (guaranteed upstream by the
/// fingerprint builder).
pub fn similarity_matrix(rows: &[Vec<f32>], metric: SimilarityMetric) -> Vec<Vec<f32>> {
    let n = rows.len();
    let normalized: Option<Vec<Vec<f32>>> = match metric {
        SimilarityMetric::Cosine => {
            let mut copy = rows.to_vec();
            l2_normalize_rows(&mut copy);
            Some(copy)
        }
        SimilarityMetric::Dot => None,
    };
    let rows: &[Vec<f32>] = normalized.as_deref().unwrap_or(rows);

    let mut matrix = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let s: f32 = rows[i]
                .iter()
                .zip(rows[j].iter())
                .map(|(a, b)| a * b)
                .sum();
            matrix[i][j] = s;
            matrix[j][i] = s;
        }
        matrix[i][i] = DIAGONAL_SENTINEL;
    }
    matrix
}

/// Why rows were excluded from comparison, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilterStats {
    /// Rows with fewer than two dimensions.
    pub degenerate: usize,
    /// Rows with zero norm.
    pub zero_norm: usize,
    /// Rows with near-zero variance.
    pub constant: usize,
    /// Rows excluded because their exact-duplicate group was too large.
    pub duplicate_excluded: usize,
}

/// Indices of rows that carry discriminative signal.
///
/// Exact-duplicate fingerprints are detected by bit pattern; when a
/// duplicate group exceeds `max_duplicate_group_size`, all its members
/// are excluded for the run (a data artifact would otherwise collapse the
/// whole group into one supernode).
pub fn informative_rows(
    set: &FingerprintSet,
    max_duplicate_group_size: usize,
) -> (Vec<usize>, RowFilterStats) {
    let mut stats = RowFilterStats::default();
    let mut kept: Vec<usize> = Vec::with_capacity(set.len());
    for (i, row) in set.rows().iter().enumerate() {
        if row.vector.len() < 2 {
            stats.degenerate += 1;
            continue;
        }
        if l2_norm(&row.vector) == 0.0 {
            stats.zero_norm += 1;
            continue;
        }
        if variance(&row.vector) < VARIANCE_FLOOR {
            stats.constant += 1;
            continue;
        }
        kept.push(i);
    }

    if max_duplicate_group_size > 0 {
        let mut by_bits: HashMap<Vec<u32>, Vec<usize>> = HashMap::new();
        for &i in &kept {
            let bits: Vec<u32> = set.row(i).vector.iter().map(|x| x.to_bits()).collect();
            by_bits.entry(bits).or_default().push(i);
        }
        let mut excluded: Vec<usize> = Vec::new();
        for members in by_bits.values() {
            if members.len() > max_duplicate_group_size {
                tracing::warn!(
                    group_size = members.len(),
                    max = max_duplicate_group_size,
                    "excluding oversized exact-duplicate fingerprint group"
                );
                excluded.extend_from_slice(members);
            }
        }
        if !excluded.is_empty() {
            stats.duplicate_excluded = excluded.len();
            kept.retain(|i| !excluded.contains(i));
        }
    }

    tracing::debug!(
        informative = kept.len(),
        total = set.len(),
        ?stats,
        "informative-row filter applied"
    );
    (kept, stats)
}

/// A proposed merge between two feature nodes. Transient: produced and
/// consumed within one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeCandidate {
    /// Lexicographically smaller node id of the unordered pair.
    pub a: String,
    /// Lexicographically larger node id of the unordered pair.
    pub b: String,
    /// Similarity score that proposed the pair.
    pub score: f32,
    /// Layer key of the comparison group.
    pub layer: LayerKey,
}

/// Extract above-threshold pairs from a similarity matrix.
///
/// Per row, every partner with score `>= tau` is considered; a nonzero
/// `topk` keeps only the `topk` highest-scoring partners per row. The
/// deduplicated pairs are sorted by descending score, tie-broken by the
/// lexicographic order of the two node ids (never by internal array
/// order), and a nonzero `max_pairs` silently truncates the sorted list.
pub fn select_candidates(
    matrix: &[Vec<f32>],
    ids: &[&str],
    layer: LayerKey,
    tau: f32,
    topk: usize,
    max_pairs: usize,
) -> Vec<MergeCandidate> {
    let n = matrix.len();
    debug_assert_eq!(n, ids.len());

    // Pair -> score, keyed by (min, max) index to deduplicate the
    // symmetric selection.
    let mut pairs: BTreeMap<(usize, usize), f32> = BTreeMap::new();
    for i in 0..n {
        let mut partners: Vec<(usize, f32)> = matrix[i]
            .iter()
            .enumerate()
            .filter(|&(j, &s)| j != i && s >= tau)
            .map(|(j, &s)| (j, s))
            .collect();
        if topk > 0 && partners.len() > topk {
            partners.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
            partners.truncate(topk);
        }
        for (j, score) in partners {
            let key = (i.min(j), i.max(j));
            pairs.entry(key).or_insert(score);
        }
    }

    let mut candidates: Vec<MergeCandidate> = pairs
        .into_iter()
        .map(|((i, j), score)| {
            let (a, b) = if ids[i] <= ids[j] {
                (ids[i], ids[j])
            } else {
                (ids[j], ids[i])
            };
            MergeCandidate {
                a: a.to_string(),
                b: b.to_string(),
                score,
                layer,
            }
        })
        .collect();

    candidates.sort_by(|x, y| {
        y.score
            .total_cmp(&x.score)
            .then_with(|| x.a.cmp(&y.a))
            .then_with(|| x.b.cmp(&y.b))
    });
    if max_pairs > 0 && candidates.len() > max_pairs {
        candidates.truncate(max_pairs);
    }
    candidates
}
