//! Fidelity gate: accepts or rejects a merge candidate so a merge never
//! distorts the causal signal beyond configured tolerances.
//!
//! Two swappable strategies exist and are never mixed within a run:
//!
//! - `Correlation` (production): Pearson correlation of the two
//!   fingerprint rows plus the absolute gap between the nodes' scalar
//!   influence values, both computed from input data.
//! - `Placeholder` (documented test mode): a seeded deterministic hash of
//!   the pair stands in for both metrics, giving reproducible gate
//!   behavior without real activation data.
//!
//! The gate is a pure function of (pair, graph-derived metrics, config):
//! no hidden state, identical outcomes for identical inputs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{GateMode, RunConfig};
use crate::fingerprint::NodeFingerprint;

/// Admission rule: `mean_corr >= alpha && ce_gap <= beta`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateOutcome {
    /// Correlation-like measure between the two nodes' signals.
    pub mean_corr: f32,
    /// Nonnegative divergence measure (CE gap).
    pub ce_gap: f32,
    /// Whether `mean_corr >= alpha`.
    pub corr_pass: bool,
    /// Whether `ce_gap <= beta`.
    pub gap_pass: bool,
}

impl GateOutcome {
    /// Whether both bounds were satisfied.
    #[inline]
    pub fn admitted(&self) -> bool {
        self.corr_pass && self.gap_pass
    }
}

/// Failure-reason counters, independently observable for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCounters {
    /// Candidates evaluated by the gate.
    pub evaluated: usize,
    /// Candidates admitted.
    pub admitted: usize,
    /// Failed the correlation bound only.
    pub failed_correlation: usize,
    /// Failed the divergence bound only.
    pub failed_gap: usize,
    /// Failed both bounds.
    pub failed_both: usize,
}

impl GateCounters {
    /// Record one outcome.
    pub fn record(&mut self, outcome: &GateOutcome) {
        self.evaluated += 1;
        match (outcome.corr_pass, outcome.gap_pass) {
            (true, true) => self.admitted += 1,
            (false, true) => self.failed_correlation += 1,
            (true, false) => self.failed_gap += 1,
            (false, false) => self.failed_both += 1,
        }
    }
}

/// Configured fidelity gate for one run.
#[derive(Debug, Clone, Copy)]
pub struct FidelityGate {
    mode: GateMode,
    alpha: f32,
    beta: f32,
    seed: u64,
}

impl FidelityGate {
    /// Gate with the bounds and strategy from a run configuration.
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            mode: config.gate,
            alpha: config.alpha,
            beta: config.beta,
            seed: config.seed,
        }
    }

    /// The active strategy.
    #[inline]
    pub fn mode(&self) -> GateMode {
        self.mode
    }

    /// Evaluate one candidate pair.
    pub fn evaluate(&self, a: &NodeFingerprint, b: &NodeFingerprint) -> GateOutcome {
        let (mean_corr, ce_gap) = match self.mode {
            // No gating: every candidate is admitted with unit metrics,
            // regardless of the configured bounds.
            GateMode::Disabled => {
                return GateOutcome {
                    mean_corr: 1.0,
                    ce_gap: 0.0,
                    corr_pass: true,
                    gap_pass: true,
                }
            }
            GateMode::Correlation => {
                let corr = fingerprint_correlation(&a.vector, &b.vector);
                let gap = (a.influence - b.influence).abs();
                (corr, gap)
            }
            GateMode::Placeholder => {
                let h = stable_pair_hash(&a.node_id, &b.node_id, self.seed);
                ((0.9 + 0.1 * h) as f32, (0.02 * (1.0 - h)) as f32)
            }
        };
        GateOutcome {
            mean_corr,
            ce_gap,
            corr_pass: mean_corr >= self.alpha,
            gap_pass: ce_gap <= self.beta,
        }
    }
}

/// Pearson correlation of two fingerprint rows, with safe defaults for
/// every degenerate input.
///
/// - mismatched or sub-2 dimensions: `0.0`
/// - both rows constant: `1.0` when approximately equal, else `0.0`
/// - one row constant: `0.0`
/// - non-finite result: `0.0`
fn fingerprint_correlation(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.len() < 2 {
        return 0.0;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().map(|&x| x as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|&x| x as f64).sum::<f64>() / n;
    let var_a = a.iter().map(|&x| (x as f64 - mean_a).powi(2)).sum::<f64>() / n;
    let var_b = b.iter().map(|&x| (x as f64 - mean_b).powi(2)).sum::<f64>() / n;

    if var_a <= 0.0 || var_b <= 0.0 {
        let approx_equal = a
            .iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() <= 1e-8 + 1e-5 * y.abs());
        return if approx_equal { 1.0 } else { 0.0 };
    }

    let cov = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as f64 - mean_a) * (y as f64 - mean_b))
        .sum::<f64>()
        / n;
    let corr = cov / (var_a.sqrt() * var_b.sqrt());
    if corr.is_finite() {
        corr.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Deterministic hash in `[0, 1)` of an unordered id pair and a seed.
///
/// Stable across runs and platforms: SHA-256 over `"{seed}:{a}|{b}"` with
/// the ids in sorted order, first 8 bytes big-endian, reduced mod 10^12.
pub fn stable_pair_hash(u: &str, v: &str, seed: u64) -> f64 {
    let (a, b) = if u <= v { (u, v) } else { (v, u) };
    let mut hasher = Sha256::new();
    hasher.update(format!("{seed}:{a}|{b}").as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let val = u64::from_be_bytes(bytes);
    (val % 1_000_000_000_000) as f64 / 1e12
}
