//! Run configuration for the supernode discovery pipeline.
//!
//! All parameters have defaults; `validate()` rejects malformed values
//! before any pipeline work begins. Enum-valued options (`metric`,
//! `source`, `gate`) are already total by construction, so validation only
//! needs to check the numeric fields.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Pairwise similarity metric for fingerprint comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Rows are L2-normalized, then multiplied by their own transpose.
    #[default]
    Cosine,
    /// Raw matrix product, no normalization.
    Dot,
}

/// Where feature fingerprints come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintSource {
    /// Accumulate outgoing edge weights into logit-indexed columns
    /// (token-indexed when the graph has no logits).
    #[default]
    Adjacency,
    /// Read a fixed-length vector from node metadata. Falls back to
    /// `Adjacency` for the whole run when any selected node lacks a usable
    /// vector or dimensions are inconsistent.
    DeltaLogit,
}

/// Fidelity-gate strategy.
///
/// The correlation strategy is the production path; the placeholder
/// strategy substitutes a seeded deterministic hash for both metrics and
/// exists so gate plumbing can be exercised reproducibly without real
/// activation data. The two are never mixed within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Pearson correlation of the fingerprint rows plus the absolute
    /// influence gap.
    #[default]
    Correlation,
    /// Seeded hash standing in for both metrics (documented test mode).
    Placeholder,
    /// Admit every candidate; metrics are reported as `(1.0, 0.0)`.
    Disabled,
}

/// Configuration for one pipeline run. All fields have defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Similarity acceptance threshold for candidate proposal.
    pub tau_sim: f32,
    /// Minimum mean correlation for gate admission.
    pub alpha: f32,
    /// Maximum divergence (CE gap) for gate admission.
    pub beta: f32,
    /// Restrict candidate proposal to features sharing a layer key.
    pub intra_layer_only: bool,
    /// Pairwise similarity metric.
    pub similarity_metric: SimilarityMetric,
    /// Fingerprint source.
    pub fingerprint_source: FingerprintSource,
    /// L2-normalize fingerprint rows after construction.
    pub normalize_fingerprints: bool,
    /// Gate strategy.
    pub gate: GateMode,
    /// Restrict fingerprinting to features on these layers (`None` = all).
    pub layer_whitelist: Option<Vec<i32>>,
    /// Keep only this many highest-scoring partners per row; 0 = unlimited.
    pub topk_candidates_per_node: usize,
    /// Truncate the sorted candidate list per comparison group; 0 = unlimited.
    pub max_pairs_per_group: usize,
    /// Stop after this many accepted merges; 0 = unlimited.
    pub max_merges: usize,
    /// Reject a union whose resulting group would exceed this many members.
    pub max_group_size: usize,
    /// Exclude exact-duplicate fingerprint groups larger than this.
    pub max_duplicate_group_size: usize,
    /// Seed for the placeholder gate hash.
    pub seed: u64,
    /// Minimum member count for the final-groups export view.
    pub min_group_size_postfilter: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tau_sim: 0.98,
            alpha: 0.90,
            beta: 0.05,
            intra_layer_only: true,
            similarity_metric: SimilarityMetric::Cosine,
            fingerprint_source: FingerprintSource::Adjacency,
            normalize_fingerprints: true,
            gate: GateMode::Correlation,
            layer_whitelist: None,
            topk_candidates_per_node: 50,
            max_pairs_per_group: 100_000,
            max_merges: 0,
            max_group_size: 10,
            max_duplicate_group_size: 5,
            seed: 123,
            min_group_size_postfilter: 1,
        }
    }
}

impl RunConfig {
    /// Set the similarity threshold.
    #[must_use]
    pub fn with_tau_sim(mut self, tau: f32) -> Self {
        self.tau_sim = tau;
        self
    }

    /// Set the gate correlation floor.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the gate divergence ceiling.
    #[must_use]
    pub fn with_beta(mut self, beta: f32) -> Self {
        self.beta = beta;
        self
    }

    /// Set the similarity metric.
    #[must_use]
    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.similarity_metric = metric;
        self
    }

    /// Set the fingerprint source.
    #[must_use]
    pub fn with_source(mut self, source: FingerprintSource) -> Self {
        self.fingerprint_source = source;
        self
    }

    /// Set the gate strategy.
    #[must_use]
    pub fn with_gate(mut self, gate: GateMode) -> Self {
        self.gate = gate;
        self
    }

    /// Set the per-row candidate cap (0 = unlimited).
    #[must_use]
    pub fn with_topk(mut self, topk: usize) -> Self {
        self.topk_candidates_per_node = topk;
        self
    }

    /// Set the intra-layer restriction.
    #[must_use]
    pub fn with_intra_layer_only(mut self, intra: bool) -> Self {
        self.intra_layer_only = intra;
        self
    }

    /// Set the placeholder-gate seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate all numeric fields. Values are NOT clamped; a run never
    /// starts from an invalid configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tau_sim.is_finite() {
            return Err(ConfigError::invalid(
                "tau_sim",
                format!("must be finite, got {}", self.tau_sim),
            ));
        }
        if !self.alpha.is_finite() {
            return Err(ConfigError::invalid(
                "alpha",
                format!("must be finite, got {}", self.alpha),
            ));
        }
        if !self.beta.is_finite() || self.beta < 0.0 {
            return Err(ConfigError::invalid(
                "beta",
                format!("must be finite and >= 0, got {}", self.beta),
            ));
        }
        if self.max_group_size < 2 {
            return Err(ConfigError::invalid(
                "max_group_size",
                format!(
                    "must be >= 2 (a merged group has at least two members), got {}",
                    self.max_group_size
                ),
            ));
        }
        if self.min_group_size_postfilter < 1 {
            return Err(ConfigError::invalid(
                "min_group_size_postfilter",
                "must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
