//! Run orchestrator: drives the clustering pipeline per comparison group
//! and freezes the result as a [`RunState`].
//!
//! One run is a single-threaded batch computation through the phases
//! Building → Proposing → Gating → Merging → Complete. Comparison groups
//! are processed in ascending layer-key order; within a group, candidates
//! are processed in the globally sorted order from the selector. A merge
//! whose endpoints already share a set is skipped, not an error. Hard
//! caps stop processing early but never roll back applied merges.
//!
//! Determinism is a contract: identical graph, configuration, and seed
//! produce identical merge logs and snapshots, bit for bit. Every
//! tie-break is an explicit key (lexicographic id pairs), never incidental
//! map order.

mod replay;

pub use replay::{snapshot_at, Snapshot, SnapshotEdge, SnapshotMetrics, SnapshotNode};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::dsu::UnionFind;
use crate::fingerprint::{build_fingerprints, FingerprintSet};
use crate::gate::{FidelityGate, GateCounters};
use crate::graph::{Graph, LayerKey};
use crate::similarity::{
    informative_rows, select_candidates, similarity_matrix, MergeCandidate, RowFilterStats,
};

/// Pipeline phase, for instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// No active run.
    Idle,
    /// Fingerprints under construction.
    Building,
    /// Candidates being generated per comparison group.
    Proposing,
    /// Candidates being filtered by the fidelity gate.
    Gating,
    /// Accepted unions being applied, log and snapshots appended.
    Merging,
    /// RunState frozen.
    Complete,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::Proposing => "proposing",
            Self::Gating => "gating",
            Self::Merging => "merging",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Accepted record of one successful union. Immutable once appended; the
/// log order is the causal order of acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeEvent {
    /// Lexicographically smaller node id of the merged pair.
    pub u: String,
    /// Lexicographically larger node id of the merged pair.
    pub v: String,
    /// Similarity score that proposed the pair.
    pub score: f32,
    /// Layer key of the comparison group.
    pub layer: LayerKey,
    /// Gate metric 1 (mean correlation).
    pub mean_corr: f32,
    /// Gate metric 2 (divergence/CE gap).
    pub ce_gap: f32,
}

/// Per-comparison-group breakdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStats {
    /// Candidates proposed in this group.
    pub candidates: usize,
    /// Merges accepted in this group.
    pub accepted: usize,
}

/// Run-level statistics, frozen with the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Features fingerprinted.
    pub num_features: usize,
    /// Candidates proposed across all groups (pre-gate).
    pub num_candidates: usize,
    /// Merges accepted.
    pub num_accepted: usize,
    /// Groups in the final partition.
    pub num_groups: usize,
    /// Feature count divided by final group count.
    pub compression_ratio: f32,
    /// Comparison-group keys, ascending.
    pub layers: Vec<LayerKey>,
    /// Snapshot timeline length (== accepted merges).
    pub timeline_len: usize,
    /// Gate failure breakdown.
    pub gate: GateCounters,
    /// Informative-row filter breakdown.
    pub rows: RowFilterStats,
    /// Unions rejected because the merged group would exceed the size cap.
    pub size_cap_skips: usize,
    /// Per-group candidate/acceptance counts.
    pub per_layer: BTreeMap<LayerKey, LayerStats>,
}

/// Summary of one final group for the export view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    /// Supernode id, `super|{layer}|{root_index}`.
    pub id: String,
    /// Smallest known member layer, `-1` when all unknown.
    pub layer: LayerKey,
    /// Member count.
    pub size: usize,
    /// Member node ids, in fingerprint-row order.
    pub members: Vec<String>,
    /// Mean of the members' scalar influence values.
    pub mean_influence: f32,
}

/// Frozen result of one pipeline run.
///
/// Created by [`run`], mutated only during that execution, then owned by
/// the caller; replay and export read it without mutation. A later run
/// produces a fresh `RunState` — states are replaced wholesale, never
/// partially merged.
#[derive(Debug)]
pub struct RunState {
    graph: Arc<Graph>,
    config: RunConfig,
    fingerprints: FingerprintSet,
    dsu: UnionFind,
    merge_log: Vec<MergeEvent>,
    parent_snapshots: Vec<Vec<usize>>,
    stats: RunStats,
}

impl RunState {
    /// Graph the run was computed over.
    #[inline]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Configuration the run was computed with.
    #[inline]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Fingerprint batch, in feature order.
    #[inline]
    pub fn fingerprints(&self) -> &FingerprintSet {
        &self.fingerprints
    }

    /// Ordered merge log.
    #[inline]
    pub fn merge_log(&self) -> &[MergeEvent] {
        &self.merge_log
    }

    /// Parent-array snapshots, one per accepted merge, in acceptance order.
    #[inline]
    pub fn parent_snapshots(&self) -> &[Vec<usize>] {
        &self.parent_snapshots
    }

    /// Number of replayable steps.
    #[inline]
    pub fn timeline_len(&self) -> usize {
        self.parent_snapshots.len()
    }

    /// Run-level statistics.
    #[inline]
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Grouping and aggregated supernode→logit edges as of `step`
    /// accepted merges. See [`snapshot_at`].
    pub fn snapshot(&self, step: usize, edge_opacity_threshold: f32) -> Snapshot {
        snapshot_at(self, step, edge_opacity_threshold)
    }

    /// Final groups for export, filtered by the run's configured
    /// `min_group_size_postfilter`.
    pub fn final_groups(&self) -> Vec<GroupSummary> {
        self.final_groups_with_min(self.config.min_group_size_postfilter)
    }

    /// Final groups with at least `min_size` members, overriding the
    /// configured postfilter.
    ///
    /// Groups are ordered by root index; members are in fingerprint-row
    /// order.
    pub fn final_groups_with_min(&self, min_size: usize) -> Vec<GroupSummary> {
        let min_size = min_size.max(1);
        self.dsu
            .groups()
            .into_iter()
            .filter(|(_, members)| members.len() >= min_size)
            .map(|(root, members)| {
                let layer = group_layer(&self.fingerprints, &members);
                let mean_influence = if members.is_empty() {
                    0.0
                } else {
                    members
                        .iter()
                        .map(|&i| self.fingerprints.row(i).influence)
                        .sum::<f32>()
                        / members.len() as f32
                };
                GroupSummary {
                    id: supernode_id(layer, root),
                    layer,
                    size: members.len(),
                    members: members
                        .iter()
                        .map(|&i| self.fingerprints.row(i).node_id.clone())
                        .collect(),
                    mean_influence,
                }
            })
            .collect()
    }
}

/// Smallest known member layer, `UNKNOWN` when all members lack one.
pub(crate) fn group_layer(fingerprints: &FingerprintSet, members: &[usize]) -> LayerKey {
    members
        .iter()
        .map(|&i| fingerprints.row(i).layer)
        .filter(|k| !k.is_unknown())
        .min()
        .unwrap_or(LayerKey::UNKNOWN)
}

/// Supernode id for a group: layer and root index.
pub(crate) fn supernode_id(layer: LayerKey, root: usize) -> String {
    format!("super|{layer}|{root}")
}

/// Execute one pipeline run over `graph`.
///
/// Validates the configuration before any work begins; all per-node and
/// per-pair anomalies afterwards are absorbed with logged counters, so a
/// started run always completes (possibly with zero candidates).
pub fn run(graph: Arc<Graph>, config: &RunConfig) -> crate::error::Result<RunState> {
    config.validate()?;

    tracing::debug!(phase = %RunPhase::Building, "pipeline phase");
    let fingerprints = build_fingerprints(&graph, config);
    let (kept, row_stats) = informative_rows(&fingerprints, config.max_duplicate_group_size);

    // Comparison groups: per layer key when restricted, otherwise one
    // global group keyed by the unknown sentinel.
    let groups: BTreeMap<LayerKey, Vec<usize>> = if config.intra_layer_only {
        let mut m: BTreeMap<LayerKey, Vec<usize>> = BTreeMap::new();
        for &i in &kept {
            m.entry(fingerprints.row(i).layer).or_default().push(i);
        }
        m
    } else {
        let mut m = BTreeMap::new();
        m.insert(LayerKey::UNKNOWN, kept.clone());
        m
    };

    let mut dsu = UnionFind::new(fingerprints.ids());
    let row_index: HashMap<&str, usize> = fingerprints
        .rows()
        .iter()
        .enumerate()
        .map(|(i, r)| (r.node_id.as_str(), i))
        .collect();

    let gate = FidelityGate::from_config(config);
    let mut gate_counters = GateCounters::default();
    let mut merge_log: Vec<MergeEvent> = Vec::new();
    let mut parent_snapshots: Vec<Vec<usize>> = Vec::new();
    let mut per_layer: BTreeMap<LayerKey, LayerStats> = BTreeMap::new();
    let mut num_candidates = 0usize;
    let mut size_cap_skips = 0usize;

    'groups: for (&group_key, rows) in &groups {
        if rows.len() < 2 {
            continue;
        }

        tracing::debug!(phase = %RunPhase::Proposing, layer = %group_key, rows = rows.len(), "pipeline phase");
        let vectors: Vec<Vec<f32>> = rows
            .iter()
            .map(|&i| fingerprints.row(i).vector.clone())
            .collect();
        let ids: Vec<&str> = rows
            .iter()
            .map(|&i| fingerprints.row(i).node_id.as_str())
            .collect();
        let matrix = similarity_matrix(&vectors, config.similarity_metric);
        let mut candidates: Vec<MergeCandidate> = select_candidates(
            &matrix,
            &ids,
            group_key,
            config.tau_sim,
            config.topk_candidates_per_node,
            config.max_pairs_per_group,
        );
        drop(matrix); // O(n²) per group; not retained past extraction

        if !config.intra_layer_only {
            // Global mode has no grouping key; tag each candidate with
            // its smaller member's layer for the log and breakdown.
            for c in candidates.iter_mut() {
                if let Some(&i) = row_index.get(c.a.as_str()) {
                    c.layer = fingerprints.row(i).layer;
                }
            }
        }

        num_candidates += candidates.len();
        for c in &candidates {
            per_layer.entry(c.layer).or_default().candidates += 1;
        }
        tracing::debug!(
            layer = %group_key,
            candidates = candidates.len(),
            tau_sim = config.tau_sim,
            "candidates proposed"
        );

        tracing::debug!(phase = %RunPhase::Gating, layer = %group_key, "pipeline phase");
        for candidate in &candidates {
            let (ia, ib) = match (
                row_index.get(candidate.a.as_str()),
                row_index.get(candidate.b.as_str()),
            ) {
                (Some(&ia), Some(&ib)) => (ia, ib),
                _ => continue,
            };

            // Earlier merges in this batch mutate the grouping; a pair
            // already joined is skipped, not an error.
            if dsu.find(ia) == dsu.find(ib) {
                continue;
            }

            let outcome = gate.evaluate(fingerprints.row(ia), fingerprints.row(ib));
            gate_counters.record(&outcome);
            if !outcome.admitted() {
                continue;
            }

            // Size cap lives here, one layer above the union-find
            // primitive.
            if dsu.group_size(ia) + dsu.group_size(ib) > config.max_group_size {
                size_cap_skips += 1;
                tracing::debug!(
                    a = %candidate.a,
                    b = %candidate.b,
                    max_group_size = config.max_group_size,
                    "merge skipped: resulting group would exceed size cap"
                );
                continue;
            }

            if dsu.union(ia, ib) {
                merge_log.push(MergeEvent {
                    u: candidate.a.clone(),
                    v: candidate.b.clone(),
                    score: candidate.score,
                    layer: candidate.layer,
                    mean_corr: outcome.mean_corr,
                    ce_gap: outcome.ce_gap,
                });
                parent_snapshots.push(dsu.snapshot());
                per_layer.entry(candidate.layer).or_default().accepted += 1;

                if config.max_merges > 0 && merge_log.len() >= config.max_merges {
                    tracing::debug!(max_merges = config.max_merges, "merge cap reached");
                    break 'groups;
                }
            }
        }
    }

    let num_features = fingerprints.len();
    let num_groups = dsu.groups().len();
    let compression_ratio = if num_groups > 0 {
        num_features as f32 / num_groups as f32
    } else {
        1.0
    };

    let stats = RunStats {
        num_features,
        num_candidates,
        num_accepted: merge_log.len(),
        num_groups,
        compression_ratio,
        layers: groups.keys().copied().collect(),
        timeline_len: parent_snapshots.len(),
        gate: gate_counters,
        rows: row_stats,
        size_cap_skips,
        per_layer,
    };

    tracing::info!(
        phase = %RunPhase::Complete,
        num_features,
        num_candidates = stats.num_candidates,
        num_accepted = stats.num_accepted,
        num_groups,
        compression_ratio = %format!("{compression_ratio:.3}"),
        "pipeline run complete"
    );

    Ok(RunState {
        graph,
        config: config.clone(),
        fingerprints,
        dsu,
        merge_log,
        parent_snapshots,
        stats,
    })
}
