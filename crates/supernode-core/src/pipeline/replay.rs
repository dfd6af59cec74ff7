//! Step-indexed replay over a frozen run.
//!
//! A snapshot reconstructs the grouping as of `step` accepted merges
//! without mutating run state: step 0 is the pre-merge identity
//! partition, step `k` applies the first `k` merges, and any step past
//! the timeline clamps to the final state. Snapshots are pure reads, so
//! any sequence of steps in any order is valid and two snapshots at the
//! same step are identical.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::{LayerKey, NodeType};

use super::{group_layer, supernode_id, RunState};

/// One group as of a replay step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// Supernode id, stable for a given root index and layer.
    pub id: String,
    /// Member node ids, in fingerprint-row order.
    pub members: Vec<String>,
    /// Smallest known member layer, `-1` when all unknown.
    pub layer: LayerKey,
    /// Member count.
    pub size: usize,
}

/// Aggregated edge from a group to a logit node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    /// Supernode id of the source group.
    pub source: String,
    /// Logit node id.
    pub target: String,
    /// Sum of member edge weights onto the target.
    pub weight: f32,
}

/// Aggregate measures over a snapshot's partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    /// Mean member count per group.
    pub mean_group_size: f32,
    /// Group count.
    pub num_groups: usize,
    /// Fingerprinted features per group.
    pub compression_ratio: f32,
}

/// Grouping and aggregated edges as of `step` accepted merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The step actually rendered, after clamping.
    pub step: usize,
    /// Groups, ordered by root index.
    pub nodes: Vec<SnapshotNode>,
    /// Group→logit edges with `|weight| >= threshold`, ordered by
    /// (source group, target id).
    pub edges: Vec<SnapshotEdge>,
    /// Partition measures.
    pub metrics: SnapshotMetrics,
}

/// Build the snapshot for `step`. Edges whose aggregated absolute
/// weight falls below `edge_opacity_threshold` are dropped.
pub fn snapshot_at(state: &RunState, step: usize, edge_opacity_threshold: f32) -> Snapshot {
    let n = state.fingerprints().len();
    let timeline = state.parent_snapshots();

    // Parent arrays are fully rooted, so group membership is a direct
    // read of parent[i].
    let (step, parents): (usize, Vec<usize>) = if step == 0 || timeline.is_empty() {
        (0, (0..n).collect())
    } else if step >= timeline.len() {
        (timeline.len(), timeline[timeline.len() - 1].clone())
    } else {
        (step, timeline[step - 1].clone())
    };

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &root) in parents.iter().enumerate() {
        groups.entry(root).or_default().push(i);
    }

    let mut nodes: Vec<SnapshotNode> = Vec::with_capacity(groups.len());
    let mut edges: Vec<SnapshotEdge> = Vec::new();
    for (&root, members) in &groups {
        let layer = group_layer(state.fingerprints(), members);
        let id = supernode_id(layer, root);

        let mut outgoing: BTreeMap<&str, f32> = BTreeMap::new();
        for &i in members {
            let member_id = &state.fingerprints().row(i).node_id;
            for edge in state.graph().outgoing(member_id) {
                let is_logit = state
                    .graph()
                    .node(&edge.target)
                    .map(|t| t.node_type == NodeType::Logit)
                    .unwrap_or(false);
                if is_logit {
                    *outgoing.entry(edge.target.as_str()).or_insert(0.0) += edge.weight;
                }
            }
        }
        for (target, weight) in outgoing {
            if weight.abs() >= edge_opacity_threshold {
                edges.push(SnapshotEdge {
                    source: id.clone(),
                    target: target.to_string(),
                    weight,
                });
            }
        }

        nodes.push(SnapshotNode {
            id,
            members: members
                .iter()
                .map(|&i| state.fingerprints().row(i).node_id.clone())
                .collect(),
            layer,
            size: members.len(),
        });
    }

    let num_groups = nodes.len();
    let metrics = SnapshotMetrics {
        mean_group_size: if num_groups > 0 {
            n as f32 / num_groups as f32
        } else {
            0.0
        },
        num_groups,
        compression_ratio: if num_groups > 0 {
            n as f32 / num_groups as f32
        } else {
            1.0
        },
    };

    Snapshot {
        step,
        nodes,
        edges,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{GateMode, RunConfig};
    use crate::graph::{Edge, Graph, Node};
    use crate::pipeline::run;

    fn merged_state() -> RunState {
        let nodes = vec![
            Node::new("f0", NodeType::Feature, Some(0)),
            Node::new("f1", NodeType::Feature, Some(0)),
            Node::new("f2", NodeType::Feature, Some(0)),
            Node::new("lA", NodeType::Logit, None),
            Node::new("lB", NodeType::Logit, None),
        ];
        let edges = vec![
            Edge::new("f0", "lA", 1.0),
            Edge::new("f0", "lB", 0.5),
            Edge::new("f1", "lA", 1.0),
            Edge::new("f1", "lB", 0.51),
            Edge::new("f2", "lA", -0.01),
            Edge::new("f2", "lB", 1.0),
        ];
        let cfg = RunConfig::default()
            .with_tau_sim(0.98)
            .with_gate(GateMode::Disabled);
        run(Arc::new(Graph::new(nodes, edges)), &cfg).expect("run")
    }

    #[test]
    fn step_zero_is_identity_partition() {
        let state = merged_state();
        let snap = state.snapshot(0, 0.0);
        assert_eq!(snap.step, 0);
        assert_eq!(snap.nodes.len(), 3);
        assert!(snap.nodes.iter().all(|g| g.size == 1));
        assert_eq!(snap.metrics.num_groups, 3);
        assert_eq!(snap.metrics.compression_ratio, 1.0);
    }

    #[test]
    fn steps_past_timeline_clamp_to_final() {
        let state = merged_state();
        assert_eq!(state.timeline_len(), 1);
        let last = state.snapshot(1, 0.0);
        let clamped = state.snapshot(999, 0.0);
        assert_eq!(clamped.step, 1);
        assert_eq!(last, clamped);
        assert_eq!(last.metrics.num_groups, 2);
    }

    #[test]
    fn merged_group_aggregates_member_edges() {
        let state = merged_state();
        let snap = state.snapshot(1, 0.0);
        let merged = snap
            .nodes
            .iter()
            .find(|g| g.size == 2)
            .expect("one merged group");
        assert_eq!(merged.members, vec!["f0".to_string(), "f1".to_string()]);
        assert_eq!(merged.layer, LayerKey::new(0));

        let to_a = snap
            .edges
            .iter()
            .find(|e| e.source == merged.id && e.target == "lA")
            .expect("aggregated edge to lA");
        assert!((to_a.weight - 2.0).abs() < 1e-6);
        let to_b = snap
            .edges
            .iter()
            .find(|e| e.source == merged.id && e.target == "lB")
            .expect("aggregated edge to lB");
        assert!((to_b.weight - 1.01).abs() < 1e-6);
    }

    #[test]
    fn opacity_threshold_drops_faint_edges() {
        let state = merged_state();
        let snap = state.snapshot(1, 0.1);
        // f2's -0.01 edge onto lA is below the threshold in magnitude.
        let f2_group = snap
            .nodes
            .iter()
            .find(|g| g.members == vec!["f2".to_string()])
            .expect("singleton f2");
        assert!(!snap
            .edges
            .iter()
            .any(|e| e.source == f2_group.id && e.target == "lA"));
        assert!(snap
            .edges
            .iter()
            .any(|e| e.source == f2_group.id && e.target == "lB"));
    }

    #[test]
    fn repeated_snapshots_are_identical() {
        let state = merged_state();
        let a = state.snapshot(1, 0.05);
        let b = state.snapshot(1, 0.05);
        assert_eq!(a, b);
    }
}
