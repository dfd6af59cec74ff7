//! Attribution graph model: typed nodes, weighted directed edges, and the
//! derived indices the clustering pipeline reads.
//!
//! The graph is pure data. It is built once from a normalized node/edge
//! list (id aliasing and schema detection happen upstream) and is read-only
//! afterwards; every lookup the pipeline needs is derived at construction.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of node in an attribution graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// An interpretable feature; the only merge candidates.
    Feature,
    /// An input token position.
    Token,
    /// An output logit; fingerprint columns are indexed by these.
    Logit,
    /// A merged supernode (appears only in presentation output).
    Super,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Feature => "feature",
            Self::Token => "token",
            Self::Logit => "logit",
            Self::Super => "super",
        };
        f.write_str(s)
    }
}

/// Comparable layer key with an explicit sentinel for "unknown layer".
///
/// Keeping the sentinel inside the key type (rather than `Option<i32>`)
/// makes grouping and sorting total: unknown layers sort first and hash
/// consistently as `-1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LayerKey(i32);

impl LayerKey {
    /// Sentinel for nodes without a layer assignment.
    pub const UNKNOWN: LayerKey = LayerKey(-1);

    /// Key for a known layer index.
    #[inline]
    pub fn new(layer: i32) -> Self {
        Self(layer)
    }

    /// Key from an optional layer, mapping `None` to [`LayerKey::UNKNOWN`].
    #[inline]
    pub fn from_layer(layer: Option<i32>) -> Self {
        layer.map(Self::new).unwrap_or(Self::UNKNOWN)
    }

    /// Raw key value (`-1` for unknown).
    #[inline]
    pub fn value(&self) -> i32 {
        self.0
    }

    /// Whether this key is the unknown-layer sentinel.
    #[inline]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node in the attribution graph. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Globally unique identifier.
    pub id: String,
    /// Node kind.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Layer index if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<i32>,
    /// Free-form metadata; `delta_logit`-style fingerprint vectors and the
    /// scalar `influence` value are read from here.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl Node {
    /// Construct a node without metadata.
    pub fn new(id: impl Into<String>, node_type: NodeType, layer: Option<i32>) -> Self {
        Self {
            id: id.into(),
            node_type,
            layer,
            meta: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry (builder style).
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Layer key for this node (`UNKNOWN` when the layer is absent).
    #[inline]
    pub fn layer_key(&self) -> LayerKey {
        LayerKey::from_layer(self.layer)
    }

    /// Scalar influence read from metadata, `0.0` when absent or non-finite.
    pub fn influence(&self) -> f32 {
        match self.meta.get("influence").and_then(|v| v.as_f64()) {
            Some(v) if v.is_finite() => v as f32,
            _ => 0.0,
        }
    }
}

/// A weighted directed edge; sign of the weight is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Causal influence weight.
    pub weight: f32,
}

impl Edge {
    /// Construct an edge.
    pub fn new(source: impl Into<String>, target: impl Into<String>, weight: f32) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            weight,
        }
    }
}

/// Graph-level summary for the presentation layer.
///
/// `layers` is the contiguous `min..=max` range of present layers so a UI
/// can render a complete axis; `layer_hist` counts features per layer key
/// with unknown layers bucketed at `-1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphInfo {
    /// Total node count.
    pub num_nodes: usize,
    /// Total stored edge count.
    pub num_edges: usize,
    /// Contiguous layer range covering all present layers.
    pub layers: Vec<i32>,
    /// Feature count per layer key.
    pub layer_hist: BTreeMap<LayerKey, usize>,
    /// Ids of all logit nodes, in graph order.
    pub logit_ids: Vec<String>,
}

/// An attribution graph with indices derived once at construction.
///
/// Invariant: every edge stored here has both endpoints present in the
/// node set. Edges referencing unknown ids are dropped (with a logged
/// count) rather than stored, so adjacency lookups never dangle.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    node_index: HashMap<String, usize>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    layers: Vec<i32>,
    feature_ids: Vec<String>,
    token_ids: Vec<String>,
    logit_ids: Vec<String>,
}

impl Graph {
    /// Build a graph and all derived indices from a normalized node/edge
    /// list.
    ///
    /// Nodes with a duplicate id are skipped (first occurrence wins) and
    /// edges with an unknown endpoint are dropped; both cases are logged.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let mut node_index: HashMap<String, usize> = HashMap::with_capacity(nodes.len());
        let mut kept_nodes: Vec<Node> = Vec::with_capacity(nodes.len());
        let mut duplicate_nodes = 0usize;
        for node in nodes {
            if node_index.contains_key(&node.id) {
                duplicate_nodes += 1;
                continue;
            }
            node_index.insert(node.id.clone(), kept_nodes.len());
            kept_nodes.push(node);
        }

        let mut kept_edges: Vec<Edge> = Vec::with_capacity(edges.len());
        let mut dropped_edges = 0usize;
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); kept_nodes.len()];
        let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); kept_nodes.len()];
        for edge in edges {
            match (node_index.get(&edge.source), node_index.get(&edge.target)) {
                (Some(&s), Some(&t)) => {
                    let ei = kept_edges.len();
                    outgoing[s].push(ei);
                    incoming[t].push(ei);
                    kept_edges.push(edge);
                }
                _ => dropped_edges += 1,
            }
        }

        if duplicate_nodes > 0 || dropped_edges > 0 {
            tracing::warn!(
                duplicate_nodes,
                dropped_edges,
                "graph construction discarded inconsistent input"
            );
        }

        let mut layer_set: Vec<i32> = kept_nodes.iter().filter_map(|n| n.layer).collect();
        layer_set.sort_unstable();
        layer_set.dedup();

        let ids_of = |t: NodeType| -> Vec<String> {
            kept_nodes
                .iter()
                .filter(|n| n.node_type == t)
                .map(|n| n.id.clone())
                .collect()
        };
        let feature_ids = ids_of(NodeType::Feature);
        let token_ids = ids_of(NodeType::Token);
        let logit_ids = ids_of(NodeType::Logit);

        tracing::debug!(
            num_nodes = kept_nodes.len(),
            num_edges = kept_edges.len(),
            num_features = feature_ids.len(),
            num_logits = logit_ids.len(),
            num_layers = layer_set.len(),
            "graph indices built"
        );

        Self {
            nodes: kept_nodes,
            edges: kept_edges,
            node_index,
            outgoing,
            incoming,
            layers: layer_set,
            feature_ids,
            token_ids,
            logit_ids,
        }
    }

    /// All nodes in construction order.
    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All stored edges in construction order.
    #[inline]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Node lookup by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    /// Layer of the node with the given id, if both exist.
    pub fn layer_of(&self, id: &str) -> Option<i32> {
        self.node(id).and_then(|n| n.layer)
    }

    /// Outgoing edges of a node; empty for unknown ids.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.adjacent(id, &self.outgoing)
    }

    /// Incoming edges of a node; empty for unknown ids.
    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.adjacent(id, &self.incoming)
    }

    fn adjacent<'a>(
        &'a self,
        id: &str,
        index: &'a [Vec<usize>],
    ) -> impl Iterator<Item = &'a Edge> {
        let slot: &[usize] = self
            .node_index
            .get(id)
            .map(|&i| index[i].as_slice())
            .unwrap_or(&[]);
        slot.iter().map(move |&ei| &self.edges[ei])
    }

    /// Sorted distinct known layers.
    #[inline]
    pub fn layers(&self) -> &[i32] {
        &self.layers
    }

    /// Ids of all feature nodes, in graph order.
    #[inline]
    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// Ids of all token nodes, in graph order.
    #[inline]
    pub fn token_ids(&self) -> &[String] {
        &self.token_ids
    }

    /// Ids of all logit nodes, in graph order.
    #[inline]
    pub fn logit_ids(&self) -> &[String] {
        &self.logit_ids
    }

    /// `(node_count, edge_count)` of the stored graph.
    #[inline]
    pub fn counts(&self) -> (usize, usize) {
        (self.nodes.len(), self.edges.len())
    }

    /// Summary for the presentation layer.
    pub fn info(&self) -> GraphInfo {
        let mut layer_hist: BTreeMap<LayerKey, usize> = BTreeMap::new();
        for fid in &self.feature_ids {
            let key = LayerKey::from_layer(self.layer_of(fid));
            *layer_hist.entry(key).or_insert(0) += 1;
        }
        let layers = match (self.layers.first(), self.layers.last()) {
            (Some(&min), Some(&max)) => (min..=max).collect(),
            _ => Vec::new(),
        };
        GraphInfo {
            num_nodes: self.nodes.len(),
            num_edges: self.edges.len(),
            layers,
            layer_hist,
            logit_ids: self.logit_ids.clone(),
        }
    }
}
