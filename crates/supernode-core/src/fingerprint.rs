//! Fingerprint construction: one numeric vector per feature node
//! describing its causal influence on the graph's logit (or fallback
//! token) nodes.
//!
//! Two sources exist. `Adjacency` accumulates outgoing edge weights into
//! logit-indexed columns. `DeltaLogit` reads a precomputed vector from
//! node metadata; if any selected node lacks a usable vector or the
//! dimensions are inconsistent, the whole run falls back to `Adjacency`
//! (modes are never mixed within a run).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::{FingerprintSource, RunConfig};
use crate::graph::{Graph, LayerKey, NodeType};
use crate::similarity::l2_normalize_rows;

/// Metadata keys accepted for provided fingerprint vectors, in priority
/// order.
const VECTOR_META_KEYS: [&str; 3] = ["delta_logit", "fingerprint", "vec"];

/// Which node type indexes the fingerprint columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSpace {
    /// Columns are logit node ids (the normal case).
    Logit,
    /// Columns are token node ids (fallback when the graph has no logits).
    Token,
    /// Columns come from provided metadata vectors.
    Provided,
}

/// Fingerprint of one feature node.
///
/// An empty vector (dimension 0) is an explicit degenerate state — it
/// means fewer than two columns existed — and is never treated as a
/// zero-similarity vector downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFingerprint {
    /// Feature node id.
    pub node_id: String,
    /// Layer key used for comparison grouping.
    pub layer: LayerKey,
    /// Node type of the fingerprinted node.
    pub feature_type: NodeType,
    /// Influence vector over the column space.
    pub vector: Vec<f32>,
    /// The node's scalar influence value.
    pub influence: f32,
}

/// The full fingerprint batch for one run, in feature order.
#[derive(Debug, Clone)]
pub struct FingerprintSet {
    rows: Vec<NodeFingerprint>,
    dimension: usize,
    source: FingerprintSource,
    column_space: ColumnSpace,
}

impl FingerprintSet {
    /// Number of fingerprinted features.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no features were fingerprinted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Common vector dimension (0 in the degenerate state).
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The source that actually produced the vectors. Differs from the
    /// configured source when `DeltaLogit` fell back to `Adjacency`.
    #[inline]
    pub fn source(&self) -> FingerprintSource {
        self.source
    }

    /// Which node type indexes the columns.
    #[inline]
    pub fn column_space(&self) -> ColumnSpace {
        self.column_space
    }

    /// All fingerprint rows, in feature order.
    #[inline]
    pub fn rows(&self) -> &[NodeFingerprint] {
        &self.rows
    }

    /// Row at a dense index.
    #[inline]
    pub fn row(&self, i: usize) -> &NodeFingerprint {
        &self.rows[i]
    }

    /// Feature ids, in row order.
    pub fn ids(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.node_id.clone()).collect()
    }
}

/// Build fingerprints for every candidate-bearing feature node.
///
/// Features are taken in graph order, optionally restricted by the
/// configured layer whitelist. Logit nodes are never fingerprinted; they
/// are destinations, not candidates.
pub fn build_fingerprints(graph: &Graph, config: &RunConfig) -> FingerprintSet {
    let selected = select_features(graph, config);

    if config.fingerprint_source == FingerprintSource::DeltaLogit {
        match provided_vectors(graph, &selected) {
            Some(vectors) => {
                return assemble(
                    graph,
                    selected,
                    vectors,
                    FingerprintSource::DeltaLogit,
                    ColumnSpace::Provided,
                    config.normalize_fingerprints,
                );
            }
            None => {
                tracing::warn!(
                    "provided fingerprint vectors missing or inconsistent; \
                     falling back to adjacency source for the whole run"
                );
            }
        }
    }

    let (vectors, column_space) = adjacency_vectors(graph, &selected);
    assemble(
        graph,
        selected,
        vectors,
        FingerprintSource::Adjacency,
        column_space,
        config.normalize_fingerprints,
    )
}

/// Feature ids after applying the layer whitelist.
fn select_features(graph: &Graph, config: &RunConfig) -> Vec<String> {
    match &config.layer_whitelist {
        None => graph.feature_ids().to_vec(),
        Some(whitelist) => graph
            .feature_ids()
            .iter()
            .filter(|fid| {
                graph
                    .layer_of(fid)
                    .map(|layer| whitelist.contains(&layer))
                    .unwrap_or(false)
            })
            .cloned()
            .collect(),
    }
}

/// Read provided vectors from node metadata. `None` when any selected
/// node lacks a usable vector or dimensions are inconsistent.
fn provided_vectors(graph: &Graph, selected: &[String]) -> Option<Vec<Vec<f32>>> {
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(selected.len());
    let mut dim: Option<usize> = None;
    for fid in selected {
        let node = graph.node(fid)?;
        let vector = VECTOR_META_KEYS
            .iter()
            .find_map(|key| node.meta.get(*key))
            .and_then(parse_vector)?;
        match dim {
            None => dim = Some(vector.len()),
            Some(d) if d != vector.len() => {
                tracing::debug!(
                    node_id = %fid,
                    expected = d,
                    actual = vector.len(),
                    "inconsistent provided-vector dimension"
                );
                return None;
            }
            Some(_) => {}
        }
        vectors.push(vector);
    }
    Some(vectors)
}

fn parse_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    let array = value.as_array()?;
    let mut out = Vec::with_capacity(array.len());
    for entry in array {
        let v = entry.as_f64()?;
        out.push(v as f32);
    }
    Some(out)
}

/// Accumulate outgoing edge weights into logit-indexed columns, falling
/// back to token columns when the graph has no logits. With fewer than
/// two columns every vector is empty (dimension 0).
fn adjacency_vectors(graph: &Graph, selected: &[String]) -> (Vec<Vec<f32>>, ColumnSpace) {
    let (column_ids, column_space) = if graph.logit_ids().is_empty() {
        (graph.token_ids(), ColumnSpace::Token)
    } else {
        (graph.logit_ids(), ColumnSpace::Logit)
    };
    let dim = column_ids.len();
    if dim < 2 {
        tracing::warn!(
            columns = dim,
            "fewer than two fingerprint columns; emitting empty fingerprints"
        );
        return (vec![Vec::new(); selected.len()], column_space);
    }

    let column_index: HashMap<&str, usize> = column_ids
        .iter()
        .enumerate()
        .map(|(j, id)| (id.as_str(), j))
        .collect();

    let vectors = selected
        .iter()
        .map(|fid| {
            let mut row = vec![0.0f32; dim];
            for edge in graph.outgoing(fid) {
                if let Some(&j) = column_index.get(edge.target.as_str()) {
                    row[j] += edge.weight;
                }
            }
            row
        })
        .collect();
    (vectors, column_space)
}

fn assemble(
    graph: &Graph,
    selected: Vec<String>,
    mut vectors: Vec<Vec<f32>>,
    source: FingerprintSource,
    column_space: ColumnSpace,
    normalize: bool,
) -> FingerprintSet {
    if normalize {
        l2_normalize_rows(&mut vectors);
    }
    let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
    let rows: Vec<NodeFingerprint> = selected
        .into_iter()
        .zip(vectors)
        .map(|(node_id, vector)| {
            let node = graph.node(&node_id);
            NodeFingerprint {
                layer: LayerKey::from_layer(node.and_then(|n| n.layer)),
                feature_type: node.map(|n| n.node_type).unwrap_or(NodeType::Feature),
                influence: node.map(|n| n.influence()).unwrap_or(0.0),
                node_id,
                vector,
            }
        })
        .collect();

    tracing::debug!(
        rows = rows.len(),
        dimension,
        ?source,
        ?column_space,
        "fingerprints built"
    );

    FingerprintSet {
        rows,
        dimension,
        source,
        column_space,
    }
}
