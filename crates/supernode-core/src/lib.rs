//! Supernode Core Library
//!
//! Deterministic clustering core that discovers "supernodes" (groups of
//! near-duplicate feature nodes) in causal attribution graphs.
//!
//! # Architecture
//!
//! This crate defines:
//! - Graph domain types (`Graph`, `Node`, `Edge`, `LayerKey`)
//! - Fingerprint construction (`build_fingerprints`, `FingerprintSet`)
//! - Similarity and candidate selection (`similarity_matrix`, `select_candidates`)
//! - The fidelity gate (`FidelityGate`, `GateOutcome`)
//! - Grouping state (`UnionFind`) with replayable snapshots
//! - The run orchestrator (`pipeline::run`) and step-indexed replay
//!
//! Determinism is the central contract: given the same graph, the same
//! configuration, and the same seed, every run produces bit-identical
//! merge logs, snapshots, and statistics. All tie-breaks are explicit
//! lexicographic keys.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use supernode_core::config::{GateMode, RunConfig};
//! use supernode_core::graph::{Edge, Graph, Node, NodeType};
//!
//! let graph = Arc::new(Graph::new(
//!     vec![
//!         Node::new("f0", NodeType::Feature, Some(0)),
//!         Node::new("f1", NodeType::Feature, Some(0)),
//!         Node::new("out", NodeType::Logit, None),
//!         Node::new("alt", NodeType::Logit, None),
//!     ],
//!     vec![
//!         Edge::new("f0", "out", 1.0),
//!         Edge::new("f1", "out", 1.0),
//!     ],
//! ));
//! let config = RunConfig::default().with_gate(GateMode::Disabled);
//! let state = supernode_core::pipeline::run(graph, &config).unwrap();
//! assert_eq!(state.merge_log().len(), 1);
//! ```

pub mod config;
pub mod current;
pub mod dsu;
pub mod error;
pub mod fingerprint;
pub mod gate;
pub mod graph;
pub mod pipeline;
pub mod similarity;

// Re-exports for convenience
pub use config::RunConfig;
pub use current::CurrentRun;
pub use error::{Result, SupernodeError};
pub use graph::{Graph, LayerKey};
pub use pipeline::{run, RunState};
