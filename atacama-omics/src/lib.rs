//! Single-cell chromatin accessibility analysis for the atacama toolkit.
//!
//! This crate turns a sparse cells × regions count matrix into embeddings,
//! clusters and transferred labels:
//!
//! - **Matrices**: [`CountMatrix`], TF-IDF [`NormalizedMatrix`], [`FeatureMask`]
//! - **Embeddings**: LSI ([`fit_lsi`]), pluggable [`ExternalEmbedder`]s,
//!   UMAP layouts ([`project`]), all stored as named [`Embedding`]s
//! - **Clustering**: kNN [`NeighborGraph`]s and Louvain, SLM or Leiden
//!   community detection ([`cluster`])
//! - **Label transfer**: CCA anchors ([`find_anchors`]) and anchor-weighted
//!   voting ([`transfer_labels`])
//! - **Quality**: correlation distances and [`SilhouetteReport`]s
//! - **Pipeline**: [`run`], [`run_with_embedder`] and [`transfer`] chain the
//!   stages under one [`PipelineConfig`]
//!
//! Every stage takes its inputs by reference and returns a new artifact.
//! Stochastic stages (community detection, UMAP) are seeded.
//!
//! # Quick start
//!
//! ```
//! use atacama_omics::{normalize, CountMatrix, TfIdfConfig};
//! use atacama_core::Summarizable;
//!
//! let counts = CountMatrix::from_dense(
//!     &[vec![2.0, 0.0, 1.0], vec![0.0, 3.0, 1.0]],
//!     vec!["cell_a".into(), "cell_b".into()],
//!     vec!["chr1:100-600".into(), "chr1:900-1400".into(), "chr2:50-550".into()],
//! ).unwrap();
//! assert_eq!(counts.summary(), "CountMatrix: 2 cells \u{00d7} 3 features, 4 non-zero");
//!
//! let tfidf = normalize(&counts, &TfIdfConfig::default()).unwrap();
//! assert_eq!(tfidf.nnz(), 4);
//! ```

pub mod embedding;
pub mod network;
pub mod pipeline;
pub mod sc_anchor;
pub mod sc_cluster;
pub mod sc_external;
pub mod sc_lsi;
pub mod sc_preprocess;
pub mod sc_project;
pub mod sc_quality;
pub mod sc_transfer;
pub mod sparse;

pub use embedding::{CellArtifacts, Embedding};
pub use network::{optimize_modularity, CommunityAlgorithm, Graph};
pub use pipeline::{
    cluster_labels, run, run_with_embedder, transfer, PipelineConfig, PipelineOutput,
    TransferOutput,
};
pub use sc_anchor::{
    consistency_scores, find_anchors, joint_reduction, mutual_neighbors, Anchor, AnchorConfig,
    AnchorSet, JointEmbedding, JointReduction, MutualPair,
};
pub use sc_cluster::{
    build_knn_graph, cluster, ClusterAssignment, ClusterConfig, EdgeWeighting, NeighborGraph,
    NeighborsConfig,
};
pub use sc_external::{embed_checked, EmbedderInput, ExternalEmbedder, FnEmbedder, LsiEmbedder};
pub use sc_lsi::{depth_correlation, fit_lsi, LsiConfig, LsiFit, LsiModel};
pub use sc_preprocess::{
    normalize, select_top_features, FeatureCutoff, FeatureMask, TfIdfConfig, TfIdfMethod,
};
pub use sc_project::{project, ProjectionConfig};
pub use sc_quality::{correlation_distance, silhouette, SilhouetteReport};
pub use sc_transfer::{transfer_labels, LabelPrediction, LabelTransferResult, TransferConfig};
pub use sparse::{CountMatrix, DegenerateFilter, NormalizedMatrix};
