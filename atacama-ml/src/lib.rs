//! Numerical machinery for the atacama toolkit.
//!
//! - **Distances** — metrics and condensed [`DistanceMatrix`]
//! - **Neighbors** — exact kNN within one set or across two sets
//! - **Linear algebra** — Jacobi symmetric eigensolver, truncated SVD, PCA
//! - **UMAP** — seeded nonlinear projection for visualization
//! - **Evaluation** — silhouette widths, ARI, NMI

pub mod distance;
pub mod evaluate;
pub mod knn;
pub mod linalg;
pub mod reduction;
pub mod umap;

pub use distance::{compute_distance, DistanceMatrix, DistanceMetric};
pub use evaluate::{adjusted_rand_index, nmi, silhouette_samples};
pub use knn::{knn_across, knn_within, Neighbor};
pub use linalg::{
    svd_of, symmetric_eigen, truncated_svd, DenseMatrix, LinearOperator, Svd,
    SymmetricEigen,
};
pub use reduction::{pca, PcaConfig, PcaResult};
pub use umap::{smooth_knn_distances, umap, UmapConfig, UmapInit, UmapResult};
