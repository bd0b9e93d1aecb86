//! Nonlinear 2-D (or n-D) projection of an embedding for visualization.

use atacama_core::Result;
use atacama_ml::{umap, UmapConfig};
use tracing::debug;

use crate::embedding::Embedding;

/// Method name of projected embeddings.
pub const UMAP_METHOD: &str = "umap";

/// Configuration for [`project`].
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ProjectionConfig {
    /// Input dimensions to use; `None` uses all of them.
    pub dims: Option<Vec<usize>>,
    /// Output dimensionality, seed and layout parameters.
    pub umap: UmapConfig,
}

/// UMAP projection of the selected dimensions of `embedding`.
///
/// The result is named `"umap"` and keeps the input's cell order.
pub fn project(embedding: &Embedding, config: &ProjectionConfig) -> Result<Embedding> {
    let restricted = embedding.select_dims(config.dims.as_deref())?;
    let layout = umap(restricted.values(), restricted.n_dims(), &config.umap)?;
    debug!(
        source = embedding.method(),
        n_cells = layout.n_samples,
        n_dims = layout.n_components,
        seed = config.umap.seed,
        "projected embedding"
    );
    Embedding::new(
        UMAP_METHOD,
        restricted.cell_ids().to_vec(),
        layout.embedding,
        layout.n_components,
    )
}
