//! End-to-end pipeline over immutable artifacts.
//!
//! `counts → feature mask → TF-IDF → LSI (or an external embedder) →
//! depth diagnostic → kNN graph → clusters → projection → silhouette`,
//! plus anchor-based label transfer between two processed datasets.

use std::borrow::Cow;
use std::collections::BTreeMap;

use tracing::{info, warn};

use atacama_core::{AtacamaError, Result, Summarizable};

use crate::embedding::{CellArtifacts, Embedding};
use crate::sc_anchor::{find_anchors, AnchorConfig, AnchorSet};
use crate::sc_cluster::{
    build_knn_graph, cluster, ClusterAssignment, ClusterConfig, NeighborGraph, NeighborsConfig,
};
use crate::sc_external::{embed_checked, EmbedderInput, ExternalEmbedder};
use crate::sc_lsi::{depth_correlation, fit_lsi, LsiConfig, LsiModel};
use crate::sc_preprocess::{
    normalize, select_top_features, FeatureCutoff, FeatureMask, TfIdfConfig,
};
use crate::sc_project::{project, ProjectionConfig, UMAP_METHOD};
use crate::sc_quality::{correlation_distance, silhouette, SilhouetteReport};
use crate::sc_transfer::{transfer_labels, LabelTransferResult, TransferConfig};
use crate::sparse::{CountMatrix, NormalizedMatrix};

/// Depth correlations above this magnitude are reported as confounded.
const DEPTH_WARN: f64 = 0.75;

/// Every knob of the pipeline.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    pub tfidf: TfIdfConfig,
    pub feature_cutoff: FeatureCutoff,
    /// Latent dimensions and first-component dropping. `n_components` is
    /// also the width requested from external embedders.
    pub lsi: LsiConfig,
    /// Leading embedding dimensions checked against sequencing depth.
    pub depth_dims: usize,
    pub neighbors: NeighborsConfig,
    pub cluster: ClusterConfig,
    /// UMAP layout for visualization; skipped when `None`.
    pub projection: Option<ProjectionConfig>,
    /// Score the clustering with correlation-distance silhouettes.
    pub silhouette: bool,
    pub anchors: AnchorConfig,
    pub transfer: TransferConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tfidf: TfIdfConfig::default(),
            feature_cutoff: FeatureCutoff::default(),
            lsi: LsiConfig::default(),
            depth_dims: 5,
            neighbors: NeighborsConfig::default(),
            cluster: ClusterConfig::default(),
            projection: None,
            silhouette: true,
            anchors: AnchorConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

#[cfg(feature = "serde")]
impl PipelineConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| AtacamaError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| AtacamaError::Parse(e.to_string()))
    }
}

/// Artifacts produced by [`run`] or [`run_with_embedder`].
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// The input after optional removal of all-zero cells and features.
    /// Its cells are the cells of every artifact below.
    pub counts: CountMatrix,
    pub features: FeatureMask,
    /// TF-IDF matrix over the selected features (LSI path only).
    pub normalized: Option<NormalizedMatrix>,
    pub lsi: Option<LsiModel>,
    /// Embeddings keyed by method name.
    pub artifacts: CellArtifacts,
    /// Name of the embedding the graph was built on.
    pub embedding_method: String,
    /// Pearson r of each leading embedding dimension with cell depth.
    pub depth_correlation: Vec<f64>,
    pub graph: NeighborGraph,
    pub clusters: ClusterAssignment,
    /// `None` when disabled or when only one cluster was found.
    pub silhouette: Option<SilhouetteReport>,
}

impl PipelineOutput {
    /// The embedding used for clustering.
    pub fn embedding(&self) -> Option<&Embedding> {
        self.artifacts.get(&self.embedding_method)
    }

    /// The UMAP layout, if one was computed.
    pub fn projection(&self) -> Option<&Embedding> {
        self.artifacts.get(UMAP_METHOD)
    }
}

impl Summarizable for PipelineOutput {
    fn summary(&self) -> String {
        format!(
            "Pipeline: {} cells, {} features, '{}' embedding, {} clusters",
            self.counts.n_cells(),
            self.features.len(),
            self.embedding_method,
            self.clusters.n_clusters()
        )
    }
}

/// Cells that survive the degenerate filter, if configured.
fn prepare<'a>(counts: &'a CountMatrix, config: &PipelineConfig) -> Result<Cow<'a, CountMatrix>> {
    if !config.tfidf.drop_degenerate {
        return Ok(Cow::Borrowed(counts));
    }
    let filtered = counts.drop_degenerate()?;
    if !filtered.dropped_cells.is_empty() || !filtered.dropped_features.is_empty() {
        warn!(
            dropped_cells = filtered.dropped_cells.len(),
            dropped_features = filtered.dropped_features.len(),
            "dropped all-zero cells and features"
        );
    }
    Ok(Cow::Owned(filtered.matrix))
}

/// Run the TF-IDF + LSI pipeline.
pub fn run(counts: &CountMatrix, config: &PipelineConfig) -> Result<PipelineOutput> {
    let working = prepare(counts, config)?;
    let features = select_top_features(&working, config.feature_cutoff)?;
    info!(summary = %features.summary(), "selected features");

    let tfidf = TfIdfConfig {
        drop_degenerate: false,
        ..config.tfidf.clone()
    };
    let normalized = normalize(&working, &tfidf)?.subset_features(&features)?;
    info!(summary = %normalized.summary(), "normalized");

    let fit = fit_lsi(&normalized, &config.lsi)?;
    info!(summary = %fit.model.summary(), "fitted LSI");

    finish(
        working.into_owned(),
        features,
        Some(normalized),
        Some(fit.model),
        fit.embedding,
        config,
    )
}

/// Run the pipeline with an external embedding method in place of LSI.
///
/// The embedder receives the counts restricted to the selected features and
/// is asked for `config.lsi.n_components` dimensions.
///
/// # Errors
///
/// [`AtacamaError::InvalidInput`] if projection is enabled and the embedder
/// is named like the projection artifact; checked before any stage runs.
pub fn run_with_embedder(
    counts: &CountMatrix,
    embedder: &dyn ExternalEmbedder,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    if config.projection.is_some() && embedder.name() == UMAP_METHOD {
        return Err(AtacamaError::InvalidInput(format!(
            "embedding method '{UMAP_METHOD}' clashes with the projection artifact"
        )));
    }
    let working = prepare(counts, config)?;
    let features = select_top_features(&working, config.feature_cutoff)?;
    let selected = working.subset_features(&features)?;
    let embedding = embed_checked(
        embedder,
        EmbedderInput::Counts(&selected),
        config.lsi.n_components,
    )?;
    info!(summary = %embedding.summary(), "external embedding");

    finish(working.into_owned(), features, None, None, embedding, config)
}

fn finish(
    counts: CountMatrix,
    features: FeatureMask,
    normalized: Option<NormalizedMatrix>,
    lsi: Option<LsiModel>,
    embedding: Embedding,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    let depth_dims = config.depth_dims.min(embedding.n_dims());
    let depth = depth_correlation(&embedding, &counts.cell_totals(), depth_dims)?;
    for (dim, r) in depth.iter().enumerate() {
        if r.abs() > DEPTH_WARN {
            warn!(dim, r, "embedding dimension tracks sequencing depth");
        }
    }

    let graph = build_knn_graph(&embedding, &config.neighbors)?;
    info!(summary = %graph.summary(), "built neighbor graph");
    let clusters = cluster(&graph, &config.cluster)?;
    info!(summary = %clusters.summary(), "clustered cells");

    let silhouette_report = if config.silhouette {
        score_clusters(&embedding, &clusters, &config.neighbors)?
    } else {
        None
    };

    let mut artifacts = CellArtifacts::new(counts.cell_ids().to_vec());
    if let Some(projection) = &config.projection {
        let layout = project(&embedding, projection)?;
        info!(summary = %layout.summary(), "projected cells");
        artifacts.insert(layout)?;
    }
    let embedding_method = embedding.method().to_string();
    artifacts.insert(embedding)?;

    Ok(PipelineOutput {
        counts,
        features,
        normalized,
        lsi,
        artifacts,
        embedding_method,
        depth_correlation: depth,
        graph,
        clusters,
        silhouette: silhouette_report,
    })
}

/// Silhouette over the dimensions the graph used. `None` for a single
/// cluster or a single dimension.
fn score_clusters(
    embedding: &Embedding,
    clusters: &ClusterAssignment,
    neighbors: &NeighborsConfig,
) -> Result<Option<SilhouetteReport>> {
    let restricted = embedding.select_dims(neighbors.dims.as_deref())?;
    if restricted.n_dims() < 2 {
        return Ok(None);
    }
    let distances = correlation_distance(&restricted)?;
    match silhouette(&distances, clusters) {
        Ok(report) => {
            info!(summary = %report.summary(), "scored clusters");
            Ok(Some(report))
        }
        Err(AtacamaError::InsufficientClusters { found, .. }) => {
            warn!(found, "silhouette skipped");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Cluster labels as strings, for use as transfer labels.
pub fn cluster_labels(clusters: &ClusterAssignment) -> BTreeMap<String, String> {
    clusters
        .to_map()
        .into_iter()
        .map(|(cell, label)| (cell, label.to_string()))
        .collect()
}

/// Anchors and transferred labels.
#[derive(Debug, Clone)]
pub struct TransferOutput {
    pub anchors: AnchorSet,
    pub result: LabelTransferResult,
}

/// Transfer `reference_labels` from a processed reference to a processed
/// query.
pub fn transfer(
    reference: &PipelineOutput,
    reference_labels: &BTreeMap<String, String>,
    query: &PipelineOutput,
    config: &PipelineConfig,
) -> Result<TransferOutput> {
    let missing = |side: &str| {
        AtacamaError::InvalidInput(format!("{side} pipeline output has no clustering embedding"))
    };
    let reference_embedding = reference.embedding().ok_or_else(|| missing("reference"))?;
    let query_embedding = query.embedding().ok_or_else(|| missing("query"))?;

    let anchors = find_anchors(
        reference_embedding,
        &reference.counts,
        query_embedding,
        &query.counts,
        &config.anchors,
    )?;
    info!(summary = %anchors.summary(), "found anchors");
    let result = transfer_labels(&anchors, reference_labels, query_embedding, &config.transfer)?;
    info!(summary = %result.summary(), "transferred labels");
    Ok(TransferOutput { anchors, result })
}
