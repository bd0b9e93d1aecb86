//! Cluster quality: correlation distances between cells and silhouette
//! reports over a cluster assignment.

use std::collections::BTreeMap;

use atacama_core::{AtacamaError, Result, Scored, Summarizable};
use atacama_ml::{silhouette_samples, DistanceMatrix};
use atacama_stats::CorrelationMatrix;

use crate::embedding::Embedding;
use crate::sc_cluster::ClusterAssignment;

/// `1 − r` between every pair of cells, where `r` is the Pearson correlation
/// of their embedding vectors over all dimensions. The diagonal is exactly 0.
///
/// Cells with constant vectors correlate 0 with everything (distance 1).
pub fn correlation_distance(embedding: &Embedding) -> Result<DistanceMatrix> {
    if embedding.n_cells() == 0 {
        return Err(AtacamaError::EmptyInput("embedding has no cells".into()));
    }
    if embedding.n_dims() < 2 {
        return Err(AtacamaError::InvalidInput(format!(
            "correlation distance needs at least 2 dimensions, embedding '{}' has {}",
            embedding.method(),
            embedding.n_dims()
        )));
    }
    let n = embedding.n_cells();
    let corr = CorrelationMatrix::from_rows(&embedding.rows())?;
    let mut condensed = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            condensed.push(1.0 - corr.get(i, j));
        }
    }
    DistanceMatrix::from_condensed(condensed, n)
}

/// Per-cell silhouette widths with their overall and per-cluster means.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SilhouetteReport {
    pub cell_ids: Vec<String>,
    /// Width per cell, in `[-1, 1]`.
    pub widths: Vec<f64>,
    pub mean: f64,
    /// Mean width per cluster label.
    pub cluster_means: BTreeMap<usize, f64>,
}

impl Scored for SilhouetteReport {
    fn score(&self) -> f64 {
        self.mean
    }
}

impl Summarizable for SilhouetteReport {
    fn summary(&self) -> String {
        format!(
            "Silhouette: mean {:.3} over {} cells in {} clusters",
            self.mean,
            self.widths.len(),
            self.cluster_means.len()
        )
    }
}

/// Silhouette widths of `assignment` under `distances`.
///
/// # Errors
///
/// [`AtacamaError::ShapeMismatch`] when the matrix and assignment disagree
/// on the cell count, [`AtacamaError::InsufficientClusters`] with fewer than
/// two clusters.
pub fn silhouette(
    distances: &DistanceMatrix,
    assignment: &ClusterAssignment,
) -> Result<SilhouetteReport> {
    let labels = assignment.labels();
    if distances.n() != labels.len() {
        return Err(AtacamaError::shape_mismatch(
            "silhouette",
            format!("{} cells", labels.len()),
            distances.n(),
        ));
    }
    let widths = silhouette_samples(distances, labels)?;
    let mean = widths.iter().sum::<f64>() / widths.len() as f64;

    let mut sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for (&l, &w) in labels.iter().zip(&widths) {
        let entry = sums.entry(l).or_insert((0.0, 0));
        entry.0 += w;
        entry.1 += 1;
    }
    let cluster_means = sums
        .into_iter()
        .map(|(l, (sum, count))| (l, sum / count as f64))
        .collect();

    Ok(SilhouetteReport {
        cell_ids: assignment.cell_ids().to_vec(),
        widths,
        mean,
        cluster_means,
    })
}
