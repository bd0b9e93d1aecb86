//! Latent semantic indexing: truncated SVD of a TF-IDF matrix.
//!
//! The first LSI component of accessibility data often tracks sequencing
//! depth rather than biology. [`depth_correlation`] measures this per
//! component, and [`LsiConfig::drop_first`] removes it.

use std::collections::HashMap;

use tracing::debug;

use atacama_core::{AtacamaError, Result, Summarizable};
use atacama_ml::linalg::svd_of;
use atacama_stats::{mean, pearson, std_dev};

use crate::embedding::Embedding;
use crate::sparse::NormalizedMatrix;

/// Method name under which LSI embeddings are registered.
pub const LSI_METHOD: &str = "lsi";

/// Configuration for [`fit_lsi`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LsiConfig {
    /// Number of embedding dimensions returned.
    pub n_components: usize,
    /// Compute one extra component and discard the first.
    pub drop_first: bool,
    /// Standardize each embedding column to zero mean and unit variance.
    pub scale_embeddings: bool,
}

impl Default for LsiConfig {
    fn default() -> Self {
        Self {
            n_components: 30,
            drop_first: false,
            scale_embeddings: false,
        }
    }
}

/// A fitted LSI space.
#[derive(Debug, Clone)]
pub struct LsiModel {
    feature_ids: Vec<String>,
    /// Singular values of the retained components.
    singular_values: Vec<f64>,
    /// Right singular vectors, row-major `n_features × n_components`.
    loadings: Vec<f64>,
    /// Column `(mean, sd)` used when `scale_embeddings` was on.
    scaling: Option<Vec<(f64, f64)>>,
    rank: usize,
    dropped_first: bool,
}

/// Output of [`fit_lsi`].
#[derive(Debug, Clone)]
pub struct LsiFit {
    pub embedding: Embedding,
    pub model: LsiModel,
}

/// Fit LSI and return the cell embedding `U·Σ`.
///
/// With `drop_first`, `n_components + 1` triplets are computed and the
/// first is discarded, so the embedding always has exactly `n_components`
/// columns.
///
/// # Errors
///
/// [`AtacamaError::RankDeficiency`] if the matrix rank is below the number
/// of triplets needed.
pub fn fit_lsi(normalized: &NormalizedMatrix, config: &LsiConfig) -> Result<LsiFit> {
    if config.n_components == 0 {
        return Err(AtacamaError::InvalidInput("n_components must be > 0".into()));
    }
    let (n_cells, n_features) = normalized.shape();
    if n_cells == 0 || n_features == 0 {
        return Err(AtacamaError::EmptyInput(format!(
            "normalized matrix is {n_cells} \u{00d7} {n_features}"
        )));
    }
    let skip = usize::from(config.drop_first);
    let n_triplets = config.n_components + skip;
    let svd = svd_of(normalized, n_triplets)?;
    let k = config.n_components;

    let mut values = vec![0.0; n_cells * k];
    for i in 0..n_cells {
        for c in 0..k {
            values[i * k + c] = svd.u[i * n_triplets + c + skip] * svd.singular_values[c + skip];
        }
    }
    let mut loadings = vec![0.0; n_features * k];
    for j in 0..n_features {
        for c in 0..k {
            loadings[j * k + c] = svd.v[j * n_triplets + c + skip];
        }
    }

    let scaling = if config.scale_embeddings {
        Some(standardize_columns(&mut values, n_cells, k)?)
    } else {
        None
    };
    debug!(
        n_cells,
        n_features,
        n_components = k,
        rank = svd.rank,
        drop_first = config.drop_first,
        "fitted lsi"
    );

    let model = LsiModel {
        feature_ids: normalized.feature_ids().to_vec(),
        singular_values: svd.singular_values[skip..].to_vec(),
        loadings,
        scaling,
        rank: svd.rank,
        dropped_first: config.drop_first,
    };
    let embedding = Embedding::new(LSI_METHOD, normalized.cell_ids().to_vec(), values, k)?;
    Ok(LsiFit { embedding, model })
}

fn standardize_columns(values: &mut [f64], n_rows: usize, k: usize) -> Result<Vec<(f64, f64)>> {
    let mut params = Vec::with_capacity(k);
    for c in 0..k {
        let col: Vec<f64> = (0..n_rows).map(|i| values[i * k + c]).collect();
        let m = mean(&col)?;
        let sd = if n_rows > 1 { std_dev(&col, 1)? } else { 0.0 };
        let sd = if sd > 0.0 { sd } else { 1.0 };
        for i in 0..n_rows {
            values[i * k + c] = (values[i * k + c] - m) / sd;
        }
        params.push((m, sd));
    }
    Ok(params)
}

impl LsiModel {
    pub fn n_components(&self) -> usize {
        self.singular_values.len()
    }

    /// Singular values of the retained components, descending.
    pub fn singular_values(&self) -> &[f64] {
        &self.singular_values
    }

    /// Numerical rank of the fitted matrix, counted within the subspace the
    /// solver explored.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn dropped_first(&self) -> bool {
        self.dropped_first
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// Loading of feature `j` on component `c`.
    pub fn loading(&self, j: usize, c: usize) -> f64 {
        self.loadings[j * self.n_components() + c]
    }

    /// Fold new cells into the fitted space (`X·V`).
    ///
    /// Features are matched by ID; features unknown to the model are
    /// ignored and model features missing from `normalized` count as zero.
    pub fn project(&self, normalized: &NormalizedMatrix) -> Result<Embedding> {
        let k = self.n_components();
        let index: HashMap<&str, usize> = self
            .feature_ids
            .iter()
            .enumerate()
            .map(|(j, id)| (id.as_str(), j))
            .collect();
        let remap: Vec<Option<usize>> = normalized
            .feature_ids()
            .iter()
            .map(|id| index.get(id.as_str()).copied())
            .collect();
        if remap.iter().all(Option::is_none) {
            return Err(AtacamaError::InvalidInput(
                "no features shared with the fitted LSI model".into(),
            ));
        }

        let n_cells = normalized.n_cells();
        let mut values = vec![0.0; n_cells * k];
        for i in 0..n_cells {
            let (cols, vals) = normalized.row(i);
            for (&c, &v) in cols.iter().zip(vals) {
                if let Some(j) = remap[c] {
                    for comp in 0..k {
                        values[i * k + comp] += v * self.loadings[j * k + comp];
                    }
                }
            }
        }
        if let Some(params) = &self.scaling {
            for i in 0..n_cells {
                for (comp, &(m, sd)) in params.iter().enumerate() {
                    values[i * k + comp] = (values[i * k + comp] - m) / sd;
                }
            }
        }
        Embedding::new(LSI_METHOD, normalized.cell_ids().to_vec(), values, k)
    }
}

impl Summarizable for LsiModel {
    fn summary(&self) -> String {
        format!(
            "LSI: {} components over {} features (rank {}{})",
            self.n_components(),
            self.feature_ids.len(),
            self.rank,
            if self.dropped_first { ", first dropped" } else { "" }
        )
    }
}

/// Pearson correlation of each of the first `n_dims` embedding dimensions
/// with per-cell total counts.
///
/// Constant dimensions report 0. The embedding is not modified.
pub fn depth_correlation(
    embedding: &Embedding,
    total_counts: &[f64],
    n_dims: usize,
) -> Result<Vec<f64>> {
    if total_counts.len() != embedding.n_cells() {
        return Err(AtacamaError::shape_mismatch(
            "depth correlation totals",
            embedding.n_cells(),
            total_counts.len(),
        ));
    }
    if n_dims > embedding.n_dims() {
        return Err(AtacamaError::InvalidInput(format!(
            "requested {n_dims} dimensions from a {}-dimensional embedding",
            embedding.n_dims()
        )));
    }
    (0..n_dims)
        .map(|d| pearson(&embedding.column(d), total_counts))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sc_preprocess::{normalize, TfIdfConfig};
    use crate::sparse::CountMatrix;
    use atacama_core::Xorshift64;
    use atacama_ml::LinearOperator;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    fn block_counts() -> CountMatrix {
        // Two blocks of co-accessible peaks with varying depth.
        let mut rows = Vec::new();
        for i in 0..12 {
            let depth = 1.0 + (i % 4) as f64;
            let mut row = vec![0.0; 8];
            let offset = if i < 6 { 0 } else { 4 };
            for j in 0..4 {
                row[offset + j] = depth + ((i + j) % 3) as f64;
            }
            row[(i + 2) % 8] += 1.0;
            rows.push(row);
        }
        CountMatrix::from_dense(&rows, ids("cell", 12), ids("peak", 8)).unwrap()
    }

    #[test]
    fn embedding_has_requested_dims() {
        let norm = normalize(&block_counts(), &TfIdfConfig::default()).unwrap();
        for drop_first in [false, true] {
            let fit = fit_lsi(
                &norm,
                &LsiConfig {
                    n_components: 4,
                    drop_first,
                    ..Default::default()
                },
            )
            .unwrap();
            assert_eq!(fit.embedding.n_dims(), 4);
            assert_eq!(fit.embedding.n_cells(), 12);
            assert_eq!(fit.embedding.method(), LSI_METHOD);
            assert_eq!(fit.model.n_components(), 4);
            let sv = fit.model.singular_values();
            assert!(sv.windows(2).all(|w| w[0] >= w[1]));
        }
    }

    #[test]
    fn drop_first_shifts_components() {
        let norm = normalize(&block_counts(), &TfIdfConfig::default()).unwrap();
        let full = fit_lsi(&norm, &LsiConfig { n_components: 3, ..Default::default() }).unwrap();
        let dropped = fit_lsi(
            &norm,
            &LsiConfig {
                n_components: 2,
                drop_first: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!((full.model.singular_values()[1] - dropped.model.singular_values()[0]).abs() < 1e-8);
        for i in 0..12 {
            assert!((full.embedding.row(i)[1] - dropped.embedding.row(i)[0]).abs() < 1e-8);
        }
    }

    #[test]
    fn wide_sparse_matrix_without_gram() {
        // 200 cells × 3000 peaks in four accessibility programs.
        let mut rng = Xorshift64::new(31);
        let (n_cells, n_peaks) = (200, 3000);
        let (mut r, mut c, mut v) = (Vec::new(), Vec::new(), Vec::new());
        for i in 0..n_cells {
            for j in 0..n_peaks {
                let p = if j * 4 / n_peaks == i % 4 { 0.15 } else { 0.01 };
                if rng.next_f64() < p {
                    r.push(i);
                    c.push(j);
                    v.push(1.0 + (rng.next_f64() * 3.0).floor());
                }
            }
        }
        let counts =
            CountMatrix::from_triplets(&r, &c, &v, ids("cell", n_cells), ids("peak", n_peaks))
                .unwrap();
        let norm = normalize(
            &counts,
            &TfIdfConfig {
                drop_degenerate: true,
                ..Default::default()
            },
        )
        .unwrap();
        let fit = fit_lsi(&norm, &LsiConfig { n_components: 3, ..Default::default() }).unwrap();
        let sv = fit.model.singular_values();
        assert!(sv.windows(2).all(|w| w[0] >= w[1]));

        // A·v_c = σ_c·u_c, i.e. the loadings map back onto the embedding.
        for comp in 0..3 {
            let loading: Vec<f64> =
                (0..norm.n_features()).map(|j| fit.model.loading(j, comp)).collect();
            let mapped = norm.apply(&loading);
            for (i, &x) in mapped.iter().enumerate() {
                let y = fit.embedding.row(i)[comp];
                assert!((x - y).abs() < 1e-6 * sv[0], "cell {i} component {comp}: {x} vs {y}");
            }
        }
    }

    #[test]
    fn rank_deficiency() {
        // Rank 1: every row is a multiple of the same profile.
        let rows: Vec<Vec<f64>> = (1..=4).map(|s| vec![s as f64, 2.0 * s as f64, 0.0]).collect();
        let norm = NormalizedMatrix::from_dense(&rows, ids("c", 4), ids("f", 3)).unwrap();
        assert!(fit_lsi(&norm, &LsiConfig { n_components: 1, ..Default::default() }).is_ok());
        match fit_lsi(&norm, &LsiConfig { n_components: 2, ..Default::default() }) {
            Err(AtacamaError::RankDeficiency { requested, rank }) => {
                assert_eq!(requested, 2);
                assert_eq!(rank, 1);
            }
            other => panic!("expected rank deficiency, got {other:?}"),
        }
        let err = fit_lsi(
            &norm,
            &LsiConfig {
                n_components: 1,
                drop_first: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.category(), atacama_core::ErrorCategory::NumericalInfeasibility);
    }

    #[test]
    fn depth_encoded_in_first_component() {
        let profile = [0.5, 1.0, 0.25, 2.0, 0.75];
        let depths: Vec<f64> = (0..20).map(|i| 1.0 + (i * 7 % 13) as f64).collect();
        let rows: Vec<Vec<f64>> = depths
            .iter()
            .map(|&d| profile.iter().map(|p| p * d).collect())
            .collect();
        let norm = NormalizedMatrix::from_dense(&rows, ids("c", 20), ids("f", 5)).unwrap();
        let fit = fit_lsi(&norm, &LsiConfig { n_components: 1, ..Default::default() }).unwrap();
        let totals: Vec<f64> = rows.iter().map(|r| r.iter().sum()).collect();
        let corr = depth_correlation(&fit.embedding, &totals, 1).unwrap();
        assert!(corr[0].abs() > 0.99, "corr = {}", corr[0]);
    }

    #[test]
    fn depth_correlation_checks_shapes() {
        let e = Embedding::from_rows("lsi", ids("c", 3), &[vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        assert!(depth_correlation(&e, &[1.0, 2.0], 1).is_err());
        assert!(depth_correlation(&e, &[1.0, 2.0, 3.0], 2).is_err());
        let c = depth_correlation(&e, &[3.0, 2.0, 1.0], 1).unwrap();
        assert!((c[0] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn projection_reproduces_training_embedding() {
        let norm = normalize(&block_counts(), &TfIdfConfig::default()).unwrap();
        for scale_embeddings in [false, true] {
            let fit = fit_lsi(
                &norm,
                &LsiConfig {
                    n_components: 3,
                    scale_embeddings,
                    ..Default::default()
                },
            )
            .unwrap();
            let projected = fit.model.project(&norm).unwrap();
            for (a, b) in projected.values().iter().zip(fit.embedding.values()) {
                assert!((a - b).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn scaled_columns_are_standardized() {
        let norm = normalize(&block_counts(), &TfIdfConfig::default()).unwrap();
        let fit = fit_lsi(
            &norm,
            &LsiConfig {
                n_components: 2,
                scale_embeddings: true,
                ..Default::default()
            },
        )
        .unwrap();
        for d in 0..2 {
            let col = fit.embedding.column(d);
            assert!(mean(&col).unwrap().abs() < 1e-10);
            assert!((std_dev(&col, 1).unwrap() - 1.0).abs() < 1e-10);
        }
    }
}
