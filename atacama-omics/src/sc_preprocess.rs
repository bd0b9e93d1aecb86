//! Single-cell accessibility preprocessing: TF-IDF normalization and
//! detection-frequency feature selection.

use tracing::{debug, warn};

use atacama_core::{AtacamaError, Result, Summarizable};

use crate::sparse::{CountMatrix, NormalizedMatrix};

// ── TF-IDF ─────────────────────────────────────────────────────────────────

/// Variant of the term-frequency × inverse-document-frequency transform.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TfIdfMethod {
    /// `tf(i,j) · idf(j)` with `tf = c / total_i` and `idf = ln(1 + N / df_j)`.
    Standard,
    /// `ln(1 + tf · idf · scale_factor)`.
    LogScaled { scale_factor: f64 },
}

/// Configuration for [`normalize`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TfIdfConfig {
    pub method: TfIdfMethod,
    /// Remove all-zero cells and features before normalizing instead of
    /// failing on them.
    pub drop_degenerate: bool,
}

impl Default for TfIdfConfig {
    fn default() -> Self {
        Self {
            method: TfIdfMethod::Standard,
            drop_degenerate: false,
        }
    }
}

/// TF-IDF normalize a count matrix (cell = document, feature = term).
///
/// The output keeps the zero structure of the input.
///
/// # Errors
///
/// [`AtacamaError::EmptyInput`] if the matrix is empty or any cell or
/// feature sums to zero, unless `drop_degenerate` is set.
pub fn normalize(counts: &CountMatrix, config: &TfIdfConfig) -> Result<NormalizedMatrix> {
    if config.drop_degenerate {
        let filtered = counts.drop_degenerate()?;
        if !filtered.dropped_cells.is_empty() || !filtered.dropped_features.is_empty() {
            warn!(
                dropped_cells = filtered.dropped_cells.len(),
                dropped_features = filtered.dropped_features.len(),
                "dropped all-zero cells and features before TF-IDF"
            );
        }
        return tf_idf(&filtered.matrix, config.method);
    }
    tf_idf(counts, config.method)
}

fn tf_idf(counts: &CountMatrix, method: TfIdfMethod) -> Result<NormalizedMatrix> {
    let (n_cells, n_features) = counts.shape();
    if n_cells == 0 || n_features == 0 {
        return Err(AtacamaError::EmptyInput(format!(
            "count matrix is {n_cells} \u{00d7} {n_features}"
        )));
    }
    if let TfIdfMethod::LogScaled { scale_factor } = method {
        if !(scale_factor.is_finite() && scale_factor > 0.0) {
            return Err(AtacamaError::InvalidInput(format!(
                "scale_factor must be positive, got {scale_factor}"
            )));
        }
    }

    let totals = counts.cell_totals();
    if let Some(i) = totals.iter().position(|&t| t == 0.0) {
        return Err(AtacamaError::EmptyInput(format!(
            "cell '{}' has no counts",
            counts.cell_ids()[i]
        )));
    }
    let df = counts.feature_detection();
    if let Some(j) = df.iter().position(|&d| d == 0) {
        return Err(AtacamaError::EmptyInput(format!(
            "feature '{}' is not detected in any cell",
            counts.feature_ids()[j]
        )));
    }

    let n = n_cells as f64;
    let idf: Vec<f64> = df.iter().map(|&d| (1.0 + n / d as f64).ln()).collect();

    let mut data = Vec::with_capacity(counts.nnz());
    for (i, &total) in totals.iter().enumerate() {
        let (cols, vals) = counts.row(i);
        for (&j, &c) in cols.iter().zip(vals) {
            let x = f64::from(c) / total * idf[j];
            data.push(match method {
                TfIdfMethod::Standard => x,
                TfIdfMethod::LogScaled { scale_factor } => (x * scale_factor).ln_1p(),
            });
        }
    }
    debug!(n_cells, n_features, nnz = data.len(), "tf-idf normalized");

    Ok(NormalizedMatrix::with_structure_of(counts, data))
}

// ── Feature selection ──────────────────────────────────────────────────────

/// Minimum-usage cutoff for [`select_top_features`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FeatureCutoff {
    /// Drop the bottom fraction `q ∈ [0, 1]` of features ranked by
    /// detection; `Quantile(0.0)` keeps every feature.
    Quantile(f64),
    /// Keep features detected in at least this many cells.
    Count(usize),
}

impl Default for FeatureCutoff {
    fn default() -> Self {
        FeatureCutoff::Quantile(0.0)
    }
}

/// Set of retained feature indices, stored sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureMask {
    indices: Vec<usize>,
    n_total: usize,
}

impl FeatureMask {
    /// Build from arbitrary-order indices; duplicates collapse.
    pub fn from_indices(mut indices: Vec<usize>, n_total: usize) -> Result<Self> {
        indices.sort_unstable();
        indices.dedup();
        if let Some(&bad) = indices.last().filter(|&&j| j >= n_total) {
            return Err(AtacamaError::InvalidInput(format!(
                "feature index {bad} out of range for {n_total} features"
            )));
        }
        Ok(Self { indices, n_total })
    }

    /// Mask keeping every feature.
    pub fn all(n_total: usize) -> Self {
        Self {
            indices: (0..n_total).collect(),
            n_total,
        }
    }

    /// Retained indices in ascending order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn contains(&self, j: usize) -> bool {
        self.indices.binary_search(&j).is_ok()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of features in the matrix the mask was built for.
    pub fn n_total(&self) -> usize {
        self.n_total
    }

    /// True if every feature of `self` is also in `other`.
    pub fn is_subset(&self, other: &FeatureMask) -> bool {
        self.indices.iter().all(|&j| other.contains(j))
    }
}

impl Summarizable for FeatureMask {
    fn summary(&self) -> String {
        format!("FeatureMask: {} of {} features", self.len(), self.n_total)
    }
}

/// Select features by detection frequency (number of cells with a non-zero
/// count).
///
/// Features are ranked by detection, descending, with ties broken by
/// feature index, so a stricter cutoff always yields a subset of a looser one.
pub fn select_top_features(counts: &CountMatrix, cutoff: FeatureCutoff) -> Result<FeatureMask> {
    let n_features = counts.n_features();
    let df = counts.feature_detection();

    let kept: Vec<usize> = match cutoff {
        FeatureCutoff::Quantile(q) => {
            if !(0.0..=1.0).contains(&q) {
                return Err(AtacamaError::InvalidInput(format!(
                    "feature quantile must lie in [0, 1], got {q}"
                )));
            }
            let mut order: Vec<usize> = (0..n_features).collect();
            order.sort_by(|&a, &b| df[b].cmp(&df[a]).then(a.cmp(&b)));
            let n_drop = (q * n_features as f64).floor() as usize;
            order.truncate(n_features - n_drop.min(n_features));
            order
        }
        FeatureCutoff::Count(min_cells) => (0..n_features).filter(|&j| df[j] >= min_cells).collect(),
    };

    let mask = FeatureMask::from_indices(kept, n_features)?;
    debug!(kept = mask.len(), total = n_features, ?cutoff, "selected features");
    Ok(mask)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn count_matrix() -> impl Strategy<Value = CountMatrix> {
        (1..12usize, 1..25usize).prop_flat_map(|(n_cells, n_features)| {
            proptest::collection::vec(0..4u32, n_cells * n_features).prop_map(move |flat| {
                let rows: Vec<Vec<f64>> = flat
                    .chunks(n_features)
                    .map(|r| r.iter().map(|&v| f64::from(v)).collect())
                    .collect();
                CountMatrix::from_dense(
                    &rows,
                    (0..n_cells).map(|i| format!("c{i}")).collect(),
                    (0..n_features).map(|j| format!("f{j}")).collect(),
                )
                .unwrap()
            })
        })
    }

    proptest! {
        #[test]
        fn quantile_selection_is_monotone(
            m in count_matrix(),
            q1 in 0.0..=1.0f64,
            q2 in 0.0..=1.0f64,
        ) {
            let (lo, hi) = if q1 <= q2 { (q1, q2) } else { (q2, q1) };
            let loose = select_top_features(&m, FeatureCutoff::Quantile(lo)).unwrap();
            let strict = select_top_features(&m, FeatureCutoff::Quantile(hi)).unwrap();
            prop_assert!(strict.is_subset(&loose));
            prop_assert!(loose.len() <= m.n_features());
        }

        #[test]
        fn count_selection_is_monotone(m in count_matrix(), a in 0..15usize, b in 0..15usize) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let loose = select_top_features(&m, FeatureCutoff::Count(lo)).unwrap();
            let strict = select_top_features(&m, FeatureCutoff::Count(hi)).unwrap();
            prop_assert!(strict.is_subset(&loose));
        }

        #[test]
        fn selection_is_deterministic(m in count_matrix(), q in 0.0..=1.0f64) {
            let a = select_top_features(&m, FeatureCutoff::Quantile(q)).unwrap();
            let b = select_top_features(&m, FeatureCutoff::Quantile(q)).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
