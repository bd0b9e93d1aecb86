//! Compressed sparse row (CSR) cell-by-feature matrices.
//!
//! [`CountMatrix`] holds raw non-negative integer counts and is the input of
//! the whole pipeline. [`NormalizedMatrix`] holds the non-negative TF-IDF
//! values derived from it and shares its row and column identities. Both are
//! immutable after construction; every transformation returns a new matrix.

use std::collections::{BTreeMap, HashSet};

use atacama_core::{AtacamaError, Result, Summarizable};
use atacama_ml::linalg::LinearOperator;

use crate::sc_preprocess::FeatureMask;

/// Shared CSR storage.
#[derive(Debug, Clone, PartialEq)]
struct Csr<T> {
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<T>,
}

impl<T: Copy> Csr<T> {
    fn row(&self, i: usize) -> (&[usize], &[T]) {
        let range = self.indptr[i]..self.indptr[i + 1];
        (&self.indices[range.clone()], &self.data[range])
    }

    fn n_rows(&self) -> usize {
        self.indptr.len() - 1
    }

    fn get(&self, i: usize, j: usize) -> Option<T> {
        let (cols, vals) = self.row(i);
        cols.binary_search(&j).ok().map(|p| vals[p])
    }

    /// Keep the given rows, in the given order.
    fn select_rows(&self, rows: &[usize]) -> Self {
        let mut out = Csr {
            indptr: Vec::with_capacity(rows.len() + 1),
            indices: Vec::new(),
            data: Vec::new(),
        };
        out.indptr.push(0);
        for &r in rows {
            let (cols, vals) = self.row(r);
            out.indices.extend_from_slice(cols);
            out.data.extend_from_slice(vals);
            out.indptr.push(out.indices.len());
        }
        out
    }

    /// Keep the columns for which `remap[j]` is `Some`, renumbered.
    fn select_cols(&self, remap: &[Option<usize>]) -> Self {
        let mut out = Csr {
            indptr: Vec::with_capacity(self.indptr.len()),
            indices: Vec::new(),
            data: Vec::new(),
        };
        out.indptr.push(0);
        for i in 0..self.n_rows() {
            let (cols, vals) = self.row(i);
            for (&c, &v) in cols.iter().zip(vals) {
                if let Some(nc) = remap[c] {
                    out.indices.push(nc);
                    out.data.push(v);
                }
            }
            out.indptr.push(out.indices.len());
        }
        out
    }
}

fn check_ids(ids: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(AtacamaError::InvalidInput(format!(
                "duplicate {what} ID '{id}'"
            )));
        }
    }
    Ok(())
}

fn mask_remap(mask: &FeatureMask, n_features: usize) -> Result<Vec<Option<usize>>> {
    if mask.n_total() != n_features {
        return Err(AtacamaError::shape_mismatch(
            "feature mask",
            format!("{n_features} features"),
            mask.n_total(),
        ));
    }
    let mut remap = vec![None; n_features];
    for (new, &old) in mask.indices().iter().enumerate() {
        remap[old] = Some(new);
    }
    Ok(remap)
}

fn check_cell_indices(cells: &[usize], n_cells: usize) -> Result<()> {
    let mut seen = HashSet::with_capacity(cells.len());
    for &c in cells {
        if c >= n_cells {
            return Err(AtacamaError::InvalidInput(format!(
                "cell index {c} out of range for {n_cells} cells"
            )));
        }
        if !seen.insert(c) {
            return Err(AtacamaError::InvalidInput(format!(
                "cell index {c} selected twice"
            )));
        }
    }
    Ok(())
}

// ── CountMatrix ────────────────────────────────────────────────────────────

/// Sparse non-negative integer matrix, cells × features.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    csr: Csr<u32>,
    cell_ids: Vec<String>,
    feature_ids: Vec<String>,
}

/// Result of [`CountMatrix::drop_degenerate`].
#[derive(Debug, Clone)]
pub struct DegenerateFilter {
    /// The matrix without all-zero cells and features.
    pub matrix: CountMatrix,
    pub dropped_cells: Vec<String>,
    pub dropped_features: Vec<String>,
}

impl CountMatrix {
    /// Build from COO triplets.
    ///
    /// Duplicate coordinates are summed and explicit zeros are not stored.
    ///
    /// # Errors
    ///
    /// - [`AtacamaError::ShapeMismatch`] if the triplet vectors differ in length.
    /// - [`AtacamaError::NegativeCount`] for any negative value.
    /// - [`AtacamaError::InvalidInput`] for out-of-range indices, duplicate
    ///   IDs, and non-integral or non-finite values.
    pub fn from_triplets(
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
        cell_ids: Vec<String>,
        feature_ids: Vec<String>,
    ) -> Result<Self> {
        if rows.len() != cols.len() || cols.len() != values.len() {
            return Err(AtacamaError::shape_mismatch(
                "count triplets",
                format!("{} rows, cols and values", rows.len()),
                format!("{} cols and {} values", cols.len(), values.len()),
            ));
        }
        check_ids(&cell_ids, "cell")?;
        check_ids(&feature_ids, "feature")?;
        let n_rows = cell_ids.len();
        let n_cols = feature_ids.len();

        let mut per_row: Vec<BTreeMap<usize, u64>> = vec![BTreeMap::new(); n_rows];
        for ((&r, &c), &v) in rows.iter().zip(cols).zip(values) {
            if r >= n_rows || c >= n_cols {
                return Err(AtacamaError::InvalidInput(format!(
                    "entry ({r}, {c}) out of bounds for {n_rows} cells × {n_cols} features"
                )));
            }
            if v < 0.0 {
                return Err(AtacamaError::NegativeCount {
                    row: r,
                    col: c,
                    value: v,
                });
            }
            if !v.is_finite() || v.fract() != 0.0 {
                return Err(AtacamaError::InvalidInput(format!(
                    "count at ({r}, {c}) is not a whole number: {v}"
                )));
            }
            if v > 0.0 {
                let slot = per_row[r].entry(c).or_insert(0);
                *slot = slot.checked_add(v as u64).ok_or_else(|| {
                    AtacamaError::InvalidInput(format!("count at ({r}, {c}) overflows u64"))
                })?;
            }
        }

        let mut csr = Csr {
            indptr: Vec::with_capacity(n_rows + 1),
            indices: Vec::new(),
            data: Vec::new(),
        };
        csr.indptr.push(0);
        for (r, row) in per_row.into_iter().enumerate() {
            for (c, v) in row {
                let v = u32::try_from(v).map_err(|_| {
                    AtacamaError::InvalidInput(format!("count at ({r}, {c}) overflows u32"))
                })?;
                csr.indices.push(c);
                csr.data.push(v);
            }
            csr.indptr.push(csr.indices.len());
        }

        Ok(Self {
            csr,
            cell_ids,
            feature_ids,
        })
    }

    /// Build from dense rows (one `Vec` per cell).
    pub fn from_dense(
        rows: &[Vec<f64>],
        cell_ids: Vec<String>,
        feature_ids: Vec<String>,
    ) -> Result<Self> {
        if rows.len() != cell_ids.len() {
            return Err(AtacamaError::shape_mismatch(
                "dense counts",
                format!("{} rows", cell_ids.len()),
                rows.len(),
            ));
        }
        let (mut r_idx, mut c_idx, mut vals) = (Vec::new(), Vec::new(), Vec::new());
        for (r, row) in rows.iter().enumerate() {
            if row.len() != feature_ids.len() {
                return Err(AtacamaError::shape_mismatch(
                    format!("dense counts row {r}"),
                    feature_ids.len(),
                    row.len(),
                ));
            }
            for (c, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    r_idx.push(r);
                    c_idx.push(c);
                    vals.push(v);
                }
            }
        }
        Self::from_triplets(&r_idx, &c_idx, &vals, cell_ids, feature_ids)
    }

    /// `(n_cells, n_features)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.cell_ids.len(), self.feature_ids.len())
    }

    pub fn n_cells(&self) -> usize {
        self.cell_ids.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }

    /// Number of stored non-zero entries.
    pub fn nnz(&self) -> usize {
        self.csr.data.len()
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// Non-zero entries of cell `i` as `(feature indices, counts)`, ordered
    /// by feature index.
    pub fn row(&self, i: usize) -> (&[usize], &[u32]) {
        self.csr.row(i)
    }

    /// Count at `(cell, feature)`; 0 if not stored.
    pub fn get(&self, cell: usize, feature: usize) -> u32 {
        self.csr.get(cell, feature).unwrap_or(0)
    }

    /// Total counts per cell (sequencing depth).
    pub fn cell_totals(&self) -> Vec<f64> {
        (0..self.n_cells())
            .map(|i| self.row(i).1.iter().map(|&v| f64::from(v)).sum())
            .collect()
    }

    /// Total counts per feature.
    pub fn feature_totals(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.n_features()];
        for (&c, &v) in self.csr.indices.iter().zip(&self.csr.data) {
            totals[c] += f64::from(v);
        }
        totals
    }

    /// Number of cells in which each feature is detected.
    pub fn feature_detection(&self) -> Vec<usize> {
        let mut df = vec![0usize; self.n_features()];
        for &c in &self.csr.indices {
            df[c] += 1;
        }
        df
    }

    /// Keep only the features in `mask`, in ascending index order.
    pub fn subset_features(&self, mask: &FeatureMask) -> Result<Self> {
        let remap = mask_remap(mask, self.n_features())?;
        Ok(Self {
            csr: self.csr.select_cols(&remap),
            cell_ids: self.cell_ids.clone(),
            feature_ids: mask.indices().iter().map(|&j| self.feature_ids[j].clone()).collect(),
        })
    }

    /// Keep the given cells, in the given order.
    pub fn subset_cells(&self, cells: &[usize]) -> Result<Self> {
        check_cell_indices(cells, self.n_cells())?;
        Ok(Self {
            csr: self.csr.select_rows(cells),
            cell_ids: cells.iter().map(|&i| self.cell_ids[i].clone()).collect(),
            feature_ids: self.feature_ids.clone(),
        })
    }

    /// Remove all-zero cells, then all-zero features.
    ///
    /// Dropping an empty cell never empties a feature, so one pass suffices.
    pub fn drop_degenerate(&self) -> Result<DegenerateFilter> {
        let totals = self.cell_totals();
        let keep_cells: Vec<usize> = (0..self.n_cells()).filter(|&i| totals[i] > 0.0).collect();
        let dropped_cells = (0..self.n_cells())
            .filter(|&i| totals[i] == 0.0)
            .map(|i| self.cell_ids[i].clone())
            .collect();

        let df = self.feature_detection();
        let mask = FeatureMask::from_indices(
            (0..self.n_features()).filter(|&j| df[j] > 0).collect(),
            self.n_features(),
        )?;
        let dropped_features = (0..self.n_features())
            .filter(|&j| df[j] == 0)
            .map(|j| self.feature_ids[j].clone())
            .collect();

        let matrix = self.subset_cells(&keep_cells)?.subset_features(&mask)?;
        Ok(DegenerateFilter {
            matrix,
            dropped_cells,
            dropped_features,
        })
    }

    /// Dense copy, one `Vec` per cell.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        (0..self.n_cells())
            .map(|i| {
                let mut row = vec![0.0; self.n_features()];
                let (cols, vals) = self.row(i);
                for (&c, &v) in cols.iter().zip(vals) {
                    row[c] = f64::from(v);
                }
                row
            })
            .collect()
    }
}

impl Summarizable for CountMatrix {
    fn summary(&self) -> String {
        format!(
            "CountMatrix: {} cells \u{00d7} {} features, {} non-zero",
            self.n_cells(),
            self.n_features(),
            self.nnz()
        )
    }
}

// ── NormalizedMatrix ───────────────────────────────────────────────────────

/// Sparse non-negative floating-point matrix with the same identities as
/// the [`CountMatrix`] it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMatrix {
    csr: Csr<f64>,
    cell_ids: Vec<String>,
    feature_ids: Vec<String>,
}

impl NormalizedMatrix {
    /// Reuse the sparsity structure of `counts` with new values, one per
    /// stored count entry.
    pub(crate) fn with_structure_of(counts: &CountMatrix, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), counts.nnz());
        Self {
            csr: Csr {
                indptr: counts.csr.indptr.clone(),
                indices: counts.csr.indices.clone(),
                data,
            },
            cell_ids: counts.cell_ids.clone(),
            feature_ids: counts.feature_ids.clone(),
        }
    }

    /// Build from dense rows. Zeros are not stored.
    ///
    /// # Errors
    ///
    /// Negative or non-finite values, ragged rows, or duplicate IDs.
    pub fn from_dense(
        rows: &[Vec<f64>],
        cell_ids: Vec<String>,
        feature_ids: Vec<String>,
    ) -> Result<Self> {
        check_ids(&cell_ids, "cell")?;
        check_ids(&feature_ids, "feature")?;
        if rows.len() != cell_ids.len() {
            return Err(AtacamaError::shape_mismatch(
                "dense normalized matrix",
                format!("{} rows", cell_ids.len()),
                rows.len(),
            ));
        }
        let mut csr = Csr {
            indptr: vec![0],
            indices: Vec::new(),
            data: Vec::new(),
        };
        for (r, row) in rows.iter().enumerate() {
            if row.len() != feature_ids.len() {
                return Err(AtacamaError::shape_mismatch(
                    format!("dense normalized matrix row {r}"),
                    feature_ids.len(),
                    row.len(),
                ));
            }
            for (c, &v) in row.iter().enumerate() {
                if !v.is_finite() || v < 0.0 {
                    return Err(AtacamaError::InvalidInput(format!(
                        "normalized value at ({r}, {c}) must be finite and non-negative, got {v}"
                    )));
                }
                if v > 0.0 {
                    csr.indices.push(c);
                    csr.data.push(v);
                }
            }
            csr.indptr.push(csr.indices.len());
        }
        Ok(Self {
            csr,
            cell_ids,
            feature_ids,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.cell_ids.len(), self.feature_ids.len())
    }

    pub fn n_cells(&self) -> usize {
        self.cell_ids.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn nnz(&self) -> usize {
        self.csr.data.len()
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        self.csr.row(i)
    }

    pub fn get(&self, cell: usize, feature: usize) -> f64 {
        self.csr.get(cell, feature).unwrap_or(0.0)
    }

    /// Keep only the features in `mask`.
    pub fn subset_features(&self, mask: &FeatureMask) -> Result<Self> {
        let remap = mask_remap(mask, self.n_features())?;
        Ok(Self {
            csr: self.csr.select_cols(&remap),
            cell_ids: self.cell_ids.clone(),
            feature_ids: mask.indices().iter().map(|&j| self.feature_ids[j].clone()).collect(),
        })
    }

    /// Keep the given cells, in the given order.
    pub fn subset_cells(&self, cells: &[usize]) -> Result<Self> {
        check_cell_indices(cells, self.n_cells())?;
        Ok(Self {
            csr: self.csr.select_rows(cells),
            cell_ids: cells.iter().map(|&i| self.cell_ids[i].clone()).collect(),
            feature_ids: self.feature_ids.clone(),
        })
    }

    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        (0..self.n_cells())
            .map(|i| {
                let mut row = vec![0.0; self.n_features()];
                let (cols, vals) = self.row(i);
                for (&c, &v) in cols.iter().zip(vals) {
                    row[c] = v;
                }
                row
            })
            .collect()
    }
}

impl LinearOperator for NormalizedMatrix {
    fn shape(&self) -> (usize, usize) {
        NormalizedMatrix::shape(self)
    }

    fn apply(&self, x: &[f64]) -> Vec<f64> {
        let row_dot = |i: usize| -> f64 {
            let (cols, vals) = self.row(i);
            cols.iter().zip(vals).map(|(&c, &v)| v * x[c]).sum()
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            (0..self.n_cells()).into_par_iter().map(row_dot).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            (0..self.n_cells()).map(row_dot).collect()
        }
    }

    fn apply_transpose(&self, y: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_features()];
        for (i, &yi) in y.iter().enumerate().take(self.n_cells()) {
            let (cols, vals) = self.row(i);
            for (&c, &v) in cols.iter().zip(vals) {
                out[c] += v * yi;
            }
        }
        out
    }
}

impl Summarizable for NormalizedMatrix {
    fn summary(&self) -> String {
        format!(
            "NormalizedMatrix: {} cells \u{00d7} {} features, {} non-zero",
            self.n_cells(),
            self.n_features(),
            self.nnz()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[test]
    fn triplets_sum_duplicates_and_sort() {
        let m = CountMatrix::from_triplets(
            &[1, 0, 1, 1],
            &[2, 1, 0, 2],
            &[1.0, 3.0, 2.0, 4.0],
            ids("c", 2),
            ids("f", 3),
        )
        .unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.get(1, 2), 5);
        assert_eq!(m.row(1), (&[0usize, 2][..], &[2u32, 5][..]));
        assert_eq!(m.get(0, 0), 0);
    }

    #[test]
    fn negative_count_rejected() {
        let err = CountMatrix::from_triplets(&[0], &[1], &[-2.0], ids("c", 1), ids("f", 2))
            .unwrap_err();
        assert!(matches!(err, AtacamaError::NegativeCount { row: 0, col: 1, .. }));

        let err = CountMatrix::from_triplets(&[0], &[0], &[-1.5], ids("c", 1), ids("f", 1))
            .unwrap_err();
        assert!(matches!(err, AtacamaError::NegativeCount { row: 0, col: 0, .. }));
    }

    #[test]
    fn summed_duplicates_overflow_is_an_error() {
        let err = CountMatrix::from_triplets(
            &[0, 0],
            &[0, 0],
            &[1e19, 1e19],
            ids("c", 1),
            ids("f", 1),
        )
        .unwrap_err();
        match err {
            AtacamaError::InvalidInput(msg) => assert!(msg.contains("u64"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn fractional_and_out_of_bounds_rejected() {
        assert!(CountMatrix::from_triplets(&[0], &[0], &[1.5], ids("c", 1), ids("f", 1)).is_err());
        assert!(CountMatrix::from_triplets(&[2], &[0], &[1.0], ids("c", 1), ids("f", 1)).is_err());
        assert!(CountMatrix::from_triplets(&[0, 0], &[0], &[1.0], ids("c", 1), ids("f", 1)).is_err());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let cells = vec!["a".to_string(), "a".to_string()];
        assert!(CountMatrix::from_triplets(&[], &[], &[], cells, ids("f", 1)).is_err());
    }

    #[test]
    fn totals_and_detection() {
        let m = CountMatrix::from_dense(
            &[vec![1.0, 0.0, 2.0], vec![0.0, 0.0, 3.0]],
            ids("c", 2),
            ids("f", 3),
        )
        .unwrap();
        assert_eq!(m.cell_totals(), vec![3.0, 3.0]);
        assert_eq!(m.feature_totals(), vec![1.0, 0.0, 5.0]);
        assert_eq!(m.feature_detection(), vec![1, 0, 2]);
    }

    #[test]
    fn subsets_keep_identity() {
        let m = CountMatrix::from_dense(
            &[vec![1.0, 0.0, 2.0], vec![0.0, 4.0, 3.0], vec![5.0, 0.0, 0.0]],
            ids("c", 3),
            ids("f", 3),
        )
        .unwrap();
        let mask = FeatureMask::from_indices(vec![2, 0], 3).unwrap();
        let sub = m.subset_features(&mask).unwrap();
        assert_eq!(sub.feature_ids(), &["f0".to_string(), "f2".to_string()]);
        assert_eq!(sub.to_dense()[1], vec![0.0, 3.0]);

        let cells = m.subset_cells(&[2, 0]).unwrap();
        assert_eq!(cells.cell_ids(), &["c2".to_string(), "c0".to_string()]);
        assert_eq!(cells.get(0, 0), 5);
        assert!(m.subset_cells(&[0, 0]).is_err());
        assert!(m.subset_cells(&[3]).is_err());
    }

    #[test]
    fn drop_degenerate_reports_ids() {
        let m = CountMatrix::from_dense(
            &[vec![1.0, 0.0, 2.0], vec![0.0, 0.0, 0.0], vec![3.0, 0.0, 1.0]],
            ids("c", 3),
            ids("f", 3),
        )
        .unwrap();
        let f = m.drop_degenerate().unwrap();
        assert_eq!(f.dropped_cells, vec!["c1".to_string()]);
        assert_eq!(f.dropped_features, vec!["f1".to_string()]);
        assert_eq!(f.matrix.shape(), (2, 2));
        assert_eq!(f.matrix.to_dense(), vec![vec![1.0, 2.0], vec![3.0, 1.0]]);
    }

    #[test]
    fn normalized_rejects_negative() {
        assert!(NormalizedMatrix::from_dense(&[vec![0.5, -0.1]], ids("c", 1), ids("f", 2)).is_err());
    }

    #[test]
    fn operator_products_match_dense() {
        let dense = vec![vec![1.0, 0.0, 2.0], vec![0.0, 3.0, 1.0]];
        let m = NormalizedMatrix::from_dense(&dense, ids("c", 2), ids("f", 3)).unwrap();
        assert_eq!(LinearOperator::shape(&m), (2, 3));
        assert_eq!(m.apply(&[1.0, 1.0, 1.0]), vec![3.0, 4.0]);
        assert_eq!(m.apply_transpose(&[1.0, 2.0]), vec![1.0, 6.0, 4.0]);
    }

    #[test]
    fn summary_format() {
        let m = CountMatrix::from_dense(&[vec![1.0, 0.0]], ids("c", 1), ids("f", 2)).unwrap();
        assert_eq!(m.summary(), "CountMatrix: 1 cells \u{00d7} 2 features, 1 non-zero");
    }
}
