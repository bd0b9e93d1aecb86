//! Dense cell embeddings and the per-collection artifact registry.

use std::collections::BTreeMap;

use atacama_core::{AtacamaError, Result, Summarizable};

/// Dense cells × latent-dimensions matrix produced by one reduction method.
///
/// Rows follow the cell order of the matrix the embedding was computed
/// from; the dimension count is fixed at creation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Embedding {
    method: String,
    cell_ids: Vec<String>,
    values: Vec<f64>,
    n_dims: usize,
}

impl Embedding {
    /// Build from row-major values.
    pub fn new(
        method: impl Into<String>,
        cell_ids: Vec<String>,
        values: Vec<f64>,
        n_dims: usize,
    ) -> Result<Self> {
        if n_dims == 0 {
            return Err(AtacamaError::InvalidInput(
                "embedding needs at least one dimension".into(),
            ));
        }
        if values.len() != cell_ids.len() * n_dims {
            return Err(AtacamaError::shape_mismatch(
                "embedding values",
                format!("{} \u{00d7} {n_dims}", cell_ids.len()),
                values.len(),
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AtacamaError::InvalidInput(
                "embedding contains non-finite values".into(),
            ));
        }
        Ok(Self {
            method: method.into(),
            cell_ids,
            values,
            n_dims,
        })
    }

    /// Build from one `Vec` per cell.
    pub fn from_rows(
        method: impl Into<String>,
        cell_ids: Vec<String>,
        rows: &[Vec<f64>],
    ) -> Result<Self> {
        let n_dims = rows.first().map_or(0, Vec::len);
        if rows.len() != cell_ids.len() {
            return Err(AtacamaError::shape_mismatch(
                "embedding rows",
                cell_ids.len(),
                rows.len(),
            ));
        }
        if let Some(i) = rows.iter().position(|r| r.len() != n_dims) {
            return Err(AtacamaError::shape_mismatch(
                format!("embedding row {i}"),
                n_dims,
                rows[i].len(),
            ));
        }
        Self::new(method, cell_ids, rows.concat(), n_dims)
    }

    /// Name of the method that produced this embedding (e.g. `"lsi"`).
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn n_cells(&self) -> usize {
        self.cell_ids.len()
    }

    pub fn n_dims(&self) -> usize {
        self.n_dims
    }

    /// Row-major values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.n_dims..(i + 1) * self.n_dims]
    }

    /// Borrowed rows, in cell order.
    pub fn rows(&self) -> Vec<&[f64]> {
        self.values.chunks_exact(self.n_dims).collect()
    }

    /// Values of dimension `d` across cells.
    pub fn column(&self, d: usize) -> Vec<f64> {
        self.values.chunks_exact(self.n_dims).map(|r| r[d]).collect()
    }

    /// Restrict to an ordered subset of dimensions (0-based).
    ///
    /// `None` keeps every dimension.
    pub fn select_dims(&self, dims: Option<&[usize]>) -> Result<Embedding> {
        let Some(dims) = dims else {
            return Ok(self.clone());
        };
        if dims.is_empty() {
            return Err(AtacamaError::InvalidInput("dimension subset is empty".into()));
        }
        let mut seen = vec![false; self.n_dims];
        for &d in dims {
            if d >= self.n_dims {
                return Err(AtacamaError::InvalidInput(format!(
                    "dimension {d} out of range for a {}-dimensional embedding",
                    self.n_dims
                )));
            }
            if std::mem::replace(&mut seen[d], true) {
                return Err(AtacamaError::InvalidInput(format!(
                    "dimension {d} selected twice"
                )));
            }
        }
        let values = self
            .values
            .chunks_exact(self.n_dims)
            .flat_map(|r| dims.iter().map(move |&d| r[d]))
            .collect();
        Ok(Embedding {
            method: self.method.clone(),
            cell_ids: self.cell_ids.clone(),
            values,
            n_dims: dims.len(),
        })
    }

    /// Same values under a different method name.
    pub fn renamed(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }
}

/// Fail unless `found` lists exactly the cells of `expected`, in order.
pub(crate) fn ensure_same_cells(context: &str, expected: &[String], found: &[String]) -> Result<()> {
    if expected.len() != found.len() {
        return Err(AtacamaError::shape_mismatch(
            format!("{context} row count"),
            expected.len(),
            found.len(),
        ));
    }
    if let Some(i) = expected.iter().zip(found).position(|(a, b)| a != b) {
        return Err(AtacamaError::shape_mismatch(
            format!("{context} row order at row {i}"),
            &expected[i],
            &found[i],
        ));
    }
    Ok(())
}

impl Summarizable for Embedding {
    fn summary(&self) -> String {
        format!(
            "Embedding '{}': {} cells \u{00d7} {} dims",
            self.method,
            self.n_cells(),
            self.n_dims
        )
    }
}

/// Embeddings of one cell collection, keyed by method name.
#[derive(Debug, Clone, Default)]
pub struct CellArtifacts {
    cell_ids: Vec<String>,
    embeddings: BTreeMap<String, Embedding>,
}

impl CellArtifacts {
    pub fn new(cell_ids: Vec<String>) -> Self {
        Self {
            cell_ids,
            embeddings: BTreeMap::new(),
        }
    }

    /// Attach an embedding under its method name.
    ///
    /// # Errors
    ///
    /// [`AtacamaError::ShapeMismatch`] if the embedding's cells differ from
    /// the collection's, [`AtacamaError::InvalidInput`] if the name is taken.
    pub fn insert(&mut self, embedding: Embedding) -> Result<()> {
        if embedding.cell_ids() != self.cell_ids.as_slice() {
            return Err(AtacamaError::shape_mismatch(
                format!("artifact '{}' cells", embedding.method()),
                format!("{} cells in collection order", self.cell_ids.len()),
                format!("{} cells", embedding.n_cells()),
            ));
        }
        if self.embeddings.contains_key(embedding.method()) {
            return Err(AtacamaError::InvalidInput(format!(
                "embedding '{}' already attached",
                embedding.method()
            )));
        }
        self.embeddings.insert(embedding.method().to_string(), embedding);
        Ok(())
    }

    pub fn get(&self, method: &str) -> Option<&Embedding> {
        self.embeddings.get(method)
    }

    /// Attached method names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.embeddings.keys().map(String::as_str)
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}
