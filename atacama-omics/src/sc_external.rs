//! Pluggable embedding methods.
//!
//! Any method that maps a cell matrix to a cells × dims matrix can stand in
//! for LSI by implementing [`ExternalEmbedder`]. The adapter never looks
//! inside the method; [`embed_checked`] only enforces that the returned rows
//! match the input cells, in order, with the requested width.

use tracing::debug;

use atacama_core::{AtacamaError, Result};

use crate::embedding::{ensure_same_cells, Embedding};
use crate::sc_lsi::{fit_lsi, LsiConfig};
use crate::sc_preprocess::{normalize, TfIdfConfig};
use crate::sparse::{CountMatrix, NormalizedMatrix};

/// Matrix handed to an embedding method.
#[derive(Debug, Clone, Copy)]
pub enum EmbedderInput<'a> {
    Counts(&'a CountMatrix),
    Normalized(&'a NormalizedMatrix),
}

impl EmbedderInput<'_> {
    /// Cell IDs of the input, in row order.
    pub fn cell_ids(&self) -> &[String] {
        match self {
            EmbedderInput::Counts(m) => m.cell_ids(),
            EmbedderInput::Normalized(m) => m.cell_ids(),
        }
    }

    pub fn n_cells(&self) -> usize {
        self.cell_ids().len()
    }
}

/// An opaque embedding method.
pub trait ExternalEmbedder {
    /// Method name used to key the resulting embedding.
    fn name(&self) -> &str;

    /// Embed the input into `n_dims` dimensions.
    fn embed(&self, input: EmbedderInput<'_>, n_dims: usize) -> Result<Embedding>;
}

/// Run `embedder` and enforce the row and width contract.
///
/// The returned embedding is renamed to `embedder.name()`.
///
/// # Errors
///
/// [`AtacamaError::ShapeMismatch`] if the row count, cell order or
/// dimension count differs from what was asked for; any error raised by
/// the embedder itself is passed through.
pub fn embed_checked(
    embedder: &dyn ExternalEmbedder,
    input: EmbedderInput<'_>,
    n_dims: usize,
) -> Result<Embedding> {
    if n_dims == 0 {
        return Err(AtacamaError::InvalidInput("n_dims must be > 0".into()));
    }
    let out = embedder.embed(input, n_dims)?;
    let expected = input.cell_ids();
    let context = format!("embedding '{}'", embedder.name());

    ensure_same_cells(&context, expected, out.cell_ids())?;
    if out.n_dims() != n_dims {
        return Err(AtacamaError::shape_mismatch(
            format!("{context} dimensions"),
            n_dims,
            out.n_dims(),
        ));
    }
    debug!(method = embedder.name(), n_cells = out.n_cells(), n_dims, "external embedding accepted");
    Ok(out.renamed(embedder.name()))
}

/// Wraps a closure as an [`ExternalEmbedder`].
pub struct FnEmbedder<F> {
    name: String,
    f: F,
}

impl<F> FnEmbedder<F>
where
    F: Fn(EmbedderInput<'_>, usize) -> Result<Embedding>,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> ExternalEmbedder for FnEmbedder<F>
where
    F: Fn(EmbedderInput<'_>, usize) -> Result<Embedding>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn embed(&self, input: EmbedderInput<'_>, n_dims: usize) -> Result<Embedding> {
        (self.f)(input, n_dims)
    }
}

/// The built-in TF-IDF + LSI path behind the same interface.
///
/// Count inputs are normalized with `tfidf` first; `n_dims` overrides
/// `lsi.n_components`.
#[derive(Debug, Clone, Default)]
pub struct LsiEmbedder {
    pub tfidf: TfIdfConfig,
    pub lsi: LsiConfig,
}

impl ExternalEmbedder for LsiEmbedder {
    fn name(&self) -> &str {
        crate::sc_lsi::LSI_METHOD
    }

    fn embed(&self, input: EmbedderInput<'_>, n_dims: usize) -> Result<Embedding> {
        let config = LsiConfig {
            n_components: n_dims,
            ..self.lsi.clone()
        };
        let fit = match input {
            EmbedderInput::Counts(counts) => fit_lsi(&normalize(counts, &self.tfidf)?, &config)?,
            EmbedderInput::Normalized(norm) => fit_lsi(norm, &config)?,
        };
        Ok(fit.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("cell{i}")).collect()
    }

    fn counts() -> CountMatrix {
        let rows: Vec<Vec<f64>> = (0..6)
            .map(|i| {
                (0..5)
                    .map(|j| if (i + j) % 3 == 0 { 0.0 } else { ((i * j) % 4 + 1) as f64 })
                    .collect()
            })
            .collect();
        CountMatrix::from_dense(&rows, ids(6), (0..5).map(|j| format!("peak{j}")).collect())
            .unwrap()
    }

    fn constant(cells: Vec<String>, n_dims: usize) -> Result<Embedding> {
        let n = cells.len();
        Embedding::new("raw", cells, vec![0.5; n * n_dims], n_dims)
    }

    #[test]
    fn accepts_conforming_output() {
        let m = counts();
        let e = FnEmbedder::new("scopen", |input: EmbedderInput<'_>, d| {
            constant(input.cell_ids().to_vec(), d)
        });
        let out = embed_checked(&e, EmbedderInput::Counts(&m), 3).unwrap();
        assert_eq!(out.method(), "scopen");
        assert_eq!(out.n_dims(), 3);
        assert_eq!(out.cell_ids(), m.cell_ids());
    }

    #[test]
    fn rejects_wrong_row_count() {
        let m = counts();
        let e = FnEmbedder::new("short", |input: EmbedderInput<'_>, d| {
            constant(input.cell_ids()[1..].to_vec(), d)
        });
        let err = embed_checked(&e, EmbedderInput::Counts(&m), 2).unwrap_err();
        assert!(matches!(err, AtacamaError::ShapeMismatch { .. }));
        assert_eq!(err.category(), atacama_core::ErrorCategory::InputContract);
    }

    #[test]
    fn rejects_reordered_rows() {
        let m = counts();
        let e = FnEmbedder::new("shuffled", |input: EmbedderInput<'_>, d| {
            let mut cells = input.cell_ids().to_vec();
            cells.swap(0, 1);
            constant(cells, d)
        });
        match embed_checked(&e, EmbedderInput::Counts(&m), 2) {
            Err(AtacamaError::ShapeMismatch { expected, found, .. }) => {
                assert_eq!(expected, "cell0");
                assert_eq!(found, "cell1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_width() {
        let m = counts();
        let e = FnEmbedder::new("wide", |input: EmbedderInput<'_>, d| {
            constant(input.cell_ids().to_vec(), d + 1)
        });
        assert!(embed_checked(&e, EmbedderInput::Counts(&m), 2).is_err());
    }

    #[test]
    fn lsi_embedder_matches_direct_fit() {
        let m = counts();
        let lsi = LsiEmbedder::default();
        let via_trait = embed_checked(&lsi, EmbedderInput::Counts(&m), 3).unwrap();
        let norm = normalize(&m, &TfIdfConfig::default()).unwrap();
        let direct = fit_lsi(&norm, &LsiConfig { n_components: 3, ..Default::default() }).unwrap();
        assert_eq!(via_trait.values(), direct.embedding.values());

        let from_norm = embed_checked(&lsi, EmbedderInput::Normalized(&norm), 3).unwrap();
        assert_eq!(from_norm.values(), direct.embedding.values());
    }
}
