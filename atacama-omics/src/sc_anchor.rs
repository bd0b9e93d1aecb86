//! Cross-dataset anchors between a reference and a query.
//!
//! Anchor discovery runs as three stages that can be used on their own:
//!
//! 1. [`joint_reduction`]: canonical correlation analysis over the features
//!    both count matrices share, giving one L2-normalized coordinate set per
//!    dataset in a common space.
//! 2. [`mutual_neighbors`]: pairs of cells that are among each other's
//!    `k_anchor` nearest cross-dataset neighbors in that space.
//! 3. [`consistency_scores`]: the fraction of neighbors the two cells of a
//!    pair share once each cell's neighborhood also includes its own-dataset
//!    neighbors. Pairs without shared neighbors are rejected.
//!
//! [`find_anchors`] chains them, optionally drops pairs whose reference cell
//! is not among the query cell's `k_filter` nearest reference cells in
//! feature space, and weights each surviving pair by its neighbor rank.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use atacama_core::{AtacamaError, Result, Summarizable};
use atacama_ml::{knn_across, knn_within, svd_of, DistanceMetric, LinearOperator, Neighbor};
use atacama_stats::quantile_rescale;

use crate::embedding::{ensure_same_cells, Embedding};
use crate::sparse::CountMatrix;

/// Method name of joint-space embeddings.
pub const CCA_METHOD: &str = "cca";

/// Counts per cell after library-size scaling, before `ln(1 + x)`.
const SCALE_FACTOR: f64 = 1e4;

/// Standardized values are clipped to this magnitude.
const MAX_Z: f64 = 10.0;

/// Joint dimensionality reduction used to place both datasets in one space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JointReduction {
    /// Canonical correlation analysis.
    #[default]
    Cca,
}

/// Configuration for [`find_anchors`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AnchorConfig {
    pub reduction: JointReduction,
    /// Dimensions of the joint space, clamped to what the data supports.
    pub n_components: usize,
    /// Cross-dataset neighbors searched when pairing cells.
    pub k_anchor: usize,
    /// Feature-space neighbor filter; `None` disables it.
    pub k_filter: Option<usize>,
    /// Neighborhood size for consistency scoring.
    pub k_score: usize,
    /// Lower and upper quantiles mapped to 0 and 1 when rescaling scores.
    pub score_quantiles: (f64, f64),
    /// Pairs whose shared-neighbor fraction does not exceed this are dropped.
    pub min_score: f64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            reduction: JointReduction::Cca,
            n_components: 30,
            k_anchor: 5,
            k_filter: Some(200),
            k_score: 30,
            score_quantiles: (0.01, 0.9),
            min_score: 0.0,
        }
    }
}

impl AnchorConfig {
    fn validate(&self) -> Result<()> {
        if self.n_components == 0 || self.k_anchor == 0 || self.k_score == 0 {
            return Err(AtacamaError::InvalidInput(
                "n_components, k_anchor and k_score must be at least 1".into(),
            ));
        }
        if self.k_filter == Some(0) {
            return Err(AtacamaError::InvalidInput("k_filter must be at least 1".into()));
        }
        let (lo, hi) = self.score_quantiles;
        if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
            return Err(AtacamaError::InvalidInput(format!(
                "score quantiles must satisfy 0 <= lo <= hi <= 1, got ({lo}, {hi})"
            )));
        }
        Ok(())
    }
}

// ── Joint reduction ────────────────────────────────────────────────────────

/// Reference and query cells placed in a common space.
#[derive(Debug, Clone)]
pub struct JointEmbedding {
    pub reference: Embedding,
    pub query: Embedding,
    /// Singular values of the cross-product matrix, one per dimension.
    pub correlations: Vec<f64>,
    /// IDs of the features the reduction used, in reference order.
    pub shared_features: Vec<String>,
}

/// `(reference column, query column)` of every feature present in both
/// matrices, in reference order.
fn shared_features(reference: &CountMatrix, query: &CountMatrix) -> Result<Vec<(usize, usize)>> {
    let query_index: HashMap<&str, usize> = query
        .feature_ids()
        .iter()
        .enumerate()
        .map(|(j, id)| (id.as_str(), j))
        .collect();
    let shared: Vec<(usize, usize)> = reference
        .feature_ids()
        .iter()
        .enumerate()
        .filter_map(|(j, id)| query_index.get(id.as_str()).map(|&q| (j, q)))
        .collect();
    if shared.is_empty() {
        return Err(AtacamaError::InvalidInput(
            "reference and query share no features".into(),
        ));
    }
    Ok(shared)
}

/// Dense `ln(1 + c / total · 1e4)` over the selected columns, row-major.
/// Totals cover all features of the cell.
fn log_normalized(raw: &CountMatrix, columns: impl Iterator<Item = usize>) -> Vec<f64> {
    let mut col_of = vec![usize::MAX; raw.n_features()];
    let mut n_cols = 0;
    for (c, j) in columns.enumerate() {
        col_of[j] = c;
        n_cols = c + 1;
    }
    let totals = raw.cell_totals();
    let mut out = vec![0.0; raw.n_cells() * n_cols];
    for i in 0..raw.n_cells() {
        if totals[i] <= 0.0 {
            continue;
        }
        let (idx, vals) = raw.row(i);
        for (&j, &v) in idx.iter().zip(vals) {
            if col_of[j] != usize::MAX {
                out[i * n_cols + col_of[j]] = (f64::from(v) / totals[i] * SCALE_FACTOR).ln_1p();
            }
        }
    }
    out
}

/// Center and scale each column (sample standard deviation), clipping at
/// `±MAX_Z`. Constant columns become 0.
fn standardize_columns(data: &mut [f64], n_rows: usize, n_cols: usize) {
    for c in 0..n_cols {
        let mean = (0..n_rows).map(|i| data[i * n_cols + c]).sum::<f64>() / n_rows as f64;
        let ss: f64 = (0..n_rows).map(|i| (data[i * n_cols + c] - mean).powi(2)).sum();
        let sd = if n_rows > 1 {
            (ss / (n_rows - 1) as f64).sqrt()
        } else {
            0.0
        };
        for i in 0..n_rows {
            let x = &mut data[i * n_cols + c];
            *x = if sd > 0.0 {
                ((*x - mean) / sd).clamp(-MAX_Z, MAX_Z)
            } else {
                0.0
            };
        }
    }
}

fn l2_normalize_rows(data: &mut [f64], n_cols: usize) {
    for row in data.chunks_mut(n_cols) {
        let norm = row.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            row.iter_mut().for_each(|x| *x /= norm);
        }
    }
}

/// Place reference and query cells in a common space over their shared
/// features.
///
/// # Errors
///
/// [`AtacamaError::InvalidInput`] if the matrices share no features or a
/// dataset has fewer than two cells; [`AtacamaError::RankDeficiency`] if
/// the cross-product matrix is zero.
pub fn joint_reduction(
    reference_raw: &CountMatrix,
    query_raw: &CountMatrix,
    config: &AnchorConfig,
) -> Result<JointEmbedding> {
    let shared = shared_features(reference_raw, query_raw)?;
    match config.reduction {
        JointReduction::Cca => cca(reference_raw, query_raw, &shared, config.n_components),
    }
}

/// `X·Yᵀ` over row-major cells × shared-features blocks, applied without
/// forming the `n_ref × n_query` product.
struct CrossProduct<'a> {
    x: &'a [f64],
    y: &'a [f64],
    n_ref: usize,
    n_query: usize,
    n_shared: usize,
}

impl CrossProduct<'_> {
    /// `Mᵀ·z` for a row-major `m` with `n_shared` columns.
    fn project(&self, m: &[f64], z: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_shared];
        for (row, &zi) in m.chunks_exact(self.n_shared).zip(z) {
            if zi == 0.0 {
                continue;
            }
            for (o, v) in out.iter_mut().zip(row) {
                *o += v * zi;
            }
        }
        out
    }

    /// `M·t` for a row-major `m` with `n_shared` columns.
    fn expand(&self, m: &[f64], t: &[f64]) -> Vec<f64> {
        let row_dot = |row: &[f64]| -> f64 { row.iter().zip(t).map(|(a, b)| a * b).sum() };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            m.par_chunks_exact(self.n_shared).map(row_dot).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            m.chunks_exact(self.n_shared).map(row_dot).collect()
        }
    }
}

impl LinearOperator for CrossProduct<'_> {
    fn shape(&self) -> (usize, usize) {
        (self.n_ref, self.n_query)
    }

    fn apply(&self, z: &[f64]) -> Vec<f64> {
        self.expand(self.x, &self.project(self.y, z))
    }

    fn apply_transpose(&self, w: &[f64]) -> Vec<f64> {
        self.expand(self.y, &self.project(self.x, w))
    }
}

/// CCA as the SVD of `X·Yᵀ`, where `X` and `Y` are the standardized
/// log-normalized cells × shared-features matrices.
fn cca(
    reference_raw: &CountMatrix,
    query_raw: &CountMatrix,
    shared: &[(usize, usize)],
    n_components: usize,
) -> Result<JointEmbedding> {
    let n_ref = reference_raw.n_cells();
    let n_query = query_raw.n_cells();
    if n_ref < 2 || n_query < 2 {
        return Err(AtacamaError::InvalidInput(format!(
            "joint reduction needs at least 2 cells per dataset, got {n_ref} and {n_query}"
        )));
    }
    let f = shared.len();
    let mut x = log_normalized(reference_raw, shared.iter().map(|&(r, _)| r));
    let mut y = log_normalized(query_raw, shared.iter().map(|&(_, q)| q));
    standardize_columns(&mut x, n_ref, f);
    standardize_columns(&mut y, n_query, f);

    let cross = CrossProduct {
        x: &x,
        y: &y,
        n_ref,
        n_query,
        n_shared: f,
    };

    let k = n_components.min(n_ref).min(n_query);
    let svd = match svd_of(&cross, k) {
        Ok(svd) => svd,
        Err(AtacamaError::RankDeficiency { rank, .. }) if rank > 0 => {
            warn!(requested = k, rank, "joint space truncated to cross-product rank");
            svd_of(&cross, rank)?
        }
        Err(e) => return Err(e),
    };
    let k = svd.k;
    let mut u = svd.u;
    let mut v = svd.v;
    l2_normalize_rows(&mut u, k);
    l2_normalize_rows(&mut v, k);
    debug!(n_ref, n_query, n_shared = f, n_dims = k, "joint CCA space");

    Ok(JointEmbedding {
        reference: Embedding::new(CCA_METHOD, reference_raw.cell_ids().to_vec(), u, k)?,
        query: Embedding::new(CCA_METHOD, query_raw.cell_ids().to_vec(), v, k)?,
        correlations: svd.singular_values,
        shared_features: shared
            .iter()
            .map(|&(r, _)| reference_raw.feature_ids()[r].clone())
            .collect(),
    })
}

// ── Mutual nearest neighbors ───────────────────────────────────────────────

/// A reference cell and a query cell that are mutual cross-dataset
/// neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutualPair {
    pub reference: usize,
    pub query: usize,
    /// 0-based rank of the query cell among the reference cell's neighbors.
    pub reference_rank: usize,
    /// 0-based rank of the reference cell among the query cell's neighbors.
    pub query_rank: usize,
}

/// Mutual `k`-nearest-neighbor pairs between two embeddings of equal width,
/// ordered by query then reference index.
pub fn mutual_neighbors(
    reference: &Embedding,
    query: &Embedding,
    k: usize,
) -> Result<Vec<MutualPair>> {
    let ref_rows = reference.rows();
    let query_rows = query.rows();
    let ref_to_query = knn_across(&ref_rows, &query_rows, k, DistanceMetric::Euclidean)?;
    let query_to_ref = knn_across(&query_rows, &ref_rows, k, DistanceMetric::Euclidean)?;

    let mut pairs = Vec::new();
    for (r, list) in ref_to_query.iter().enumerate() {
        for (reference_rank, &(q, _)) in list.iter().enumerate() {
            if let Some(query_rank) = query_to_ref[q].iter().position(|&(x, _)| x == r) {
                pairs.push(MutualPair {
                    reference: r,
                    query: q,
                    reference_rank,
                    query_rank,
                });
            }
        }
    }
    pairs.sort_by_key(|p| (p.query, p.reference));
    Ok(pairs)
}

// ── Consistency ────────────────────────────────────────────────────────────

/// Each cell's `k` nearest cells in its own embedding, itself included.
fn own_neighborhoods(embedding: &Embedding, k: usize) -> Result<Vec<Vec<usize>>> {
    let n = embedding.n_cells();
    if n < 2 || k < 2 {
        return Ok((0..n).map(|i| vec![i]).collect());
    }
    let knn = knn_within(&embedding.rows(), k - 1, DistanceMetric::Euclidean)?;
    Ok(knn
        .into_iter()
        .enumerate()
        .map(|(i, list)| std::iter::once(i).chain(list.into_iter().map(|(j, _)| j)).collect())
        .collect())
}

fn indices(list: Vec<Neighbor>) -> Vec<usize> {
    list.into_iter().map(|(j, _)| j).collect()
}

fn overlap(a: &[usize], b: &[usize]) -> usize {
    a.iter().filter(|x| b.contains(x)).count()
}

/// Shared-neighbor fraction of every pair, in `[0, 1]`.
///
/// A reference cell's neighborhood is its `k_score` nearest reference cells
/// in `reference_own` plus its `k_score` nearest query cells in the joint
/// space; query cells are treated the same way. The score is the size of the
/// intersection of the two neighborhoods over `2·k_score`.
pub fn consistency_scores(
    pairs: &[MutualPair],
    reference_own: &Embedding,
    query_own: &Embedding,
    joint: &JointEmbedding,
    k_score: usize,
) -> Result<Vec<f64>> {
    if pairs.is_empty() {
        return Ok(Vec::new());
    }
    let ref_ref = own_neighborhoods(reference_own, k_score)?;
    let query_query = own_neighborhoods(query_own, k_score)?;
    let ref_rows = joint.reference.rows();
    let query_rows = joint.query.rows();
    let ref_query: Vec<Vec<usize>> =
        knn_across(&ref_rows, &query_rows, k_score, DistanceMetric::Euclidean)?
            .into_iter()
            .map(indices)
            .collect();
    let query_ref: Vec<Vec<usize>> =
        knn_across(&query_rows, &ref_rows, k_score, DistanceMetric::Euclidean)?
            .into_iter()
            .map(indices)
            .collect();

    Ok(pairs
        .iter()
        .map(|p| {
            let shared = overlap(&ref_ref[p.reference], &query_ref[p.query])
                + overlap(&ref_query[p.reference], &query_query[p.query]);
            shared as f64 / (2 * k_score) as f64
        })
        .collect())
}

/// Keep pairs whose reference cell is among the query cell's `k_filter`
/// nearest reference cells by cosine distance over shared log-normalized
/// profiles.
fn filter_by_features(
    pairs: Vec<MutualPair>,
    reference_raw: &CountMatrix,
    query_raw: &CountMatrix,
    shared: &[(usize, usize)],
    k_filter: usize,
) -> Result<Vec<MutualPair>> {
    if pairs.is_empty() {
        return Ok(pairs);
    }
    let f = shared.len();
    let ref_profiles = log_normalized(reference_raw, shared.iter().map(|&(r, _)| r));
    let query_profiles = log_normalized(query_raw, shared.iter().map(|&(_, q)| q));
    let ref_rows: Vec<&[f64]> = ref_profiles.chunks_exact(f).collect();

    let mut queries: Vec<usize> = pairs.iter().map(|p| p.query).collect();
    queries.dedup();
    let query_rows: Vec<&[f64]> = queries
        .iter()
        .map(|&q| &query_profiles[q * f..(q + 1) * f])
        .collect();
    let nearest: BTreeMap<usize, Vec<usize>> = queries
        .iter()
        .copied()
        .zip(
            knn_across(&query_rows, &ref_rows, k_filter, DistanceMetric::Cosine)?
                .into_iter()
                .map(indices),
        )
        .collect();

    Ok(pairs
        .into_iter()
        .filter(|p| nearest[&p.query].contains(&p.reference))
        .collect())
}

// ── Anchors ────────────────────────────────────────────────────────────────

/// A weighted reference/query correspondence.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Anchor {
    /// Row of the reference cell.
    pub reference: usize,
    /// Row of the query cell.
    pub query: usize,
    /// Rescaled consistency score in `[0, 1]`.
    pub score: f64,
    /// Rank kernel in `[0, 1]`; 1 for pairs that are each other's nearest
    /// neighbor.
    pub weight: f64,
}

/// Anchors between a reference and a query dataset.
///
/// A cell may take part in several anchors on either side.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnchorSet {
    reference_ids: Vec<String>,
    query_ids: Vec<String>,
    anchors: Vec<Anchor>,
}

impl AnchorSet {
    /// Assemble an anchor set, checking indices and that scores and weights
    /// lie in `[0, 1]`.
    pub fn new(
        reference_ids: Vec<String>,
        query_ids: Vec<String>,
        anchors: Vec<Anchor>,
    ) -> Result<Self> {
        for a in &anchors {
            if a.reference >= reference_ids.len() || a.query >= query_ids.len() {
                return Err(AtacamaError::InvalidInput(format!(
                    "anchor ({}, {}) out of range for {} reference and {} query cells",
                    a.reference,
                    a.query,
                    reference_ids.len(),
                    query_ids.len()
                )));
            }
            if !(0.0..=1.0).contains(&a.weight) || !(0.0..=1.0).contains(&a.score) {
                return Err(AtacamaError::InvalidInput(format!(
                    "anchor ({}, {}) has score {} and weight {}, both must lie in [0, 1]",
                    a.reference, a.query, a.score, a.weight
                )));
            }
        }
        Ok(Self {
            reference_ids,
            query_ids,
            anchors,
        })
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn reference_ids(&self) -> &[String] {
        &self.reference_ids
    }

    pub fn query_ids(&self) -> &[String] {
        &self.query_ids
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// `(reference ID, query ID, weight)` triples.
    pub fn triples(&self) -> impl Iterator<Item = (&str, &str, f64)> + '_ {
        self.anchors.iter().map(|a| {
            (
                self.reference_ids[a.reference].as_str(),
                self.query_ids[a.query].as_str(),
                a.weight,
            )
        })
    }
}

impl Summarizable for AnchorSet {
    fn summary(&self) -> String {
        format!(
            "AnchorSet: {} anchors between {} reference and {} query cells",
            self.anchors.len(),
            self.reference_ids.len(),
            self.query_ids.len()
        )
    }
}

/// Find anchors between `reference` and `query`.
///
/// The embeddings supply each dataset's own neighborhoods for consistency
/// scoring and must list the same cells, in the same order, as their raw
/// matrices. An empty anchor set is returned (with a warning) when no pair
/// survives filtering.
pub fn find_anchors(
    reference: &Embedding,
    reference_raw: &CountMatrix,
    query: &Embedding,
    query_raw: &CountMatrix,
    config: &AnchorConfig,
) -> Result<AnchorSet> {
    config.validate()?;
    ensure_same_cells("reference embedding", reference_raw.cell_ids(), reference.cell_ids())?;
    ensure_same_cells("query embedding", query_raw.cell_ids(), query.cell_ids())?;

    let shared = shared_features(reference_raw, query_raw)?;
    let joint = match config.reduction {
        JointReduction::Cca => cca(reference_raw, query_raw, &shared, config.n_components)?,
    };

    let mut pairs = mutual_neighbors(&joint.reference, &joint.query, config.k_anchor)?;
    let n_mutual = pairs.len();
    if let Some(k_filter) = config.k_filter {
        pairs = filter_by_features(pairs, reference_raw, query_raw, &shared, k_filter)?;
    }
    let n_filtered = pairs.len();

    let raw_scores = consistency_scores(&pairs, reference, query, &joint, config.k_score)?;
    let (pairs, raw_scores): (Vec<MutualPair>, Vec<f64>) = pairs
        .into_iter()
        .zip(raw_scores)
        .filter(|&(_, s)| s > config.min_score)
        .unzip();

    let anchors = if pairs.is_empty() {
        Vec::new()
    } else {
        let (lo, hi) = config.score_quantiles;
        let scores = quantile_rescale(&raw_scores, lo, hi)?;
        let k = config.k_anchor as f64;
        pairs
            .iter()
            .zip(scores)
            .map(|(p, score)| Anchor {
                reference: p.reference,
                query: p.query,
                score,
                weight: (1.0 - (p.reference_rank + p.query_rank) as f64 / (2.0 * k)).clamp(0.0, 1.0),
            })
            .collect()
    };

    if anchors.is_empty() {
        warn!(n_mutual, n_filtered, "no anchors survived filtering");
    }
    debug!(
        n_dims = joint.reference.n_dims(),
        n_shared = shared.len(),
        n_mutual,
        n_filtered,
        n_anchors = anchors.len(),
        "found anchors"
    );

    AnchorSet::new(
        reference_raw.cell_ids().to_vec(),
        query_raw.cell_ids().to_vec(),
        anchors,
    )
}
