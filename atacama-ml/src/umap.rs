//! UMAP (Uniform Manifold Approximation and Projection).
//!
//! Nonlinear projection of a latent space into a few display dimensions.
//! The high-dimensional neighborhood graph is a fuzzy simplicial set built
//! from exact kNN; the layout is optimized by negative-sampling SGD against
//! the smooth `1 / (1 + a·d^2b)` curve.

use atacama_core::{AtacamaError, Result, Summarizable, Xorshift64};
use tracing::debug;

use crate::distance::DistanceMetric;
use crate::knn::{knn_within, Neighbor};
use crate::reduction::{pca, PcaConfig};

// ---------------------------------------------------------------------------
// Config & Result types
// ---------------------------------------------------------------------------

/// Initialization strategy for the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UmapInit {
    /// Uniform random coordinates in `[-10, 10)`.
    Random,
    /// Leading principal components rescaled to `[-10, 10]`.
    Pca,
}

/// Configuration for UMAP.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct UmapConfig {
    /// Number of output dimensions.
    pub n_components: usize,
    /// Neighborhood size of the fuzzy graph.
    pub n_neighbors: usize,
    /// Minimum distance between points in the layout.
    pub min_dist: f64,
    /// Effective scale of embedded points.
    pub spread: f64,
    pub learning_rate: f64,
    pub n_epochs: usize,
    /// Negative samples per positive edge update.
    pub negative_sample_rate: usize,
    pub metric: DistanceMetric,
    pub init: UmapInit,
    pub seed: u64,
}

impl Default for UmapConfig {
    fn default() -> Self {
        Self {
            n_components: 2,
            n_neighbors: 30,
            min_dist: 0.3,
            spread: 1.0,
            learning_rate: 1.0,
            n_epochs: 200,
            negative_sample_rate: 5,
            metric: DistanceMetric::Cosine,
            init: UmapInit::Pca,
            seed: 42,
        }
    }
}

/// Result of a UMAP run.
#[derive(Debug, Clone)]
pub struct UmapResult {
    /// Layout coordinates, row-major: `n_samples × n_components`.
    pub embedding: Vec<f64>,
    pub n_samples: usize,
    pub n_components: usize,
    pub n_epochs: usize,
}

impl Summarizable for UmapResult {
    fn summary(&self) -> String {
        format!(
            "UMAP: {} samples in {}D, {} epochs",
            self.n_samples, self.n_components, self.n_epochs,
        )
    }
}

/// Undirected edge of the fuzzy graph.
#[derive(Debug, Clone)]
struct Edge {
    i: usize,
    j: usize,
    weight: f64,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run UMAP on a flat row-major matrix of shape `n_samples × n_features`.
///
/// `n_neighbors` larger than `n_samples - 1` is clamped. Identical input
/// and seed give bit-identical output.
///
/// # Errors
///
/// Empty data, a length not divisible by `n_features`, fewer than three
/// samples, `n_neighbors < 2`, or `n_components == 0`.
pub fn umap(data: &[f64], n_features: usize, config: &UmapConfig) -> Result<UmapResult> {
    if data.is_empty() {
        return Err(AtacamaError::InvalidInput("empty data".into()));
    }
    if n_features == 0 {
        return Err(AtacamaError::InvalidInput("n_features must be > 0".into()));
    }
    if data.len() % n_features != 0 {
        return Err(AtacamaError::shape_mismatch(
            "umap input",
            format!("a multiple of {n_features} values"),
            data.len(),
        ));
    }
    let n_samples = data.len() / n_features;
    if n_samples < 3 {
        return Err(AtacamaError::InvalidInput("need at least 3 samples".into()));
    }
    if config.n_neighbors < 2 {
        return Err(AtacamaError::InvalidInput("n_neighbors must be >= 2".into()));
    }
    if config.n_components == 0 {
        return Err(AtacamaError::InvalidInput("n_components must be > 0".into()));
    }
    let k = config.n_neighbors.min(n_samples - 1);

    let rows: Vec<&[f64]> = data.chunks_exact(n_features).collect();
    let neighbors = knn_within(&rows, k, config.metric)?;
    let (rhos, sigmas) = smooth_knn_distances(&neighbors, k);
    let edges = fuzzy_union(&neighbors, &rhos, &sigmas, n_samples);
    let (a, b) = fit_ab_params(config.min_dist, config.spread);
    debug!(n_samples, k, edges = edges.len(), a, b, "umap graph built");

    let mut embedding = initialize_embedding(data, n_features, n_samples, config)?;
    optimize_embedding(&mut embedding, &edges, n_samples, a, b, config);

    Ok(UmapResult {
        embedding,
        n_samples,
        n_components: config.n_components,
        n_epochs: config.n_epochs,
    })
}

// ---------------------------------------------------------------------------
// Fuzzy simplicial set
// ---------------------------------------------------------------------------

/// Per-point `(rho, sigma)`: `rho` is the distance to the nearest neighbor,
/// and `sigma` is found by bisection so that
/// `Σ exp(-(d - rho) / sigma) = log2(k)`.
pub fn smooth_knn_distances(neighbors: &[Vec<Neighbor>], k: usize) -> (Vec<f64>, Vec<f64>) {
    let target = (k as f64).log2().max(1e-3);
    let mut rhos = Vec::with_capacity(neighbors.len());
    let mut sigmas = Vec::with_capacity(neighbors.len());

    for list in neighbors {
        let rho = list
            .iter()
            .map(|&(_, d)| d)
            .find(|&d| d > 0.0)
            .unwrap_or(0.0);
        let mut lo = 0.0_f64;
        let mut hi = f64::INFINITY;
        let mut sigma = 1.0_f64;

        for _ in 0..64 {
            let psum: f64 = list
                .iter()
                .map(|&(_, d)| (-(d - rho).max(0.0) / sigma).exp())
                .sum();
            if (psum - target).abs() < 1e-5 {
                break;
            }
            if psum > target {
                hi = sigma;
                sigma = (lo + hi) / 2.0;
            } else {
                lo = sigma;
                sigma = if hi.is_infinite() { sigma * 2.0 } else { (lo + hi) / 2.0 };
            }
        }

        let mean_d = list.iter().map(|&(_, d)| d).sum::<f64>() / list.len().max(1) as f64;
        rhos.push(rho);
        sigmas.push(sigma.max(1e-3 * mean_d).max(1e-12));
    }
    (rhos, sigmas)
}

/// Directed membership strengths combined by fuzzy union
/// `w = w_ij + w_ji − w_ij·w_ji`.
fn fuzzy_union(
    neighbors: &[Vec<Neighbor>],
    rhos: &[f64],
    sigmas: &[f64],
    n_samples: usize,
) -> Vec<Edge> {
    use std::collections::BTreeMap;

    let mut pairs: BTreeMap<(usize, usize), (f64, f64)> = BTreeMap::new();
    for i in 0..n_samples {
        for &(j, d) in &neighbors[i] {
            let w = (-(d - rhos[i]).max(0.0) / sigmas[i]).exp();
            if i < j {
                pairs.entry((i, j)).or_insert((0.0, 0.0)).0 = w;
            } else {
                pairs.entry((j, i)).or_insert((0.0, 0.0)).1 = w;
            }
        }
    }

    pairs
        .into_iter()
        .map(|((i, j), (w_ij, w_ji))| Edge {
            i,
            j,
            weight: w_ij + w_ji - w_ij * w_ji,
        })
        .filter(|e| e.weight > 0.0)
        .collect()
}

// ---------------------------------------------------------------------------
// Low-dimensional curve
// ---------------------------------------------------------------------------

/// Fit `a`, `b` of `1 / (1 + a·d^(2b))` to the target membership curve
/// (1 below `min_dist`, exponential decay beyond) by Gauss-Newton.
fn fit_ab_params(min_dist: f64, spread: f64) -> (f64, f64) {
    if (min_dist - 0.1).abs() < 1e-10 && (spread - 1.0).abs() < 1e-10 {
        return (1.929, 0.7915);
    }

    let n_points = 300;
    let max_d = 3.0 * spread;
    let mut a = 1.0_f64;
    let mut b = 1.0_f64;

    for _ in 0..100 {
        let (mut jj00, mut jj01, mut jj11, mut jr0, mut jr1) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for p in 0..n_points {
            let d = (p as f64 + 0.5) * max_d / n_points as f64;
            let target = if d <= min_dist {
                1.0
            } else {
                (-(d - min_dist) / spread).exp()
            };
            let d2b = d.powf(2.0 * b);
            let denom = 1.0 + a * d2b;
            let residual = 1.0 / denom - target;
            let da = -d2b / (denom * denom);
            let db = -a * d2b * 2.0 * d.ln() / (denom * denom);
            jj00 += da * da;
            jj01 += da * db;
            jj11 += db * db;
            jr0 += da * residual;
            jr1 += db * residual;
        }

        let det = jj00 * jj11 - jj01 * jj01;
        if det.abs() < 1e-20 {
            break;
        }
        let step_a = -(jj11 * jr0 - jj01 * jr1) / det;
        let step_b = -(jj00 * jr1 - jj01 * jr0) / det;
        a = (a + step_a).max(1e-3);
        b = (b + step_b).max(1e-3);
        if step_a.abs() < 1e-8 && step_b.abs() < 1e-8 {
            break;
        }
    }
    (a, b)
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

fn initialize_embedding(
    data: &[f64],
    n_features: usize,
    n_samples: usize,
    config: &UmapConfig,
) -> Result<Vec<f64>> {
    let dim = config.n_components;
    let mut rng = Xorshift64::new(config.seed);
    let mut embedding = vec![0.0; n_samples * dim];

    match config.init {
        UmapInit::Random => {
            for v in embedding.iter_mut() {
                *v = rng.next_f64() * 20.0 - 10.0;
            }
        }
        UmapInit::Pca => {
            let fitted = pca(data, n_features, &PcaConfig { n_components: dim })?;
            let pc = fitted.n_components;
            for i in 0..n_samples {
                for d in 0..dim {
                    embedding[i * dim + d] = if d < pc {
                        fitted.transformed[i * pc + d]
                    } else {
                        rng.next_f64() * 0.01 - 0.005
                    };
                }
            }
            let max_abs = embedding.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            if max_abs > 0.0 {
                let scale = 10.0 / max_abs;
                embedding.iter_mut().for_each(|v| *v *= scale);
            }
            // Tiny jitter separates duplicate points.
            for v in embedding.iter_mut() {
                *v += rng.next_f64() * 1e-4 - 5e-5;
            }
        }
    }
    Ok(embedding)
}

fn optimize_embedding(
    embedding: &mut [f64],
    edges: &[Edge],
    n_samples: usize,
    a: f64,
    b: f64,
    config: &UmapConfig,
) {
    let n_epochs = config.n_epochs;
    let dim = config.n_components;
    let max_weight = edges.iter().fold(0.0_f64, |m, e| m.max(e.weight));
    if edges.is_empty() || n_epochs == 0 || max_weight <= 0.0 {
        return;
    }

    let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_weight / e.weight).collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut rng = Xorshift64::new(config.seed ^ 0x5DEE_CE66);
    let clip = 4.0;

    for epoch in 0..n_epochs {
        let lr = config.learning_rate * (1.0 - epoch as f64 / n_epochs as f64);

        for (e, edge) in edges.iter().enumerate() {
            if next_sample[e] > (epoch + 1) as f64 {
                continue;
            }
            let (i, j) = (edge.i, edge.j);

            let dist_sq = squared_distance(embedding, i, j, dim).max(1e-10);
            let coeff = -2.0 * a * b * dist_sq.powf(b - 1.0) / (1.0 + a * dist_sq.powf(b));
            for d in 0..dim {
                let diff = embedding[i * dim + d] - embedding[j * dim + d];
                let g = (coeff * diff).clamp(-clip, clip);
                embedding[i * dim + d] += lr * g;
                embedding[j * dim + d] -= lr * g;
            }

            for _ in 0..config.negative_sample_rate {
                let neg = rng.next_bounded(n_samples);
                if neg == i {
                    continue;
                }
                let dist_sq = squared_distance(embedding, i, neg, dim).max(1e-10);
                let coeff = 2.0 * b / ((0.001 + dist_sq) * (1.0 + a * dist_sq.powf(b)));
                for d in 0..dim {
                    let diff = embedding[i * dim + d] - embedding[neg * dim + d];
                    let g = (coeff * diff).clamp(-clip, clip);
                    embedding[i * dim + d] += lr * g;
                }
            }

            next_sample[e] += epochs_per_sample[e];
        }
    }
}

fn squared_distance(embedding: &[f64], i: usize, j: usize, dim: usize) -> f64 {
    (0..dim)
        .map(|d| {
            let diff = embedding[i * dim + d] - embedding[j * dim + d];
            diff * diff
        })
        .sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
