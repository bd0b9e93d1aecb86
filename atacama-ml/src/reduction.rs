//! Principal component analysis.
//!
//! PCA is computed from the exact eigendecomposition of the covariance
//! matrix ([`crate::linalg::symmetric_eigen`]). It seeds the UMAP layout and
//! is available for dense latent spaces in general.

use atacama_core::{AtacamaError, Result, Summarizable};

use crate::linalg::symmetric_eigen;

/// Configuration for PCA.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PcaConfig {
    /// Number of principal components to compute.
    pub n_components: usize,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self { n_components: 2 }
    }
}

/// Result of PCA computation.
#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Principal axes, row-major: `n_components × n_features`.
    pub components: Vec<f64>,
    /// Covariance eigenvalues for each component.
    pub explained_variance: Vec<f64>,
    /// Fraction of total variance explained by each component.
    pub explained_variance_ratio: Vec<f64>,
    /// Projected data, row-major: `n_samples × n_components`.
    pub transformed: Vec<f64>,
    /// Per-feature mean of the input data.
    pub mean: Vec<f64>,
    pub n_features: usize,
    pub n_components: usize,
}

impl Summarizable for PcaResult {
    fn summary(&self) -> String {
        let total: f64 = self.explained_variance_ratio.iter().sum();
        format!(
            "PCA: {} components, {:.1}% variance explained",
            self.n_components,
            total * 100.0,
        )
    }
}

/// Run PCA on a flat row-major data matrix of shape `n_samples × n_features`.
///
/// `n_components` is clamped to `min(n_features, n_samples)`.
pub fn pca(data: &[f64], n_features: usize, config: &PcaConfig) -> Result<PcaResult> {
    if data.is_empty() {
        return Err(AtacamaError::InvalidInput("empty data".into()));
    }
    if n_features == 0 {
        return Err(AtacamaError::InvalidInput("n_features must be > 0".into()));
    }
    if data.len() % n_features != 0 {
        return Err(AtacamaError::InvalidInput(format!(
            "data length {} not divisible by n_features {}",
            data.len(),
            n_features
        )));
    }
    let n_samples = data.len() / n_features;
    if n_samples < 2 {
        return Err(AtacamaError::InvalidInput("need at least 2 samples".into()));
    }
    let n_components = config.n_components.min(n_features).min(n_samples);
    if n_components == 0 {
        return Err(AtacamaError::InvalidInput("n_components must be > 0".into()));
    }

    let mut mean = vec![0.0; n_features];
    for row in data.chunks_exact(n_features) {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    for m in mean.iter_mut() {
        *m /= n_samples as f64;
    }

    let centered: Vec<f64> = data
        .chunks_exact(n_features)
        .flat_map(|row| row.iter().zip(&mean).map(|(v, m)| v - m))
        .collect();

    // C = XᵀX / (n - 1)
    let mut cov = vec![0.0; n_features * n_features];
    for r in centered.chunks_exact(n_features) {
        for i in 0..n_features {
            if r[i] == 0.0 {
                continue;
            }
            for j in i..n_features {
                cov[i * n_features + j] += r[i] * r[j];
            }
        }
    }
    let scale = (n_samples - 1) as f64;
    for i in 0..n_features {
        for j in i..n_features {
            let v = cov[i * n_features + j] / scale;
            cov[i * n_features + j] = v;
            cov[j * n_features + i] = v;
        }
    }
    let trace: f64 = (0..n_features).map(|i| cov[i * n_features + i]).sum();

    let eig = symmetric_eigen(&cov, n_features)?;
    let mut components = Vec::with_capacity(n_components * n_features);
    let mut explained_variance = Vec::with_capacity(n_components);
    for c in 0..n_components {
        components.extend(eig.vector(c));
        explained_variance.push(eig.values[c].max(0.0));
    }
    let explained_variance_ratio = if trace > 0.0 {
        explained_variance.iter().map(|&ev| ev / trace).collect()
    } else {
        vec![0.0; n_components]
    };

    let mut transformed = vec![0.0; n_samples * n_components];
    for (row, r) in centered.chunks_exact(n_features).enumerate() {
        for comp in 0..n_components {
            let c = &components[comp * n_features..(comp + 1) * n_features];
            transformed[row * n_components + comp] = r.iter().zip(c).map(|(a, b)| a * b).sum();
        }
    }

    Ok(PcaResult {
        components,
        explained_variance,
        explained_variance_ratio,
        transformed,
        mean,
        n_features,
        n_components,
    })
}
