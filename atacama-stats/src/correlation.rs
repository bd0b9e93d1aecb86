//! Correlation analysis.
//!
//! Provides the Pearson correlation coefficient and a [`CorrelationMatrix`]
//! for pairwise analysis of many variables (e.g. cells over latent
//! dimensions).

use atacama_core::{AtacamaError, Result, Summarizable};

/// Pearson product-moment correlation coefficient between `x` and `y`.
///
/// Returns 0.0 if either series is constant (zero variance).
pub fn pearson(x: &[f64], y: &[f64]) -> Result<f64> {
    validate_paired(x, y)?;

    let n = x.len() as f64;
    let mean_x: f64 = x.iter().sum::<f64>() / n;
    let mean_y: f64 = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        return Ok(0.0);
    }
    Ok((cov / denom).clamp(-1.0, 1.0))
}

fn validate_paired(x: &[f64], y: &[f64]) -> Result<()> {
    if x.len() != y.len() {
        return Err(AtacamaError::shape_mismatch(
            "correlation",
            format!("{} paired observations", x.len()),
            y.len(),
        ));
    }
    if x.len() < 2 {
        return Err(AtacamaError::InvalidInput(
            "correlation: need at least 2 observations".into(),
        ));
    }
    Ok(())
}

// ── Correlation matrix ─────────────────────────────────────────────────────

/// Pairwise Pearson correlation matrix for a set of variables.
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    /// Flat storage (row-major, n×n).
    data: Vec<f64>,
    /// Number of variables.
    size: usize,
}

impl CorrelationMatrix {
    /// Build a correlation matrix from rows of observations.
    ///
    /// Each inner slice is one variable's observations (all must have the same
    /// length and at least 2 elements).
    pub fn from_rows(rows: &[&[f64]]) -> Result<Self> {
        if rows.is_empty() {
            return Err(AtacamaError::InvalidInput(
                "CorrelationMatrix: need at least one variable".into(),
            ));
        }
        let obs_len = rows[0].len();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != obs_len {
                return Err(AtacamaError::shape_mismatch(
                    format!("CorrelationMatrix row {i}"),
                    format!("{obs_len} observations"),
                    row.len(),
                ));
            }
        }
        if obs_len < 2 {
            return Err(AtacamaError::InvalidInput(
                "CorrelationMatrix: need at least 2 observations per variable".into(),
            ));
        }

        let n = rows.len();
        #[cfg(feature = "parallel")]
        let upper: Vec<Vec<f64>> = {
            use rayon::prelude::*;
            (0..n)
                .into_par_iter()
                .map(|i| {
                    ((i + 1)..n)
                        .map(|j| pearson(rows[i], rows[j]))
                        .collect::<Result<Vec<f64>>>()
                })
                .collect::<Result<Vec<_>>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let upper: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                ((i + 1)..n)
                    .map(|j| pearson(rows[i], rows[j]))
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
            for (offset, &r) in upper[i].iter().enumerate() {
                let j = i + 1 + offset;
                data[i * n + j] = r;
                data[j * n + i] = r;
            }
        }

        Ok(Self { data, size: n })
    }

    /// Get the correlation between variable `i` and variable `j`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.size + j]
    }

    /// Number of variables.
    pub fn n(&self) -> usize {
        self.size
    }
}

impl Summarizable for CorrelationMatrix {
    fn summary(&self) -> String {
        format!("CorrelationMatrix: {}x{}", self.size, self.size)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-10;

    #[test]
    fn pearson_perfect_positive() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        assert!((pearson(&x, &y).unwrap() - 1.0).abs() < TOL);
    }

    #[test]
    fn pearson_perfect_negative() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [10.0, 8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&x, &y).unwrap() - (-1.0)).abs() < TOL);
    }

    #[test]
    fn pearson_zero_correlation() {
        let x = [1.0, 0.0, -1.0, 0.0];
        let y = [0.0, 1.0, 0.0, -1.0];
        assert!((pearson(&x, &y).unwrap()).abs() < TOL);
    }

    #[test]
    fn pearson_constant_series() {
        let x = [3.0, 3.0, 3.0];
        let y = [1.0, 2.0, 3.0];
        assert_eq!(pearson(&x, &y).unwrap(), 0.0);
    }

    #[test]
    fn pearson_length_mismatch() {
        assert!(matches!(
            pearson(&[1.0, 2.0], &[1.0]),
            Err(AtacamaError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn pearson_too_short() {
        assert!(pearson(&[1.0], &[2.0]).is_err());
    }

    #[test]
    fn correlation_matrix_diagonal_and_symmetry() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [4.0, 3.0, 2.0, 1.0];
        let c = [1.0, 3.0, 2.0, 4.0];
        let cm = CorrelationMatrix::from_rows(&[&a[..], &b[..], &c[..]]).unwrap();
        assert_eq!(cm.n(), 3);
        for i in 0..3 {
            assert!((cm.get(i, i) - 1.0).abs() < TOL);
            for j in 0..3 {
                assert!((cm.get(i, j) - cm.get(j, i)).abs() < TOL);
            }
        }
        assert!((cm.get(0, 1) + 1.0).abs() < TOL);
    }

    #[test]
    fn correlation_matrix_ragged_rows() {
        let a = [1.0, 2.0, 3.0];
        let b = [1.0, 2.0];
        assert!(CorrelationMatrix::from_rows(&[&a[..], &b[..]]).is_err());
    }

    #[test]
    fn correlation_matrix_summary() {
        let a = [1.0, 2.0];
        let b = [2.0, 1.0];
        let cm = CorrelationMatrix::from_rows(&[&a[..], &b[..]]).unwrap();
        assert_eq!(cm.summary(), "CorrelationMatrix: 2x2");
    }
}
