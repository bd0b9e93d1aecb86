//! Distance metrics and pairwise distance matrices.

use atacama_core::{AtacamaError, Result, Summarizable};
use atacama_stats::pearson;

/// Supported distance metrics for neighbor search and evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DistanceMetric {
    Euclidean,
    Manhattan,
    Cosine,
    /// `1 - pearson(a, b)`; needs vectors of length ≥ 2.
    Correlation,
}

/// Euclidean (L2) distance between two vectors.
pub fn euclidean(a: &[f64], b: &[f64]) -> Result<f64> {
    validate_pair(a, b)?;
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    Ok(sum.sqrt())
}

/// Manhattan (L1) distance between two vectors.
pub fn manhattan(a: &[f64], b: &[f64]) -> Result<f64> {
    validate_pair(a, b)?;
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
    Ok(sum)
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 if either vector is the zero vector.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64> {
    validate_pair(a, b)?;
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / denom)
}

/// Cosine distance: `1.0 - cosine_similarity(a, b)`.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> Result<f64> {
    Ok(1.0 - cosine_similarity(a, b)?)
}

/// Correlation distance: `1.0 - pearson(a, b)`, in `[0, 2]`.
pub fn correlation_distance(a: &[f64], b: &[f64]) -> Result<f64> {
    validate_pair(a, b)?;
    Ok(1.0 - pearson(a, b)?)
}

/// Compute distance between two vectors using the given metric.
pub fn compute_distance(a: &[f64], b: &[f64], metric: DistanceMetric) -> Result<f64> {
    match metric {
        DistanceMetric::Euclidean => euclidean(a, b),
        DistanceMetric::Manhattan => manhattan(a, b),
        DistanceMetric::Cosine => cosine_distance(a, b),
        DistanceMetric::Correlation => correlation_distance(a, b),
    }
}

/// Symmetric distance matrix stored in condensed upper-triangle form.
///
/// For `n` points the condensed vector has `n*(n-1)/2` elements. The
/// diagonal is implicitly zero.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistanceMatrix {
    condensed: Vec<f64>,
    n: usize,
}

impl DistanceMatrix {
    /// Build a distance matrix from row-vectors of points.
    pub fn from_points(data: &[&[f64]], metric: DistanceMetric) -> Result<Self> {
        let n = data.len();
        if n < 2 {
            return Err(AtacamaError::InvalidInput(
                "need at least 2 points".into(),
            ));
        }
        let dim = data[0].len();
        if dim == 0 {
            return Err(AtacamaError::InvalidInput("empty vectors".into()));
        }
        for (i, row) in data.iter().enumerate() {
            if row.len() != dim {
                return Err(AtacamaError::shape_mismatch(
                    format!("point {i}"),
                    format!("{dim} dimensions"),
                    row.len(),
                ));
            }
        }
        #[cfg(feature = "parallel")]
        let condensed = {
            use rayon::prelude::*;
            (0..n)
                .into_par_iter()
                .map(|i| {
                    ((i + 1)..n)
                        .map(|j| compute_distance(data[i], data[j], metric))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect::<Vec<f64>>()
        };
        #[cfg(not(feature = "parallel"))]
        let condensed = {
            let size = n * (n - 1) / 2;
            let mut condensed = Vec::with_capacity(size);
            for i in 0..n {
                for j in (i + 1)..n {
                    condensed.push(compute_distance(data[i], data[j], metric)?);
                }
            }
            condensed
        };
        Ok(Self { condensed, n })
    }

    /// Create from a pre-computed condensed distance vector.
    pub fn from_condensed(condensed: Vec<f64>, n: usize) -> Result<Self> {
        let expected = n * n.saturating_sub(1) / 2;
        if condensed.len() != expected {
            return Err(AtacamaError::shape_mismatch(
                format!("condensed distances for n={n}"),
                expected,
                condensed.len(),
            ));
        }
        Ok(Self { condensed, n })
    }

    /// Create from a full square matrix. Only the upper triangle is read;
    /// the diagonal must be zero.
    pub fn from_square(square: &[Vec<f64>]) -> Result<Self> {
        let n = square.len();
        let mut condensed = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for (i, row) in square.iter().enumerate() {
            if row.len() != n {
                return Err(AtacamaError::shape_mismatch(
                    format!("distance matrix row {i}"),
                    n,
                    row.len(),
                ));
            }
            if row[i] != 0.0 {
                return Err(AtacamaError::InvalidInput(format!(
                    "distance matrix diagonal ({i}, {i}) is {}, expected 0",
                    row[i]
                )));
            }
            condensed.extend_from_slice(&row[i + 1..]);
        }
        Ok(Self { condensed, n })
    }

    /// Get the distance between points `i` and `j`.
    ///
    /// Returns 0.0 when `i == j`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 0.0;
        }
        let (a, b) = if i < j { (i, j) } else { (j, i) };
        self.condensed[self.index(a, b)]
    }

    /// Number of points.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Access the raw condensed storage.
    pub fn condensed(&self) -> &[f64] {
        &self.condensed
    }

    /// Map (i, j) where i < j to condensed index.
    fn index(&self, i: usize, j: usize) -> usize {
        // row i starts at position: i*n - i*(i+1)/2
        i * self.n - i * (i + 1) / 2 + (j - i - 1)
    }
}

impl Summarizable for DistanceMatrix {
    fn summary(&self) -> String {
        format!("DistanceMatrix: {}x{}", self.n, self.n)
    }
}

fn validate_pair(a: &[f64], b: &[f64]) -> Result<()> {
    if a.is_empty() {
        return Err(AtacamaError::InvalidInput("empty vectors".into()));
    }
    if a.len() != b.len() {
        return Err(AtacamaError::shape_mismatch(
            "distance",
            a.len(),
            b.len(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_known() {
        let d = euclidean(&[0.0, 0.0], &[3.0, 4.0]).unwrap();
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn euclidean_empty_error() {
        assert!(euclidean(&[], &[]).is_err());
    }

    #[test]
    fn euclidean_length_mismatch() {
        assert!(euclidean(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn manhattan_known() {
        let d = manhattan(&[0.0, 0.0], &[3.0, 4.0]).unwrap();
        assert!((d - 7.0).abs() < 1e-12);
    }

    #[test]
    fn cosine_orthogonal_and_parallel() {
        let d = cosine_distance(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!((d - 1.0).abs() < 1e-12);
        let d = cosine_distance(&[1.0, 2.0], &[2.0, 4.0]).unwrap();
        assert!(d.abs() < 1e-12);
    }

    #[test]
    fn cosine_zero_vector() {
        let s = cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).unwrap();
        assert_eq!(s, 0.0);
    }

    #[test]
    fn correlation_distance_range() {
        let d = correlation_distance(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap();
        assert!(d.abs() < 1e-12);
        let d = correlation_distance(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap();
        assert!((d - 2.0).abs() < 1e-12);
    }

    #[test]
    fn distance_matrix_from_points() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        let c = [6.0, 8.0];
        let dm = DistanceMatrix::from_points(&[&a, &b, &c], DistanceMetric::Euclidean).unwrap();
        assert_eq!(dm.n(), 3);
        assert_eq!(dm.condensed().len(), 3);
        assert!((dm.get(0, 1) - 5.0).abs() < 1e-12);
        assert!((dm.get(2, 0) - 10.0).abs() < 1e-12);
        assert_eq!(dm.get(1, 1), 0.0);
    }

    #[test]
    fn square_roundtrip_keeps_zero_diagonal() {
        let square = vec![
            vec![0.0, 1.0, 2.0],
            vec![1.0, 0.0, 3.0],
            vec![2.0, 3.0, 0.0],
        ];
        let dm = DistanceMatrix::from_square(&square).unwrap();
        for (i, row) in square.iter().enumerate() {
            for (j, &d) in row.iter().enumerate() {
                assert_eq!(dm.get(i, j), d);
            }
        }
    }

    #[test]
    fn square_rejects_nonzero_diagonal() {
        let square = vec![vec![0.5, 1.0], vec![1.0, 0.0]];
        assert!(DistanceMatrix::from_square(&square).is_err());
    }

    #[test]
    fn from_condensed_validates_length() {
        assert!(DistanceMatrix::from_condensed(vec![1.0, 2.0], 3).is_err());
        assert!(DistanceMatrix::from_condensed(vec![1.0, 2.0, 3.0], 3).is_ok());
    }

    #[test]
    fn summary() {
        let dm = DistanceMatrix::from_condensed(vec![1.0], 2).unwrap();
        assert_eq!(dm.summary(), "DistanceMatrix: 2x2");
    }
}
