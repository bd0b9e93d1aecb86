//! Exact (brute-force) k-nearest-neighbor search.
//!
//! Neighbor lists are sorted by ascending distance; equal distances are
//! ordered by index so results never depend on scheduling.

use std::cmp::Ordering;

use atacama_core::{AtacamaError, Result};

use crate::distance::{compute_distance, DistanceMetric};

/// One entry of a neighbor list: `(index, distance)`.
pub type Neighbor = (usize, f64);

/// k nearest neighbors of every point among the other points of the same
/// set (self excluded). `k` is clamped to `n - 1`.
pub fn knn_within(
    points: &[&[f64]],
    k: usize,
    metric: DistanceMetric,
) -> Result<Vec<Vec<Neighbor>>> {
    let n = points.len();
    if n < 2 {
        return Err(AtacamaError::InvalidInput(
            "need at least 2 points for neighbor search".into(),
        ));
    }
    validate_dims(points, points[0].len(), "points")?;
    let k = k.min(n - 1);

    let search = |i: usize| -> Result<Vec<Neighbor>> {
        let mut dists: Vec<Neighbor> = Vec::with_capacity(n - 1);
        for j in 0..n {
            if j == i {
                continue;
            }
            dists.push((j, compute_distance(points[i], points[j], metric)?));
        }
        Ok(take_nearest(dists, k))
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        (0..n).into_par_iter().map(search).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        (0..n).map(search).collect()
    }
}

/// k nearest `targets` of every point in `queries`. `k` is clamped to the
/// number of targets.
pub fn knn_across(
    queries: &[&[f64]],
    targets: &[&[f64]],
    k: usize,
    metric: DistanceMetric,
) -> Result<Vec<Vec<Neighbor>>> {
    if queries.is_empty() || targets.is_empty() {
        return Err(AtacamaError::InvalidInput(
            "neighbor search needs non-empty query and target sets".into(),
        ));
    }
    let dim = targets[0].len();
    validate_dims(targets, dim, "targets")?;
    validate_dims(queries, dim, "queries")?;
    let k = k.min(targets.len());

    let search = |q: &[f64]| -> Result<Vec<Neighbor>> {
        let dists = targets
            .iter()
            .enumerate()
            .map(|(j, t)| Ok((j, compute_distance(q, t, metric)?)))
            .collect::<Result<Vec<Neighbor>>>()?;
        Ok(take_nearest(dists, k))
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        queries.par_iter().map(|q| search(q)).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        queries.iter().map(|q| search(q)).collect()
    }
}

fn take_nearest(mut dists: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    dists.sort_by(|a, b| match a.1.total_cmp(&b.1) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    dists.truncate(k);
    dists
}

fn validate_dims(points: &[&[f64]], dim: usize, what: &str) -> Result<()> {
    if dim == 0 {
        return Err(AtacamaError::InvalidInput(format!("{what}: empty vectors")));
    }
    for (i, p) in points.iter().enumerate() {
        if p.len() != dim {
            return Err(AtacamaError::shape_mismatch(
                format!("{what} row {i}"),
                format!("{dim} dimensions"),
                p.len(),
            ));
        }
    }
    Ok(())
}
