//! Cluster evaluation metrics.
//!
//! Silhouette widths over a precomputed distance matrix, plus partition
//! agreement scores (adjusted Rand index, normalized mutual information).

use std::collections::BTreeMap;

use atacama_core::{AtacamaError, Result};

use crate::distance::DistanceMatrix;

/// Silhouette width of every sample given a precomputed distance matrix.
///
/// For sample `i`, `a(i)` is the mean distance to the other members of its
/// cluster and `b(i)` the smallest mean distance to any other cluster.
/// The width is `(b − a) / max(a, b)`, and 0 for members of singleton
/// clusters or when `max(a, b)` is 0.
///
/// # Errors
///
/// [`AtacamaError::InsufficientClusters`] when fewer than two distinct
/// labels are present.
pub fn silhouette_samples(distances: &DistanceMatrix, labels: &[usize]) -> Result<Vec<f64>> {
    let n = distances.n();
    if labels.len() != n {
        return Err(AtacamaError::shape_mismatch(
            "silhouette labels",
            n,
            labels.len(),
        ));
    }

    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &l) in labels.iter().enumerate() {
        members.entry(l).or_default().push(i);
    }
    if members.len() < 2 {
        return Err(AtacamaError::InsufficientClusters {
            found: members.len(),
            required: 2,
        });
    }

    let width = |i: usize| -> f64 {
        let own = &members[&labels[i]];
        if own.len() < 2 {
            return 0.0;
        }
        let a = own
            .iter()
            .filter(|&&j| j != i)
            .map(|&j| distances.get(i, j))
            .sum::<f64>()
            / (own.len() - 1) as f64;
        let b = members
            .iter()
            .filter(|(&l, _)| l != labels[i])
            .map(|(_, idx)| idx.iter().map(|&j| distances.get(i, j)).sum::<f64>() / idx.len() as f64)
            .fold(f64::INFINITY, f64::min);
        let max_ab = a.max(b);
        if max_ab == 0.0 {
            0.0
        } else {
            ((b - a) / max_ab).clamp(-1.0, 1.0)
        }
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        Ok((0..n).into_par_iter().map(width).collect())
    }
    #[cfg(not(feature = "parallel"))]
    {
        Ok((0..n).map(width).collect())
    }
}

/// Contingency table between two labelings, plus row and column totals.
fn contingency(a: &[usize], b: &[usize]) -> Result<(Vec<Vec<u64>>, Vec<u64>, Vec<u64>)> {
    if a.len() != b.len() {
        return Err(AtacamaError::shape_mismatch("partition comparison", a.len(), b.len()));
    }
    let index = |labels: &[usize]| -> BTreeMap<usize, usize> {
        let mut map = BTreeMap::new();
        for &l in labels {
            let next = map.len();
            map.entry(l).or_insert(next);
        }
        map
    };
    let ia = index(a);
    let ib = index(b);
    let mut table = vec![vec![0u64; ib.len()]; ia.len()];
    for (x, y) in a.iter().zip(b) {
        table[ia[x]][ib[y]] += 1;
    }
    let rows = table.iter().map(|r| r.iter().sum()).collect();
    let cols = (0..ib.len()).map(|j| table.iter().map(|r| r[j]).sum()).collect();
    Ok((table, rows, cols))
}

/// Normalized mutual information between two partitions (arithmetic-mean
/// normalization), in `[0, 1]`. Label values need not be contiguous.
pub fn nmi(a: &[usize], b: &[usize]) -> Result<f64> {
    let n = a.len();
    let (table, rows, cols) = contingency(a, b)?;
    if n == 0 {
        return Ok(0.0);
    }
    let nf = n as f64;

    let mut mi = 0.0;
    for (i, row) in table.iter().enumerate() {
        for (j, &nij) in row.iter().enumerate() {
            if nij > 0 {
                let nij = nij as f64;
                mi += nij / nf * (nf * nij / (rows[i] as f64 * cols[j] as f64)).ln();
            }
        }
    }
    let entropy = |sums: &[u64]| -> f64 {
        sums.iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / nf;
                -p * p.ln()
            })
            .sum()
    };
    let h_a = entropy(&rows);
    let h_b = entropy(&cols);
    if h_a == 0.0 && h_b == 0.0 {
        return Ok(1.0);
    }
    let denom = ((h_a + h_b) / 2.0).max(1e-15);
    Ok((mi / denom).clamp(0.0, 1.0))
}

/// Adjusted Rand index between two partitions. 1 means identical up to
/// relabeling; values near 0 mean chance agreement.
pub fn adjusted_rand_index(a: &[usize], b: &[usize]) -> Result<f64> {
    let n = a.len();
    let (table, rows, cols) = contingency(a, b)?;
    if n < 2 {
        return Ok(0.0);
    }

    let c2 = |x: u64| -> f64 { (x * x.saturating_sub(1) / 2) as f64 };
    let sum_comb: f64 = table.iter().flatten().map(|&x| c2(x)).sum();
    let sum_a: f64 = rows.iter().map(|&x| c2(x)).sum();
    let sum_b: f64 = cols.iter().map(|&x| c2(x)).sum();
    let comb_n = c2(n as u64);

    let expected = sum_a * sum_b / comb_n;
    let max_index = (sum_a + sum_b) / 2.0;
    let denom = max_index - expected;
    if denom.abs() < 1e-15 {
        // Both partitions trivial (all-in-one or all-singletons).
        return Ok(if sum_comb == expected { 1.0 } else { 0.0 });
    }
    Ok((sum_comb - expected) / denom)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::distance::DistanceMetric;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn silhouette_widths_are_bounded(
            points in prop::collection::vec(prop::collection::vec(-50.0f64..50.0, 3), 4..20),
            seed in any::<u64>(),
        ) {
            let n = points.len();
            let mut labels: Vec<usize> = (0..n).map(|i| ((seed >> (i % 60)) & 1) as usize).collect();
            labels[0] = 0;
            labels[1] = 1;
            let refs: Vec<&[f64]> = points.iter().map(|p| p.as_slice()).collect();
            let dm = DistanceMatrix::from_points(&refs, DistanceMetric::Euclidean).unwrap();
            let widths = silhouette_samples(&dm, &labels).unwrap();
            prop_assert_eq!(widths.len(), n);
            for w in widths {
                prop_assert!((-1.0..=1.0).contains(&w));
            }
        }
    }
}
