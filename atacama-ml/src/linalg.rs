//! Dense symmetric eigendecomposition and truncated SVD.
//!
//! [`symmetric_eigen`] is the cyclic Jacobi eigenvalue algorithm for small
//! dense symmetric matrices (feature covariances). [`svd_of`] never forms a
//! Gram matrix: it only multiplies by the operator and its transpose, so
//! sparse cell × peak matrices and implicit cross products are factorized
//! at their native size.

use atacama_core::{AtacamaError, Result, Xorshift64};
use tracing::debug;

/// Singular values below `RANK_RTOL * σ_max` count as zero.
pub const RANK_RTOL: f64 = 1e-9;

const MAX_SWEEPS: usize = 100;

/// Minimum number of extra sketch columns beyond the requested rank.
const MIN_OVERSAMPLE: usize = 10;
const MAX_POWER_ITERS: usize = 100;
/// Triplets are accepted once `‖A·v − σ·u‖ ≤ RESIDUAL_TOL · σ_max`.
const RESIDUAL_TOL: f64 = 1e-7;
const SKETCH_SEED: u64 = 0x5EED_5EED;
/// Relative off-diagonal size at which one-sided Jacobi stops rotating.
const ORTHO_TOL: f64 = 1e-13;

/// Eigendecomposition of a symmetric matrix.
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    /// Eigenvalues in descending order.
    pub values: Vec<f64>,
    /// Eigenvectors as columns of an n×n row-major matrix: column `k`
    /// belongs to `values[k]`.
    pub vectors: Vec<f64>,
    /// Matrix order.
    pub n: usize,
}

impl SymmetricEigen {
    /// Copy out eigenvector `k`.
    pub fn vector(&self, k: usize) -> Vec<f64> {
        (0..self.n).map(|i| self.vectors[i * self.n + k]).collect()
    }
}

/// Cyclic Jacobi eigendecomposition of a symmetric row-major n×n matrix.
///
/// Each eigenvector is sign-normalized so that its largest-magnitude entry
/// is positive, which makes the output independent of rotation order.
pub fn symmetric_eigen(matrix: &[f64], n: usize) -> Result<SymmetricEigen> {
    if n == 0 {
        return Err(AtacamaError::InvalidInput("empty matrix".into()));
    }
    if matrix.len() != n * n {
        return Err(AtacamaError::shape_mismatch(
            "symmetric_eigen",
            format!("{} entries", n * n),
            matrix.len(),
        ));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(AtacamaError::InvalidInput(
            "matrix contains non-finite values".into(),
        ));
    }
    let scale = matrix.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1.0);
    for i in 0..n {
        for j in (i + 1)..n {
            if (matrix[i * n + j] - matrix[j * n + i]).abs() > 1e-8 * scale {
                return Err(AtacamaError::InvalidInput(format!(
                    "matrix is not symmetric at ({i}, {j})"
                )));
            }
        }
    }

    let mut a = matrix.to_vec();
    let mut v = vec![0.0; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }

    let total: f64 = a.iter().map(|x| x * x).sum();
    let mut sweeps = 0;
    while sweeps < MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| a[i * n + j] * a[i * n + j])
            .sum();
        if off <= 1e-30 * total || off == 0.0 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                rotate(&mut a, &mut v, n, p, q);
            }
        }
        sweeps += 1;
    }
    debug!(n, sweeps, "jacobi eigendecomposition converged");

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| a[y * n + y].total_cmp(&a[x * n + x]).then(x.cmp(&y)));

    let values: Vec<f64> = order.iter().map(|&k| a[k * n + k]).collect();
    let mut vectors = vec![0.0; n * n];
    for (col, &k) in order.iter().enumerate() {
        let mut column: Vec<f64> = (0..n).map(|i| v[i * n + k]).collect();
        orient_sign(&mut column);
        for i in 0..n {
            vectors[i * n + col] = column[i];
        }
    }

    Ok(SymmetricEigen { values, vectors, n })
}

/// One Jacobi rotation zeroing `a[p][q]`.
fn rotate(a: &mut [f64], v: &mut [f64], n: usize, p: usize, q: usize) {
    let apq = a[p * n + q];
    if apq == 0.0 {
        return;
    }
    let app = a[p * n + p];
    let aqq = a[q * n + q];

    let theta = (aqq - app) / (2.0 * apq);
    let t = if theta.abs() > 1e150 {
        0.5 / theta
    } else {
        theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt())
    };
    let c = 1.0 / (t * t + 1.0).sqrt();
    let s = t * c;

    for r in 0..n {
        if r == p || r == q {
            continue;
        }
        let arp = a[r * n + p];
        let arq = a[r * n + q];
        let new_rp = c * arp - s * arq;
        let new_rq = s * arp + c * arq;
        a[r * n + p] = new_rp;
        a[p * n + r] = new_rp;
        a[r * n + q] = new_rq;
        a[q * n + r] = new_rq;
    }
    a[p * n + p] = app - t * apq;
    a[q * n + q] = aqq + t * apq;
    a[p * n + q] = 0.0;
    a[q * n + p] = 0.0;

    for r in 0..n {
        let vrp = v[r * n + p];
        let vrq = v[r * n + q];
        v[r * n + p] = c * vrp - s * vrq;
        v[r * n + q] = s * vrp + c * vrq;
    }
}

/// Flip `v` so that its largest-magnitude entry is positive.
///
/// Returns `true` if the vector was negated.
pub fn orient_sign(v: &mut [f64]) -> bool {
    let mut best = 0usize;
    for (i, x) in v.iter().enumerate() {
        if x.abs() > v[best].abs() {
            best = i;
        }
    }
    if v.get(best).is_some_and(|&x| x < 0.0) {
        for x in v.iter_mut() {
            *x = -*x;
        }
        true
    } else {
        false
    }
}

/// Number of singular values above `RANK_RTOL * max`.
fn numerical_rank(singular_values: &[f64]) -> usize {
    let max = singular_values.iter().fold(0.0_f64, |m, &s| m.max(s));
    if max <= 0.0 {
        return 0;
    }
    singular_values.iter().filter(|&&s| s > RANK_RTOL * max).count()
}

// ---------------------------------------------------------------------------
// Truncated SVD
// ---------------------------------------------------------------------------

/// Leading singular triplets of a matrix.
#[derive(Debug, Clone)]
pub struct Svd {
    /// Left singular vectors, row-major `n_rows × k`.
    pub u: Vec<f64>,
    /// Singular values, descending.
    pub singular_values: Vec<f64>,
    /// Right singular vectors, row-major `n_cols × k`.
    pub v: Vec<f64>,
    /// Numerical rank of the input, counted within the computed subspace
    /// of `min(k + max(k, 10), n_rows, n_cols)` directions.
    pub rank: usize,
    pub n_rows: usize,
    pub n_cols: usize,
    pub k: usize,
}

/// A real matrix known only through products with vectors.
pub trait LinearOperator {
    /// `(n_rows, n_cols)`.
    fn shape(&self) -> (usize, usize);

    /// `A·x` for `x` of length `n_cols`.
    fn apply(&self, x: &[f64]) -> Vec<f64>;

    /// `Aᵀ·y` for `y` of length `n_rows`.
    fn apply_transpose(&self, y: &[f64]) -> Vec<f64>;
}

/// Borrowed dense row-major matrix.
#[derive(Debug, Clone, Copy)]
pub struct DenseMatrix<'a> {
    data: &'a [f64],
    n_rows: usize,
    n_cols: usize,
}

impl<'a> DenseMatrix<'a> {
    pub fn new(data: &'a [f64], n_rows: usize, n_cols: usize) -> Result<Self> {
        if n_rows == 0 || n_cols == 0 {
            return Err(AtacamaError::InvalidInput("empty matrix".into()));
        }
        if data.len() != n_rows * n_cols {
            return Err(AtacamaError::shape_mismatch(
                "dense matrix",
                format!("{} entries", n_rows * n_cols),
                data.len(),
            ));
        }
        Ok(Self {
            data,
            n_rows,
            n_cols,
        })
    }

    fn row(&self, i: usize) -> &'a [f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }
}

impl LinearOperator for DenseMatrix<'_> {
    fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    fn apply(&self, x: &[f64]) -> Vec<f64> {
        (0..self.n_rows).map(|i| dot(self.row(i), x)).collect()
    }

    fn apply_transpose(&self, y: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_cols];
        for (i, &yi) in y.iter().enumerate().take(self.n_rows) {
            if yi == 0.0 {
                continue;
            }
            for (o, a) in out.iter_mut().zip(self.row(i)) {
                *o += a * yi;
            }
        }
        out
    }
}

/// Compute the top `k` singular triplets of a row-major `n_rows × n_cols`
/// matrix.
pub fn truncated_svd(data: &[f64], n_rows: usize, n_cols: usize, k: usize) -> Result<Svd> {
    svd_of(&DenseMatrix::new(data, n_rows, n_cols)?, k)
}

/// Top `k` singular triplets of any [`LinearOperator`].
///
/// Randomized subspace iteration: a seeded sketch `A·Ω` of
/// `k + max(k, 10)` columns is refined by power steps `A·Aᵀ` with
/// re-orthonormalization after every product. Each round ends with a
/// Rayleigh-Ritz step, where one-sided Jacobi factorizes `Aᵀ·Q` directly,
/// and iteration stops once every requested triplet satisfies
/// `‖A·v − σ·u‖ ≤ 1e-7 · σ_max`, or after 100 power steps. Triplets
/// inside a flat noise spectrum may stop at the cap; their span is still
/// the best found. When the sketch already spans the smaller dimension the
/// first round is exact.
/// Left singular vectors are sign-normalized (largest-magnitude entry
/// positive) and right singular vectors follow. The result is
/// deterministic.
///
/// # Errors
///
/// [`AtacamaError::RankDeficiency`] if `k` exceeds the numerical rank;
/// [`AtacamaError::InvalidInput`] for an empty matrix, `k == 0`, or
/// non-finite products.
pub fn svd_of<A: LinearOperator + ?Sized>(a: &A, k: usize) -> Result<Svd> {
    let (n_rows, n_cols) = a.shape();
    if n_rows == 0 || n_cols == 0 {
        return Err(AtacamaError::InvalidInput("empty matrix".into()));
    }
    if k == 0 {
        return Err(AtacamaError::InvalidInput("k must be > 0".into()));
    }

    let width = n_rows.min(n_cols);
    let l = (k + k.max(MIN_OVERSAMPLE)).min(width);
    let mut rng = Xorshift64::new(SKETCH_SEED);
    let mut q: Vec<Vec<f64>> = (0..l)
        .map(|_| a.apply(&random_vector(n_cols, &mut rng)))
        .collect();
    orthonormalize(&mut q, &mut rng);

    let mut iterations = 0;
    let ritz = loop {
        let w: Vec<Vec<f64>> = q.iter().map(|col| a.apply_transpose(col)).collect();
        if w.iter().flatten().any(|x| !x.is_finite()) {
            return Err(AtacamaError::InvalidInput(
                "matrix contains non-finite values".into(),
            ));
        }
        let ritz = rayleigh_ritz(&q, w.clone());
        if l == width || residuals_converged(a, &ritz, k) {
            break ritz;
        }
        if iterations == MAX_POWER_ITERS {
            debug!(n_rows, n_cols, k, iterations, "truncated svd reached the power step cap");
            break ritz;
        }
        let mut z = w;
        orthonormalize(&mut z, &mut rng);
        q = z.iter().map(|col| a.apply(col)).collect();
        orthonormalize(&mut q, &mut rng);
        iterations += 1;
    };

    let rank = numerical_rank(&ritz.sigma);
    debug!(n_rows, n_cols, k, rank, sketch = l, iterations, "truncated svd");
    if k > rank {
        return Err(AtacamaError::RankDeficiency { requested: k, rank });
    }

    let mut u = vec![0.0; n_rows * k];
    let mut v = vec![0.0; n_cols * k];
    let mut singular_values = Vec::with_capacity(k);
    for c in 0..k {
        let mut uc = ritz.u[c].clone();
        let mut vc = ritz.v[c].clone();
        if orient_sign(&mut uc) {
            vc.iter_mut().for_each(|x| *x = -*x);
        }
        for i in 0..n_rows {
            u[i * k + c] = uc[i];
        }
        for j in 0..n_cols {
            v[j * k + c] = vc[j];
        }
        singular_values.push(ritz.sigma[c]);
    }

    Ok(Svd {
        u,
        singular_values,
        v,
        rank,
        n_rows,
        n_cols,
        k,
    })
}

/// Singular triplets of `A` restricted to the span of `Q`, sorted by
/// decreasing singular value.
struct Ritz {
    u: Vec<Vec<f64>>,
    sigma: Vec<f64>,
    v: Vec<Vec<f64>>,
}

/// Factorize `W = Aᵀ·Q` by one-sided Jacobi: rotate column pairs of `W`
/// until they are orthogonal, tracking the rotations in `J`. Then
/// `A ≈ (Q·J)·Σ·Vᵀ` with `σ_c = ‖(W·J)_c‖`.
fn rayleigh_ritz(q: &[Vec<f64>], mut w: Vec<Vec<f64>>) -> Ritz {
    let l = w.len();
    let mut j: Vec<Vec<f64>> = (0..l)
        .map(|c| {
            let mut e = vec![0.0; l];
            e[c] = 1.0;
            e
        })
        .collect();

    for _ in 0..MAX_SWEEPS {
        let mut rotated = false;
        for p in 0..l {
            for r in (p + 1)..l {
                let alpha = dot(&w[p], &w[p]);
                let beta = dot(&w[r], &w[r]);
                let gamma = dot(&w[p], &w[r]);
                if gamma == 0.0 || gamma.abs() <= ORTHO_TOL * (alpha * beta).sqrt() {
                    continue;
                }
                rotated = true;
                let zeta = (beta - alpha) / (2.0 * gamma);
                let t = if zeta.abs() > 1e150 {
                    0.5 / zeta
                } else {
                    zeta.signum() / (zeta.abs() + (1.0 + zeta * zeta).sqrt())
                };
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = c * t;
                rotate_columns(&mut w, p, r, c, s);
                rotate_columns(&mut j, p, r, c, s);
            }
        }
        if !rotated {
            break;
        }
    }

    let norms: Vec<f64> = w.iter().map(|col| norm(col)).collect();
    let mut order: Vec<usize> = (0..l).collect();
    order.sort_by(|&x, &y| norms[y].total_cmp(&norms[x]).then(x.cmp(&y)));

    let n_rows = q.first().map_or(0, Vec::len);
    let mut ritz = Ritz {
        u: Vec::with_capacity(l),
        sigma: Vec::with_capacity(l),
        v: Vec::with_capacity(l),
    };
    for &c in &order {
        let s = norms[c];
        let vc: Vec<f64> = if s > 0.0 {
            w[c].iter().map(|x| x / s).collect()
        } else {
            vec![0.0; w[c].len()]
        };
        let mut uc = vec![0.0; n_rows];
        for (qi, &jic) in q.iter().zip(&j[c]) {
            if jic == 0.0 {
                continue;
            }
            for (o, x) in uc.iter_mut().zip(qi) {
                *o += jic * x;
            }
        }
        ritz.u.push(uc);
        ritz.sigma.push(s);
        ritz.v.push(vc);
    }
    ritz
}

/// Whether the leading `k` Ritz triplets (or all non-null ones, if fewer)
/// satisfy the residual bound.
fn residuals_converged<A: LinearOperator + ?Sized>(a: &A, ritz: &Ritz, k: usize) -> bool {
    let sigma_max = ritz.sigma.first().copied().unwrap_or(0.0);
    if sigma_max <= 0.0 {
        return true;
    }
    let checked = k.min(numerical_rank(&ritz.sigma));
    (0..checked).all(|c| {
        let av = a.apply(&ritz.v[c]);
        let residual: f64 = av
            .iter()
            .zip(&ritz.u[c])
            .map(|(x, u)| (x - ritz.sigma[c] * u).powi(2))
            .sum::<f64>()
            .sqrt();
        residual <= RESIDUAL_TOL * sigma_max
    })
}

/// `(col_p, col_r) ← (c·col_p − s·col_r, s·col_p + c·col_r)`, with `p < r`.
fn rotate_columns(cols: &mut [Vec<f64>], p: usize, r: usize, c: f64, s: f64) {
    let (left, right) = cols.split_at_mut(r);
    for (x, y) in left[p].iter_mut().zip(right[0].iter_mut()) {
        let (a, b) = (*x, *y);
        *x = c * a - s * b;
        *y = s * a + c * b;
    }
}

/// Two-pass modified Gram-Schmidt over the columns. A column that is
/// numerically dependent on the earlier ones is replaced by a fresh random
/// direction, so the basis keeps its width.
fn orthonormalize(cols: &mut [Vec<f64>], rng: &mut Xorshift64) {
    for c in 0..cols.len() {
        let (done, rest) = cols.split_at_mut(c);
        let col = &mut rest[0];
        let mut attempts = 0;
        loop {
            let before = norm(col);
            for _ in 0..2 {
                for basis in done.iter() {
                    let proj = dot(basis, col);
                    col.iter_mut().zip(basis).for_each(|(x, b)| *x -= proj * b);
                }
            }
            let after = norm(col);
            if after > 0.0 && after > 1e-12 * before {
                col.iter_mut().for_each(|x| *x /= after);
                break;
            }
            attempts += 1;
            if attempts > 8 {
                col.iter_mut().for_each(|x| *x = 0.0);
                break;
            }
            *col = random_vector(col.len(), rng);
        }
    }
}

fn random_vector(len: usize, rng: &mut Xorshift64) -> Vec<f64> {
    (0..len).map(|_| 2.0 * rng.next_f64() - 1.0).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-8;

    #[test]
    fn eigen_diagonal() {
        let m = vec![1.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 2.0];
        let e = symmetric_eigen(&m, 3).unwrap();
        assert!((e.values[0] - 3.0).abs() < TOL);
        assert!((e.values[1] - 2.0).abs() < TOL);
        assert!((e.values[2] - 1.0).abs() < TOL);
        assert!((e.vector(0)[1] - 1.0).abs() < TOL);
    }

    #[test]
    fn eigen_reconstructs() {
        // Symmetric 4x4.
        let m = vec![
            4.0, 1.0, 2.0, 0.5, //
            1.0, 3.0, 0.0, 1.0, //
            2.0, 0.0, 5.0, 1.5, //
            0.5, 1.0, 1.5, 2.0,
        ];
        let n = 4;
        let e = symmetric_eigen(&m, n).unwrap();
        for i in 0..n {
            for j in 0..n {
                let rec: f64 = (0..n)
                    .map(|k| e.vectors[i * n + k] * e.values[k] * e.vectors[j * n + k])
                    .sum();
                assert!((rec - m[i * n + j]).abs() < 1e-9, "({i},{j})");
            }
        }
        // Orthonormal columns.
        for a in 0..n {
            for b in 0..n {
                let dot: f64 = (0..n).map(|i| e.vectors[i * n + a] * e.vectors[i * n + b]).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn eigen_rejects_asymmetric() {
        let m = vec![1.0, 2.0, 0.0, 1.0];
        assert!(symmetric_eigen(&m, 2).is_err());
    }

    #[test]
    fn eigen_sign_convention() {
        let m = vec![2.0, -1.0, -1.0, 2.0];
        let e = symmetric_eigen(&m, 2).unwrap();
        for k in 0..2 {
            let v = e.vector(k);
            let mut best = 0;
            for i in 1..v.len() {
                if v[i].abs() > v[best].abs() {
                    best = i;
                }
            }
            assert!(v[best] > 0.0);
        }
    }

    #[test]
    fn svd_reconstructs_rank_two() {
        // 3x4 matrix of rank 2.
        let a = vec![
            1.0, 2.0, 0.0, 1.0, //
            0.0, 1.0, 1.0, 0.0, //
            1.0, 3.0, 1.0, 1.0,
        ];
        let svd = truncated_svd(&a, 3, 4, 2).unwrap();
        assert_eq!(svd.rank, 2);
        for i in 0..3 {
            for j in 0..4 {
                let rec: f64 = (0..2)
                    .map(|c| svd.u[i * 2 + c] * svd.singular_values[c] * svd.v[j * 2 + c])
                    .sum();
                assert!((rec - a[i * 4 + j]).abs() < 1e-6, "({i},{j})");
            }
        }
        assert!(svd.singular_values[0] >= svd.singular_values[1]);
    }

    #[test]
    fn svd_tall_matrix() {
        let a = vec![1.0, 0.0, 0.0, 2.0, 1.0, 1.0, 3.0, 0.0];
        let svd = truncated_svd(&a, 4, 2, 2).unwrap();
        assert_eq!(svd.u.len(), 8);
        assert_eq!(svd.v.len(), 4);
        for i in 0..4 {
            for j in 0..2 {
                let rec: f64 = (0..2)
                    .map(|c| svd.u[i * 2 + c] * svd.singular_values[c] * svd.v[j * 2 + c])
                    .sum();
                assert!((rec - a[i * 2 + j]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn svd_rank_deficiency() {
        let a = vec![1.0, 2.0, 2.0, 4.0];
        match truncated_svd(&a, 2, 2, 2) {
            Err(AtacamaError::RankDeficiency { requested, rank }) => {
                assert_eq!(requested, 2);
                assert_eq!(rank, 1);
            }
            other => panic!("expected rank deficiency, got {other:?}"),
        }
    }

    /// `n × m` matrix with column `j` scaled by `0.7^j`, so the spectrum decays.
    fn decaying(n: usize, m: usize, seed: u64) -> Vec<f64> {
        let mut rng = Xorshift64::new(seed);
        (0..n * m)
            .map(|idx| (2.0 * rng.next_f64() - 1.0) * 0.7f64.powi((idx % m) as i32))
            .collect()
    }

    #[test]
    fn subspace_iteration_matches_full_factorization() {
        let (n, m) = (60, 40);
        let a = decaying(n, m, 5);
        // k + 10 < 40 takes the iterative path; k = 40 spans every column.
        let top = truncated_svd(&a, n, m, 4).unwrap();
        let full = truncated_svd(&a, n, m, 40).unwrap();
        for c in 0..4 {
            let (s, t) = (top.singular_values[c], full.singular_values[c]);
            assert!((s - t).abs() < 1e-6 * full.singular_values[0], "σ{c}: {s} vs {t}");
            // Same left vector up to the shared sign convention.
            let dot: f64 = (0..n).map(|i| top.u[i * 4 + c] * full.u[i * 40 + c]).sum();
            assert!((dot - 1.0).abs() < 1e-5, "u{c} alignment {dot}");
        }
        // Orthonormal left vectors.
        for p in 0..4 {
            for q in 0..4 {
                let d: f64 = (0..n).map(|i| top.u[i * 4 + p] * top.u[i * 4 + q]).sum();
                let expected = if p == q { 1.0 } else { 0.0 };
                assert!((d - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn svd_is_deterministic() {
        let a = decaying(30, 50, 9);
        let x = truncated_svd(&a, 30, 50, 3).unwrap();
        let y = truncated_svd(&a, 30, 50, 3).unwrap();
        assert_eq!(x.u, y.u);
        assert_eq!(x.singular_values, y.singular_values);
    }

    /// Diagonal operator `diag(1, 1/2, 1/3, …)` padded with zero rows.
    struct Harmonic {
        n_rows: usize,
        n_cols: usize,
    }

    impl LinearOperator for Harmonic {
        fn shape(&self) -> (usize, usize) {
            (self.n_rows, self.n_cols)
        }

        fn apply(&self, x: &[f64]) -> Vec<f64> {
            (0..self.n_rows)
                .map(|i| if i < self.n_cols { x[i] / (i + 1) as f64 } else { 0.0 })
                .collect()
        }

        fn apply_transpose(&self, y: &[f64]) -> Vec<f64> {
            (0..self.n_cols).map(|j| y[j] / (j + 1) as f64).collect()
        }
    }

    #[test]
    fn operator_without_storage() {
        let op = Harmonic {
            n_rows: 500,
            n_cols: 400,
        };
        let svd = svd_of(&op, 3).unwrap();
        for c in 0..3 {
            let expected = 1.0 / (c + 1) as f64;
            assert!((svd.singular_values[c] - expected).abs() < 1e-9);
            assert!((svd.u[c * 3 + c] - 1.0).abs() < 1e-5);
            assert!((svd.v[c * 3 + c] - 1.0).abs() < 1e-5);
        }
        assert!(svd.rank >= 3);
    }

    #[test]
    fn zero_matrix_has_rank_zero() {
        let a = vec![0.0; 6];
        match truncated_svd(&a, 2, 3, 1) {
            Err(AtacamaError::RankDeficiency { requested: 1, rank: 0 }) => {}
            other => panic!("expected rank deficiency, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_input_rejected() {
        let a = vec![1.0, f64::NAN, 0.0, 1.0];
        assert!(matches!(
            truncated_svd(&a, 2, 2, 1),
            Err(AtacamaError::InvalidInput(_))
        ));
    }

    #[test]
    fn numerical_rank_counts() {
        assert_eq!(numerical_rank(&[3.0, 1.0, 1e-12]), 2);
        assert_eq!(numerical_rank(&[0.0, 0.0]), 0);
    }
}
