//! Small dense linear algebra helpers on top of ndarray.

use crate::error::{MsaError, Result};
use crate::{Matrix, Vector};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use std::cmp::Ordering;

const MAX_SWEEPS: usize = 100;
/// Extra sketch columns beyond the requested rank.
pub const OVERSAMPLES: usize = 10;
pub const POWER_ITERATIONS: usize = 4;

/// Eigendecomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns eigenvalues in descending order and the matching unit
/// eigenvectors as columns.
pub fn symmetric_eigen(matrix: &Matrix) -> Result<(Vector, Matrix)> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(MsaError::DecompositionFailed(
            "Matrix must be square for eigenvalue decomposition".to_string(),
        ));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(MsaError::DecompositionFailed(
            "Matrix contains non-finite values".to_string(),
        ));
    }

    let mut a = matrix.clone();
    let mut v = Matrix::eye(n);
    let scale = a.iter().map(|x| x * x).sum::<f64>().sqrt();

    let mut converged = n < 2 || scale == 0.0;
    for _ in 0..MAX_SWEEPS {
        if converged {
            break;
        }
        let off = off_diagonal_norm(&a);
        if off <= 1e-14 * scale {
            converged = true;
            break;
        }

        for p in 0..n - 1 {
            for q in p + 1..n {
                let apq = a[[p, q]];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    if !converged && off_diagonal_norm(&a) > 1e-10 * scale {
        return Err(MsaError::DecompositionFailed(format!(
            "Jacobi eigensolver did not converge in {} sweeps",
            MAX_SWEEPS
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[[j, j]].partial_cmp(&a[[i, i]]).unwrap_or(Ordering::Equal));

    let eigenvalues: Vector = order.iter().map(|&i| a[[i, i]]).collect();
    let mut eigenvectors = Matrix::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        eigenvectors.column_mut(dst).assign(&v.column(src));
    }
    Ok((eigenvalues, eigenvectors))
}

fn off_diagonal_norm(a: &Matrix) -> f64 {
    let mut sum = 0.0;
    for ((i, j), &x) in a.indexed_iter() {
        if i != j {
            sum += x * x;
        }
    }
    sum.sqrt()
}

/// Symmetric decorrelation `W <- (W Wᵀ)^(-1/2) W`.
pub fn sym_decorrelation(w: &Matrix) -> Result<Matrix> {
    let (s, u) = symmetric_eigen(&w.dot(&w.t()))?;
    if s.iter().any(|&x| x <= 0.0) {
        return Err(MsaError::DecompositionFailed(
            "Unmixing matrix became singular".to_string(),
        ));
    }
    let inv_sqrt = Matrix::from_diag(&s.mapv(|x| 1.0 / x.sqrt()));
    Ok(u.dot(&inv_sqrt).dot(&u.t()).dot(w))
}

/// Orthonormalizes the columns of `a` in place by modified Gram-Schmidt,
/// applied twice. Columns that collapse to zero stay zero.
pub fn orthonormalize(a: &mut Matrix) {
    for _ in 0..2 {
        for j in 0..a.ncols() {
            for i in 0..j {
                let proj = a.column(i).dot(&a.column(j));
                let qi = a.column(i).to_owned();
                a.column_mut(j).scaled_add(-proj, &qi);
            }
            let norm = a.column(j).dot(&a.column(j)).sqrt();
            if norm > 1e-12 {
                a.column_mut(j).mapv_inplace(|v| v / norm);
            } else {
                a.column_mut(j).fill(0.0);
            }
        }
    }
}

/// Leading `k` singular values and right singular vectors (as rows) of `x`
/// by randomized range finding with power iterations.
///
/// Only `(k + OVERSAMPLES)`-wide sketches and one small eigenproblem are
/// formed, so the cost is linear in both dimensions of `x`.
pub fn truncated_svd(x: &Matrix, k: usize, rng: &mut StdRng) -> Result<(Vector, Matrix)> {
    let (n, m) = x.dim();
    let l = (k + OVERSAMPLES).min(n).min(m);
    if k == 0 || k > l {
        return Err(MsaError::DecompositionFailed(format!(
            "cannot take {} singular vectors of a {}x{} matrix",
            k, n, m
        )));
    }

    let omega = Matrix::random_using((m, l), StandardNormal, rng);
    let mut q = x.dot(&omega);
    orthonormalize(&mut q);
    for _ in 0..POWER_ITERATIONS {
        let mut z = x.t().dot(&q);
        orthonormalize(&mut z);
        q = x.dot(&z);
        orthonormalize(&mut q);
    }

    let b = q.t().dot(x);
    let (eigenvalues, u_b) = symmetric_eigen(&b.dot(&b.t()))?;

    let mut singular_values = Vector::zeros(k);
    let mut rows = Matrix::zeros((k, m));
    for i in 0..k {
        let s = eigenvalues[i].max(0.0).sqrt();
        singular_values[i] = s;
        if s > 1e-10 {
            let v = b.t().dot(&u_b.column(i)) / s;
            rows.row_mut(i).assign(&v);
        }
    }
    Ok((singular_values, rows))
}

/// Flips each row so that its largest-magnitude entry is positive.
pub fn fix_row_signs(rows: &mut Matrix) {
    for mut row in rows.rows_mut() {
        let pivot = row
            .iter()
            .copied()
            .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if pivot < 0.0 {
            row.mapv_inplace(|x| -x);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_eigen_of_diagonal_matrix_is_sorted() {
        let m = array![[1.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 2.0]];
        let (values, vectors) = symmetric_eigen(&m).unwrap();
        assert_eq!(values, array![3.0, 2.0, 1.0]);
        assert_abs_diff_eq!(vectors[[1, 0]].abs(), 1.0);
        assert_abs_diff_eq!(vectors[[2, 1]].abs(), 1.0);
    }

    #[test]
    fn test_eigen_reconstructs_matrix() {
        let m = array![[4.0, 1.0, 2.0], [1.0, 3.0, 0.5], [2.0, 0.5, 5.0]];
        let (values, vectors) = symmetric_eigen(&m).unwrap();
        let rebuilt = vectors.dot(&Matrix::from_diag(&values)).dot(&vectors.t());
        for (a, b) in rebuilt.iter().zip(m.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
        let gram = vectors.t().dot(&vectors);
        for ((i, j), &x) in gram.indexed_iter() {
            assert_abs_diff_eq!(x, if i == j { 1.0 } else { 0.0 }, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_eigen_rejects_non_square_and_nan() {
        assert!(symmetric_eigen(&Matrix::zeros((2, 3))).is_err());
        assert!(symmetric_eigen(&array![[f64::NAN, 0.0], [0.0, 1.0]]).is_err());
    }

    #[test]
    fn test_sym_decorrelation_gives_orthogonal_rows() {
        let w = array![[2.0, 1.0], [0.5, 3.0]];
        let d = sym_decorrelation(&w).unwrap();
        let gram = d.dot(&d.t());
        assert_abs_diff_eq!(gram[[0, 0]], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(gram[[1, 1]], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(gram[[0, 1]], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_orthonormalize_columns() {
        let mut a = array![[1.0, 1.0, 2.0], [0.0, 1.0, 2.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        orthonormalize(&mut a);
        let gram = a.t().dot(&a);
        assert_abs_diff_eq!(gram[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(gram[[1, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(gram[[0, 1]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(gram[[0, 2]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(gram[[1, 2]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_truncated_svd_matches_exact_spectrum() {
        use rand::SeedableRng;

        // Rank-4 structure plus a small deterministic perturbation, 60 x 90.
        let (n, m) = (60, 90);
        let x = Matrix::from_shape_fn((n, m), |(i, j)| {
            let (fi, fj) = (i as f64, j as f64);
            8.0 * (0.11 * fi).sin() * (0.07 * fj).cos()
                + 4.0 * (0.23 * fi).cos() * (0.05 * fj + 1.0).sin()
                + 2.0 * ((i % 7) as f64 - 3.0) * ((j % 5) as f64 - 2.0) / 3.0
                + 1.0 * (0.31 * fi + 0.5).sin() * (0.19 * fj).sin()
                + 0.01 * (((i * 31 + j * 17) % 13) as f64 - 6.0)
        });

        let (exact, _) = symmetric_eigen(&x.dot(&x.t())).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let (s, v) = truncated_svd(&x, 4, &mut rng).unwrap();

        for i in 0..4 {
            let reference = exact[i].max(0.0).sqrt();
            assert_abs_diff_eq!(s[i], reference, epsilon = 1e-6 * reference.max(1.0));
        }
        let gram = v.dot(&v.t());
        for ((i, j), &g) in gram.indexed_iter() {
            assert_abs_diff_eq!(g, if i == j { 1.0 } else { 0.0 }, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_truncated_svd_rejects_too_many_components() {
        use rand::SeedableRng;
        let mut rng = StdRng::seed_from_u64(0);
        assert!(truncated_svd(&Matrix::ones((3, 5)), 4, &mut rng).is_err());
        assert!(truncated_svd(&Matrix::ones((3, 5)), 0, &mut rng).is_err());
    }

    #[test]
    fn test_fix_row_signs() {
        let mut rows = array![[0.1, -0.9], [0.5, 0.2]];
        fix_row_signs(&mut rows);
        assert_eq!(rows, array![[-0.1, 0.9], [0.5, 0.2]]);
    }
}
