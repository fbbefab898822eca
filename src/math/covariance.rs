//! Covariance-matrix kernels for correlated Monte Carlo sampling.
//!
//! References:
//! - Glasserman (2004), *Monte Carlo Methods in Financial Engineering*, Ch. 2.3.
//! - Higham (2002), nearest-correlation-matrix background for the PSD checks.
//!
//! Sampling correlated shocks requires a lower-triangular factor `L` with
//! `L L^T = Sigma`. Estimated covariance matrices are frequently semi-definite
//! or mildly indefinite (short samples, EWMA decay), so factorization supports
//! one diagonal-regularization retry before reporting the matrix as singular.

use nalgebra::{DMatrix, SymmetricEigen};

use crate::core::RiskError;

/// Default diagonal bump applied on the regularization retry.
pub const DEFAULT_REGULARIZATION_EPSILON: f64 = 1.0e-10;

/// Strict Cholesky decomposition of a symmetric positive-definite matrix.
///
/// Returns `None` when a pivot falls below `tol`, i.e. the matrix is singular
/// or indefinite at working precision.
pub fn cholesky_lower(matrix: &[Vec<f64>], tol: f64) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    if n == 0 || matrix.iter().any(|row| row.len() != n) {
        return None;
    }

    let mut l = vec![vec![0.0_f64; n]; n];

    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[i][j];
            for (&lik, &ljk) in l[i].iter().zip(l[j].iter()).take(j) {
                sum -= lik * ljk;
            }

            if i == j {
                if sum <= tol {
                    return None;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    Some(l)
}

/// Factors a covariance matrix, retrying once with a diagonal bump.
///
/// Returns the lower-triangular factor and whether regularization was needed.
/// A second failure is a [`RiskError::CovarianceSingular`]; callers fall back
/// to the historical method and attach a warning to the result.
pub fn factor_covariance(
    covariance: &[Vec<f64>],
    epsilon: f64,
) -> Result<(Vec<Vec<f64>>, bool), RiskError> {
    if let Some(l) = cholesky_lower(covariance, 0.0) {
        return Ok((l, false));
    }

    let n = covariance.len();
    let mut bumped = covariance.to_vec();
    for (i, row) in bumped.iter_mut().enumerate().take(n) {
        row[i] += epsilon;
    }

    match cholesky_lower(&bumped, 0.0) {
        Some(l) => Ok((l, true)),
        None => {
            let lambda_min = min_eigenvalue_symmetric(covariance).unwrap_or(f64::NAN);
            Err(RiskError::CovarianceSingular(format!(
                "Cholesky factorization failed after diagonal regularization \
                 (epsilon={epsilon:e}, min eigenvalue {lambda_min:e})"
            )))
        }
    }
}

/// Quadratic form `w^T Sigma w`.
pub fn portfolio_variance(weights: &[f64], covariance: &[Vec<f64>]) -> f64 {
    let mut acc = 0.0;
    for (i, wi) in weights.iter().enumerate() {
        for (j, wj) in weights.iter().enumerate() {
            acc += wi * wj * covariance[i][j];
        }
    }
    acc.max(0.0)
}

/// Minimum eigenvalue of a symmetric matrix, `None` for malformed input.
pub fn min_eigenvalue_symmetric(matrix: &[Vec<f64>]) -> Option<f64> {
    let n = matrix.len();
    if n == 0 || matrix.iter().any(|row| row.len() != n) {
        return None;
    }

    let m = DMatrix::from_fn(n, n, |i, j| matrix[i][j]);
    let eig = SymmetricEigen::new(m);
    eig.eigenvalues.iter().copied().reduce(f64::min)
}
