//! Mean returns and regularized covariance.

use crate::types::{CovarianceEstimate, ReturnsMatrix};
use crate::{Error, Result};
use nalgebra::{Cholesky, DMatrix, DVector};
use tracing::debug;

/// Estimate per-asset mean returns and the regularized sample covariance.
///
/// The sample covariance uses the unbiased `T - 1` denominator. A ridge
/// `lambda = regularization * trace(cov) / n` is added to the diagonal so the
/// result stays invertible when assets are collinear or periods are scarce.
///
/// # Errors
///
/// - `InsufficientData` with fewer than two periods.
/// - `SingularCovariance` if the ridged matrix is still not positive-definite
///   (e.g. every asset has constant returns, so the trace is zero).
pub fn estimate_covariance(
    returns: &ReturnsMatrix,
    regularization: f64,
) -> Result<CovarianceEstimate> {
    let n = returns.n_assets();
    let periods = returns.n_periods();

    if n == 0 || periods < 2 {
        return Err(Error::InsufficientData(format!(
            "need at least 2 periods to estimate covariance, got {}",
            periods
        )));
    }

    let values = &returns.values;
    let mean_returns = DVector::from_fn(n, |i, _| values.row(i).mean());
    let centered = DMatrix::from_fn(n, periods, |i, t| values[(i, t)] - mean_returns[i]);

    let sample = (&centered * centered.transpose()) / (periods - 1) as f64;
    // Symmetrize away floating-point asymmetry
    let sample_covariance = (&sample + sample.transpose()) * 0.5;

    let (covariance, lambda) = regularize(&sample_covariance, regularization);

    if covariance.iter().any(|v| !v.is_finite()) {
        return Err(Error::SingularCovariance(
            "covariance contains non-finite entries".to_string(),
        ));
    }
    if covariance.diagonal().iter().any(|&v| v <= 0.0) || !is_positive_definite(&covariance) {
        return Err(Error::SingularCovariance(format!(
            "covariance is not positive-definite after a ridge of {:e}",
            lambda
        )));
    }

    debug!(assets = n, periods, lambda, "Covariance estimated");

    Ok(CovarianceEstimate {
        mean_returns,
        sample_covariance,
        covariance,
        regularization: lambda,
    })
}

/// Add `eps_rel * trace(m) / n` to the diagonal of `m`, returning the new matrix and the ridge.
pub fn regularize(matrix: &DMatrix<f64>, eps_rel: f64) -> (DMatrix<f64>, f64) {
    let n = matrix.nrows();
    if n == 0 {
        return (matrix.clone(), 0.0);
    }
    let lambda = eps_rel * matrix.trace() / n as f64;
    let ridged = matrix + DMatrix::identity(n, n) * lambda;
    (ridged, lambda)
}

/// Positive-definiteness via a Cholesky attempt.
pub fn is_positive_definite(matrix: &DMatrix<f64>) -> bool {
    matrix.is_square() && Cholesky::new(matrix.clone()).is_some()
}
