//! Fixed-effect logistic regression by Newton–Raphson (IRLS).

use nalgebra::{DMatrix, DVector};

use crate::error::FitError;
use crate::math::{bernoulli_loglik, binary, sigmoid};

const MAX_ITER: usize = 25;
const EPSILON: f64 = 1e-8;
const MAX_HALVINGS: usize = 30;
/// Linear predictors beyond this put fitted probabilities at 0 or 1.
const SEPARATION_ETA: f64 = 30.0;

/// Maximum-likelihood logistic fit.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticFit {
    /// Coefficients, intercept first.
    pub coefs: DVector<f64>,
    /// Residual deviance `-2 ln L`.
    pub deviance: f64,
    /// Newton iterations taken.
    pub iterations: usize,
}

/// Check that `y` is a 0/1 response with both classes and `rows` entries.
pub(crate) fn check_response(y: &[f64], rows: usize) -> Result<(), FitError> {
    if y.len() != rows {
        return Err(FitError::Dimension { rows, found: y.len() });
    }
    let codes = y
        .iter()
        .map(|&v| binary(v))
        .collect::<Option<Vec<bool>>>()
        .ok_or(FitError::NonBinaryResponse)?;
    let ones = codes.iter().filter(|&&c| c).count();
    if ones == 0 || ones == codes.len() {
        return Err(FitError::DegenerateResponse);
    }
    Ok(())
}

fn deviance(eta: &DVector<f64>, y: &[f64]) -> f64 {
    -2.0 * eta.iter().zip(y).map(|(&e, &yi)| bernoulli_loglik(yi, e)).sum::<f64>()
}

/// Fit `P(y = 1) = expit(X β)`.
///
/// `design` must already contain the intercept column. Iterates until the
/// relative change in deviance drops below `1e-8`, halving the Newton step
/// whenever the deviance increases.
///
/// A response with a single class or a separated design is an error, never
/// a diverged estimate. Inside the bootstrap this aborts the whole run.
pub fn fit(design: &DMatrix<f64>, y: &[f64]) -> Result<LogisticFit, FitError> {
    check_response(y, design.nrows())?;

    let y_vec = DVector::from_column_slice(y);
    let mut beta = DVector::zeros(design.ncols());
    let mut eta = design * &beta;
    let mut dev = deviance(&eta, y);

    for iteration in 1..=MAX_ITER {
        let mu = eta.map(sigmoid);
        let w = mu.map(|m| m * (1.0 - m));

        let mut weighted = design.clone();
        for (mut row, &wi) in weighted.row_iter_mut().zip(w.iter()) {
            row *= wi;
        }
        let info = design.transpose() * weighted;
        let score = design.transpose() * (&y_vec - &mu);

        let Some(chol) = info.cholesky() else {
            if eta.iter().any(|e| e.abs() > SEPARATION_ETA) {
                return Err(FitError::PerfectSeparation);
            }
            return Err(FitError::SingularHessian);
        };
        let delta = chol.solve(&score);

        let mut step = 1.0;
        let mut candidate = &beta + &delta;
        let mut cand_eta = design * &candidate;
        let mut cand_dev = deviance(&cand_eta, y);
        let mut halvings = 0;
        while !(cand_dev.is_finite() && cand_dev <= dev + EPSILON) && halvings < MAX_HALVINGS {
            step *= 0.5;
            candidate = &beta + &delta * step;
            cand_eta = design * &candidate;
            cand_dev = deviance(&cand_eta, y);
            halvings += 1;
        }
        if !cand_dev.is_finite() {
            return Err(FitError::NotConverged {
                iterations: iteration as u64,
            });
        }

        let change = (cand_dev - dev).abs() / (cand_dev.abs() + 0.1);
        beta = candidate;
        eta = cand_eta;
        dev = cand_dev;

        if change < EPSILON {
            if eta.iter().all(|e| e.abs() > SEPARATION_ETA) || dev < EPSILON {
                return Err(FitError::PerfectSeparation);
            }
            return Ok(LogisticFit {
                coefs: beta,
                deviance: dev,
                iterations: iteration,
            });
        }
    }

    if eta.iter().any(|e| e.abs() > SEPARATION_ETA) {
        return Err(FitError::PerfectSeparation);
    }
    Err(FitError::NotConverged {
        iterations: MAX_ITER as u64,
    })
}
