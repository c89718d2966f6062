//! Random-intercept logistic regression by maximum marginal likelihood.
//!
//! ```text
//! logit P(y_ij = 1 | b_i) = x_ij·β + b_i,   b_i ~ N(0, σ²)
//! ```
//! The random intercept is integrated out per cluster with Gauss–Hermite
//! quadrature, and `(β, σ)` are optimised jointly. The likelihood is even
//! in `σ`, so `σ` is left unconstrained and its absolute value reported.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use super::{FittingControl, Optimizer, PropensityFit, logistic};
use crate::data::ClusterPartition;
use crate::error::FitError;
use crate::math::{GaussHermite, bernoulli_loglik, log_sum_exp, sigmoid};
use crate::optim::{Lbfgs, NelderMeadSearch, ObjectiveFunction, OptimizationResult};

/// Fitted standard deviations below this are reported as a zero variance.
pub const SINGULAR_TOL: f64 = 1e-4;

/// Design rows and responses of one cluster.
struct Group {
    x: DMatrix<f64>,
    y: Vec<f64>,
}

/// Negative marginal log-likelihood over `(β, σ)`.
struct MarginalLikelihood {
    groups: Vec<Group>,
    width: usize,
    rule: GaussHermite,
}

impl MarginalLikelihood {
    fn new(
        design: &DMatrix<f64>,
        y: &[f64],
        partition: &ClusterPartition,
        rule: GaussHermite,
    ) -> Result<Self, FitError> {
        let rows = design.nrows();
        if y.len() != rows {
            return Err(FitError::Dimension { rows, found: y.len() });
        }
        let groups = partition
            .iter()
            .map(|members| {
                let y = members
                    .iter()
                    .map(|&row| y.get(row).copied().ok_or(FitError::RowOutOfBounds { row, rows }))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Group {
                    x: design.select_rows(members),
                    y,
                })
            })
            .collect::<Result<Vec<_>, FitError>>()?;
        Ok(Self {
            groups,
            width: design.ncols(),
            rule,
        })
    }

    fn unpack(&self, params: &[f64]) -> Result<(DVector<f64>, f64), FitError> {
        let (beta, sigma) = split(params)?;
        if beta.len() != self.width {
            return Err(FitError::Optimizer(format!(
                "expected {} coefficients, got {}",
                self.width,
                beta.len()
            )));
        }
        Ok((DVector::from_column_slice(beta), sigma))
    }

    /// Per-node log terms `ln w_q + Σ_j ln p(y_j | η_j + σ z_q)` of one cluster.
    fn node_terms(&self, group: &Group, eta: &DVector<f64>, sigma: f64) -> Vec<f64> {
        self.rule
            .nodes()
            .iter()
            .zip(self.rule.log_weights())
            .map(|(&z, &lw)| {
                lw + group
                    .y
                    .iter()
                    .zip(eta.iter())
                    .map(|(&y, &e)| bernoulli_loglik(y, e + sigma * z))
                    .sum::<f64>()
            })
            .collect()
    }
}

impl ObjectiveFunction for MarginalLikelihood {
    fn eval(&self, params: &[f64]) -> Result<f64, FitError> {
        let (beta, sigma) = self.unpack(params)?;
        Ok(-self
            .groups
            .iter()
            .map(|g| log_sum_exp(self.node_terms(g, &(&g.x * &beta), sigma)))
            .sum::<f64>())
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>, FitError> {
        let (beta, sigma) = self.unpack(params)?;
        let mut grad_beta: DVector<f64> = DVector::zeros(self.width);
        let mut grad_sigma = 0.0;

        for g in &self.groups {
            let eta = &g.x * &beta;
            let terms = self.node_terms(g, &eta, sigma);
            let total = log_sum_exp(terms.iter().copied());
            for (&z, &t) in self.rule.nodes().iter().zip(&terms) {
                let posterior = (t - total).exp();
                if posterior < 1e-300 {
                    continue;
                }
                let resid = DVector::from_iterator(
                    g.y.len(),
                    g.y.iter().zip(eta.iter()).map(|(&y, &e)| posterior * (y - sigmoid(e + sigma * z))),
                );
                grad_beta -= g.x.tr_mul(&resid);
                grad_sigma -= z * resid.sum();
            }
        }
        Ok(grad_beta.iter().copied().chain(std::iter::once(grad_sigma)).collect())
    }
}

fn split(params: &[f64]) -> Result<(&[f64], f64), FitError> {
    match params.split_last() {
        Some((&sigma, beta)) => Ok((beta, sigma)),
        None => Err(FitError::Optimizer("empty parameter vector".into())),
    }
}

/// Map a fitted `σ` to the reported variance, snapping near-zero fits to 0.
pub fn snap_variance(sigma: f64) -> f64 {
    let sd = sigma.abs();
    if sd < SINGULAR_TOL { 0.0 } else { sd * sd }
}

/// Fit the random-intercept model.
///
/// Starts from the fixed-effect fit with `σ = 1`. Without `control` the
/// gradient-based L-BFGS solver is used; with it, the configured optimizer
/// and evaluation budget. A response the fixed-effect start rejects, such
/// as a single class or a separated design, fails here too.
pub fn fit(
    design: &DMatrix<f64>,
    y: &[f64],
    partition: &ClusterPartition,
    control: Option<&FittingControl>,
) -> Result<PropensityFit, FitError> {
    let start = logistic::fit(design, y)?;
    let mut init: Vec<f64> = start.coefs.iter().copied().collect();
    init.push(1.0);

    let objective = MarginalLikelihood::new(design, y, partition, GaussHermite::default())?;

    let result: OptimizationResult = match control {
        None => Lbfgs::default().minimize(&objective, &init)?,
        Some(FittingControl {
            optimizer: Optimizer::Lbfgs,
            max_evals,
        }) => Lbfgs {
            max_iter: *max_evals,
            ..Lbfgs::default()
        }
        .minimize(&objective, &init)?,
        Some(FittingControl {
            optimizer: Optimizer::NelderMead,
            max_evals,
        }) => NelderMeadSearch {
            max_iter: *max_evals,
            ..NelderMeadSearch::default()
        }
        .minimize(&objective, &init)?,
    };
    debug!("random-intercept fit: {result}");

    if !result.converged {
        return Err(FitError::NotConverged {
            iterations: result.n_iter,
        });
    }

    let (beta, sigma) = split(&result.parameters)?;
    let re_var = snap_variance(sigma);
    if re_var == 0.0 {
        warn!("random-intercept fit is singular (|sigma| = {:.2e})", sigma.abs());
    }
    Ok(PropensityFit::new(beta.to_vec(), re_var))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures;
    use approx::assert_abs_diff_eq;

    fn problem(seed: u64, re_sd: f64) -> (DMatrix<f64>, Vec<f64>, ClusterPartition) {
        let data = fixtures::simulated(60, 8, re_sd, seed);
        let x = data.design(&["x1".into(), "x2".into()]).unwrap();
        let y = data.column("A").unwrap().to_vec();
        (x, y, data.partition().unwrap())
    }

    #[test]
    fn analytic_gradient_matches_central_differences() {
        let (x, y, part) = problem(2, 1.0);
        let objective = MarginalLikelihood::new(&x, &y, &part, GaussHermite::new(20)).unwrap();
        let at = [-0.1, 0.4, -0.3, 0.8];
        let analytic = objective.gradient(&at).unwrap();
        assert_eq!(analytic.len(), at.len());

        let h = 1e-5;
        for (k, g) in analytic.iter().enumerate() {
            let shifted = |d: f64| -> Vec<f64> {
                at.iter()
                    .enumerate()
                    .map(|(j, &v)| if j == k { v + d } else { v })
                    .collect()
            };
            let up = objective.eval(&shifted(h)).unwrap();
            let down = objective.eval(&shifted(-h)).unwrap();
            assert_abs_diff_eq!(*g, (up - down) / (2.0 * h), epsilon = 1e-4);
        }
    }

    #[test]
    fn likelihood_is_even_in_sigma() {
        let (x, y, part) = problem(4, 0.5);
        let objective = MarginalLikelihood::new(&x, &y, &part, GaussHermite::default()).unwrap();
        let pos = objective.eval(&[0.1, 0.2, -0.3, 0.7]).unwrap();
        let neg = objective.eval(&[0.1, 0.2, -0.3, -0.7]).unwrap();
        assert_abs_diff_eq!(pos, neg, epsilon = 1e-9);
    }

    #[test]
    fn rejects_rows_outside_the_design() {
        let x = DMatrix::from_element(2, 1, 1.0);
        let part = ClusterPartition::new(vec![vec![0, 2]]);
        assert!(matches!(
            MarginalLikelihood::new(&x, &[0.0, 1.0], &part, GaussHermite::default()),
            Err(FitError::RowOutOfBounds { row: 2, rows: 2 })
        ));
        let whole = ClusterPartition::new(vec![vec![0, 1]]);
        let objective = MarginalLikelihood::new(&x, &[0.0, 1.0], &whole, GaussHermite::default()).unwrap();
        assert!(matches!(objective.eval(&[0.1, 0.2, 0.3]), Err(FitError::Optimizer(_))));
    }

    #[test]
    fn recovers_a_clear_random_intercept() {
        let (x, y, part) = problem(8, 1.5);
        let fit = fit(&x, &y, &part, None).unwrap();
        assert_eq!(fit.coefs.len(), 3);
        assert!(fit.re_var > 0.3, "re_var = {}", fit.re_var);
    }

    #[test]
    fn nelder_mead_agrees_with_lbfgs() {
        let (x, y, part) = problem(8, 1.0);
        let lbfgs = fit(&x, &y, &part, None).unwrap();
        let nm = fit(&x, &y, &part, Some(&FittingControl::default())).unwrap();
        for (a, b) in lbfgs.coefs.iter().zip(&nm.coefs) {
            assert_abs_diff_eq!(*a, *b, epsilon = 2e-2);
        }
        assert_abs_diff_eq!(lbfgs.re_var, nm.re_var, epsilon = 5e-2);
    }

    #[test]
    fn tiny_budget_is_not_converged() {
        let (x, y, part) = problem(8, 1.0);
        let control = FittingControl::new(Optimizer::NelderMead, 2);
        assert!(matches!(
            fit(&x, &y, &part, Some(&control)),
            Err(FitError::NotConverged { iterations: 2 })
        ));
    }

    #[test]
    fn near_zero_sigma_is_singular() {
        assert_abs_diff_eq!(snap_variance(5e-5), 0.0);
        assert_abs_diff_eq!(snap_variance(-5e-5), 0.0);
        assert_abs_diff_eq!(snap_variance(-0.5), 0.25, epsilon = 1e-15);
    }
}
