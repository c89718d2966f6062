//! Group-level inverse-probability-weighted potential outcomes.
//!
//! For cluster `i`, treatment arm `a` and allocation `α`:
//! ```text
//! Ŷ_i(a; α) = 1/n_i · Σ_{j: A_ij = a} Y_ij · π(A_i,-j; α) / f(A_i | X_i)
//! ```
//! `f` is the cluster-level propensity of the observed treatment vector,
//! integrated over the random intercept, and `π` is the probability of the
//! other units' treatments under the counterfactual allocation.

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::data::{ClusterPartition, Dataset, OUTCOME_COLUMN, TREATMENT_COLUMN};
use crate::error::EstimatorError;
use crate::math::{GaussHermite, binary, log_bernoulli, sigmoid};
use crate::propensity::PropensityFit;

/// Number of treatment arms: control (`0`) and treated (`1`).
pub const ARMS: usize = 2;

/// Counterfactual allocation family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Estimand {
    /// Treatment probabilities follow the counterfactual propensity model,
    /// shifted per cluster so that they average to `α`.
    #[default]
    #[serde(rename = "1")]
    ClusterAverage,
    /// Every unit independently treated with probability `α`.
    #[serde(rename = "2")]
    Bernoulli,
}

/// Everything the group estimator reads for one resample.
#[derive(Debug, Clone, Copy)]
pub struct GroupInput<'a> {
    /// Resampled records.
    pub data: &'a Dataset,
    /// Covariate columns of the propensity model, without intercept.
    pub covariates: &'a [String],
    /// Propensity parameters for this resample.
    pub fit: &'a PropensityFit,
    /// Coefficients of the counterfactual allocation model; the fitted
    /// coefficients when `None`.
    pub counterfactual: Option<&'a [f64]>,
    /// Allocation strategies.
    pub alpha: &'a [f64],
    /// Rows of each cluster of `data`.
    pub partition: &'a ClusterPartition,
    /// Counterfactual allocation family.
    pub estimand: Estimand,
    /// Treatment column; `A` when `None`.
    pub treatment: Option<&'a str>,
    /// Outcome column; `Y` when `None`.
    pub outcome: Option<&'a str>,
}

/// Per-cluster estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupEstimate {
    /// `[cluster, arm, alpha]`.
    pub yhat: Array3<f64>,
    /// Solved allocation shifts `[cluster, alpha]`, when requested.
    pub re_alpha: Option<Array2<f64>>,
}

/// Group-level potential-outcome estimator.
pub trait GroupEstimator: Sync {
    /// Estimates shaped `[cluster, arm, alpha]`.
    fn estimate(&self, input: &GroupInput<'_>) -> Result<GroupEstimate, EstimatorError>;
}

impl<F> GroupEstimator for F
where
    F: Fn(&GroupInput<'_>) -> Result<GroupEstimate, EstimatorError> + Sync,
{
    fn estimate(&self, input: &GroupInput<'_>) -> Result<GroupEstimate, EstimatorError> {
        self(input)
    }
}

/// IPW group estimator with random-intercept propensities.
#[derive(Debug, Clone)]
pub struct GroupIpw {
    keep_re_alpha: bool,
    alpha_re_bound: f64,
    rule: GaussHermite,
}

impl Default for GroupIpw {
    fn default() -> Self {
        Self {
            keep_re_alpha: false,
            alpha_re_bound: 10.0,
            rule: GaussHermite::default(),
        }
    }
}

impl GroupIpw {
    /// Estimator with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also return the solved allocation shifts.
    #[must_use]
    pub fn with_keep_re_alpha(mut self, keep: bool) -> Self {
        self.keep_re_alpha = keep;
        self
    }

    /// Search interval `[-bound, bound]` for the allocation shift.
    #[must_use]
    pub fn with_alpha_re_bound(mut self, bound: f64) -> Self {
        self.alpha_re_bound = bound.abs();
        self
    }

    /// Quadrature nodes for the random-intercept integral.
    #[must_use]
    pub fn with_nodes(mut self, nodes: usize) -> Self {
        self.rule = GaussHermite::new(nodes);
        self
    }
}

/// Solve `f(x) = target` for increasing `f` on `[lo, hi]`.
fn bisect<F: Fn(f64) -> f64>(f: F, target: f64, mut lo: f64, mut hi: f64) -> Option<f64> {
    if f(lo) > target || f(hi) < target {
        return None;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if f(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 {
            break;
        }
    }
    Some(0.5 * (lo + hi))
}

/// `[1, x_row]·coefs`; `None` when a column has no such row.
fn linear(design: &[&[f64]], coefs: &[f64], row: usize) -> Option<f64> {
    let (intercept, slopes) = coefs.split_first()?;
    design
        .iter()
        .zip(slopes)
        .try_fold(*intercept, |acc, (col, c)| col.get(row).map(|x| acc + c * x))
}

fn check_length(what: &'static str, coefs: &[f64], expected: usize) -> Result<(), EstimatorError> {
    if coefs.len() == expected {
        Ok(())
    } else {
        Err(EstimatorError::CoefficientLength {
            what,
            expected,
            found: coefs.len(),
        })
    }
}

/// A unit of one cluster as the estimator reads it.
struct Unit {
    treated: bool,
    outcome: f64,
    /// Propensity linear predictor without the random intercept.
    eta: f64,
    /// Counterfactual allocation linear predictor.
    lin: f64,
}

impl GroupEstimator for GroupIpw {
    fn estimate(&self, input: &GroupInput<'_>) -> Result<GroupEstimate, EstimatorError> {
        let data = input.data;
        let treatment = data.column(input.treatment.unwrap_or(TREATMENT_COLUMN))?;
        let outcome = data.column(input.outcome.unwrap_or(OUTCOME_COLUMN))?;
        let design = input
            .covariates
            .iter()
            .map(|name| data.column(name))
            .collect::<Result<Vec<_>, _>>()?;

        let beta = input.fit.coefs.as_slice();
        let gamma = input.counterfactual.unwrap_or(beta);
        check_length("propensity model", beta, design.len() + 1)?;
        check_length("counterfactual model", gamma, design.len() + 1)?;
        let treated = treatment
            .iter()
            .map(|&a| binary(a))
            .collect::<Option<Vec<bool>>>()
            .ok_or(EstimatorError::NonBinaryTreatment)?;

        let n_clusters = input.partition.len();
        let n_alpha = input.alpha.len();
        let sd = input.fit.re_sd();
        let keep = self.keep_re_alpha && input.estimand == Estimand::ClusterAverage;

        let mut yhat = Array3::zeros((n_clusters, ARMS, n_alpha));
        let mut re_alpha = keep.then(|| Array2::zeros((n_clusters, n_alpha)));

        for (i, rows) in input.partition.iter().enumerate() {
            if rows.is_empty() {
                return Err(EstimatorError::EmptyCluster(i + 1));
            }
            let units = rows
                .iter()
                .map(|&r| {
                    Some(Unit {
                        treated: *treated.get(r)?,
                        outcome: *outcome.get(r)?,
                        eta: linear(&design, beta, r)?,
                        lin: linear(&design, gamma, r)?,
                    })
                })
                .collect::<Option<Vec<_>>>()
                .ok_or(EstimatorError::RowOutOfBounds(i + 1))?;
            let n_i = units.len() as f64;

            let log_f = self
                .rule
                .log_expectation(sd, |b| units.iter().map(|u| log_bernoulli(u.treated, u.eta + b)).sum());

            for (k, &alpha) in input.alpha.iter().enumerate() {
                let log_pi: Vec<f64> = match input.estimand {
                    Estimand::ClusterAverage => {
                        let mean_q = |xi: f64| units.iter().map(|u| sigmoid(u.lin + xi)).sum::<f64>() / n_i;
                        let xi = bisect(mean_q, alpha, -self.alpha_re_bound, self.alpha_re_bound).ok_or(
                            EstimatorError::AlphaUnreachable {
                                cluster: i + 1,
                                alpha,
                                bound: self.alpha_re_bound,
                            },
                        )?;
                        if let Some(slot) = re_alpha.as_mut().and_then(|m| m.get_mut([i, k])) {
                            *slot = xi;
                        }
                        units.iter().map(|u| log_bernoulli(u.treated, u.lin + xi)).collect()
                    }
                    Estimand::Bernoulli => units
                        .iter()
                        .map(|u| if u.treated { alpha.ln() } else { (1.0 - alpha).ln() })
                        .collect(),
                };
                let total: f64 = log_pi.iter().sum();

                for (u, &own) in units.iter().zip(&log_pi) {
                    let weight = (total - own - log_f).exp();
                    if let Some(slot) = yhat.get_mut([i, usize::from(u.treated), k]) {
                        *slot += u.outcome * weight / n_i;
                    }
                }
            }
        }

        Ok(GroupEstimate { yhat, re_alpha })
    }
}
