//! Propensity-score models.
//!
//! The treatment model is a logistic regression of treatment on
//! covariates, optionally with a normal random intercept per cluster.
//! A [`PropensityConfig`] says whether its parameters are known or must
//! be estimated on every resample; it resolves into a
//! [`PropensityStrategy`] that performs the fit.

pub mod logistic;
pub mod mixed;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::data::{ClusterPartition, Dataset};
use crate::error::{ConfigError, FitError};

/// Fitted (or known) propensity-model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropensityFit {
    /// Fixed effects, intercept first.
    pub coefs: Vec<f64>,
    /// Random-intercept variance; exactly 0 without a random effect.
    pub re_var: f64,
}

impl PropensityFit {
    /// Parameters with a random-intercept variance.
    pub fn new(coefs: Vec<f64>, re_var: f64) -> Self {
        Self { coefs, re_var }
    }

    /// Parameters of a model without random effect.
    pub fn fixed(coefs: Vec<f64>) -> Self {
        Self::new(coefs, 0.0)
    }

    /// Random-intercept standard deviation.
    pub fn re_sd(&self) -> f64 {
        self.re_var.sqrt()
    }

    /// Check if the random-effect variance is strictly positive.
    pub fn has_random_effect(&self) -> bool {
        self.re_var > 0.0
    }
}

/// Treatment model `response ~ 1 + predictors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFormula {
    /// Binary treatment column.
    pub response: String,
    /// Covariate columns, in coefficient order after the intercept.
    pub predictors: Vec<String>,
}

impl ModelFormula {
    /// Formula with an intercept and the given predictors.
    pub fn new<S: Into<String>>(response: impl Into<String>, predictors: impl IntoIterator<Item = S>) -> Self {
        Self {
            response: response.into(),
            predictors: predictors.into_iter().map(Into::into).collect(),
        }
    }

    /// Every column the model reads.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.response.as_str()).chain(self.predictors.iter().map(String::as_str))
    }
}

/// Optimizer for the random-intercept fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimizer {
    /// Quasi-Newton with analytic gradient.
    Lbfgs,
    /// Derivative-free simplex search.
    #[default]
    NelderMead,
}

/// Explicit optimizer settings for the random-intercept fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FittingControl {
    /// Solver to use.
    pub optimizer: Optimizer,
    /// Iteration budget handed to the optimizer.
    pub max_evals: u64,
}

impl FittingControl {
    /// Settings for `optimizer` with an iteration budget.
    pub fn new(optimizer: Optimizer, max_evals: u64) -> Self {
        Self { optimizer, max_evals }
    }
}

impl Default for FittingControl {
    fn default() -> Self {
        Self {
            optimizer: Optimizer::NelderMead,
            max_evals: 200_000,
        }
    }
}

/// How to estimate the propensity model on each resample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationSpec {
    /// Treatment model.
    pub formula: ModelFormula,
    /// Fit a normal random intercept per cluster.
    pub random_intercept: bool,
    /// Coefficients of the counterfactual allocation model; the fitted
    /// coefficients when absent.
    pub counterfactual: Option<Vec<f64>>,
    /// Optimizer override for the random-intercept fit.
    pub control: Option<FittingControl>,
}

impl EstimationSpec {
    /// Fixed-effect model with default settings.
    pub fn new(formula: ModelFormula) -> Self {
        Self {
            formula,
            random_intercept: false,
            counterfactual: None,
            control: None,
        }
    }

    /// Fit a random intercept per cluster.
    #[must_use]
    pub fn with_random_intercept(mut self, random_intercept: bool) -> Self {
        self.random_intercept = random_intercept;
        self
    }

    /// Fixed coefficients for the counterfactual allocation model.
    #[must_use]
    pub fn with_counterfactual(mut self, coefs: Vec<f64>) -> Self {
        self.counterfactual = Some(coefs);
        self
    }

    /// Optimizer settings for the random-intercept fit.
    #[must_use]
    pub fn with_control(mut self, control: FittingControl) -> Self {
        self.control = Some(control);
        self
    }
}

/// Whether propensity parameters are known or estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PsMode {
    /// Parameters are supplied.
    #[serde(rename = "true")]
    Known,
    /// Parameters are refitted on every resample.
    #[serde(rename = "estimated")]
    Estimated,
}

/// Propensity configuration as supplied by the caller.
///
/// Only the field matching `mode` is consulted; the other may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropensityConfig {
    /// Known or estimated.
    pub mode: PsMode,
    /// Parameters used in known mode.
    pub true_model: Option<PropensityFit>,
    /// Model used in estimated mode.
    pub estimation: Option<EstimationSpec>,
}

impl PropensityConfig {
    /// Known parameters.
    pub fn known(fit: PropensityFit) -> Self {
        Self {
            mode: PsMode::Known,
            true_model: Some(fit),
            estimation: None,
        }
    }

    /// Parameters estimated on every resample.
    pub fn estimated(spec: EstimationSpec) -> Self {
        Self {
            mode: PsMode::Estimated,
            true_model: None,
            estimation: Some(spec),
        }
    }

    /// Select the strategy, rejecting a mode without its parameters.
    pub fn resolve(&self) -> Result<PropensityStrategy, ConfigError> {
        match self.mode {
            PsMode::Known => {
                let fit = self.true_model.clone().ok_or(ConfigError::MissingTrueModel)?;
                if !(fit.re_var.is_finite() && fit.re_var >= 0.0) {
                    return Err(ConfigError::InvalidReVar(fit.re_var));
                }
                Ok(PropensityStrategy::KnownPs(fit))
            }
            PsMode::Estimated => {
                let spec = self.estimation.clone().ok_or(ConfigError::MissingEstimationSpec)?;
                Ok(if spec.random_intercept {
                    PropensityStrategy::EstimatedMixedPs(spec)
                } else {
                    PropensityStrategy::EstimatedFixedPs(spec)
                })
            }
        }
    }
}

impl From<PropensityFit> for PropensityConfig {
    fn from(fit: PropensityFit) -> Self {
        Self::known(fit)
    }
}

impl From<EstimationSpec> for PropensityConfig {
    fn from(spec: EstimationSpec) -> Self {
        Self::estimated(spec)
    }
}

/// Resolved propensity strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum PropensityStrategy {
    /// True parameters are supplied.
    KnownPs(PropensityFit),
    /// Logistic regression refitted on every resample.
    EstimatedFixedPs(EstimationSpec),
    /// Random-intercept logistic regression refitted on every resample.
    EstimatedMixedPs(EstimationSpec),
}

impl PropensityStrategy {
    /// Propensity parameters for one resample.
    ///
    /// A resample with a single treatment class or a separated design fails
    /// with a [`FitError`]; it is never replaced by a diverged fit.
    pub fn fit(&self, data: &Dataset, partition: &ClusterPartition) -> Result<PropensityFit, FitError> {
        match self {
            PropensityStrategy::KnownPs(fit) => Ok(fit.clone()),
            PropensityStrategy::EstimatedFixedPs(spec) => {
                let design = data.design(&spec.formula.predictors)?;
                let fit = logistic::fit(&design, data.column(&spec.formula.response)?)?;
                debug!("logistic fit: deviance {:.4} after {} iterations", fit.deviance, fit.iterations);
                Ok(PropensityFit::fixed(fit.coefs.iter().copied().collect()))
            }
            PropensityStrategy::EstimatedMixedPs(spec) => {
                let design = data.design(&spec.formula.predictors)?;
                mixed::fit(
                    &design,
                    data.column(&spec.formula.response)?,
                    partition,
                    spec.control.as_ref(),
                )
            }
        }
    }

    /// Counterfactual allocation coefficients; `None` means "use the fit".
    pub fn counterfactual(&self) -> Option<&[f64]> {
        match self {
            PropensityStrategy::KnownPs(_) => None,
            PropensityStrategy::EstimatedFixedPs(spec) | PropensityStrategy::EstimatedMixedPs(spec) => {
                spec.counterfactual.as_deref()
            }
        }
    }

    /// Covariates the group estimator reads with this strategy.
    ///
    /// Known parameters need an intercept plus one coefficient per entry of
    /// `covariates`. Estimated coefficients follow the formula predictors, so
    /// an empty `covariates` defaults to them and any other list must match
    /// them in order.
    pub fn group_covariates(&self, covariates: &[String]) -> Result<Vec<String>, ConfigError> {
        match self {
            PropensityStrategy::KnownPs(fit) => {
                check_coefficients("true propensity model", &fit.coefs, covariates.len() + 1)?;
                Ok(covariates.to_vec())
            }
            PropensityStrategy::EstimatedFixedPs(spec) | PropensityStrategy::EstimatedMixedPs(spec) => {
                let predictors = &spec.formula.predictors;
                if !covariates.is_empty() && covariates != predictors.as_slice() {
                    return Err(ConfigError::CovariateMismatch {
                        covariates: covariates.to_vec(),
                        predictors: predictors.clone(),
                    });
                }
                if let Some(coefs) = &spec.counterfactual {
                    check_coefficients("counterfactual model", coefs, predictors.len() + 1)?;
                }
                Ok(predictors.clone())
            }
        }
    }

    /// Check that every model column exists in `data`.
    pub fn check_columns(&self, data: &Dataset) -> Result<(), ConfigError> {
        match self {
            PropensityStrategy::KnownPs(_) => Ok(()),
            PropensityStrategy::EstimatedFixedPs(spec) | PropensityStrategy::EstimatedMixedPs(spec) => {
                for name in spec.formula.columns() {
                    data.column(name)?;
                }
                Ok(())
            }
        }
    }
}

fn check_coefficients(what: &'static str, coefs: &[f64], expected: usize) -> Result<(), ConfigError> {
    if coefs.len() == expected {
        Ok(())
    } else {
        Err(ConfigError::CoefficientLength {
            what,
            expected,
            found: coefs.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures;
    use approx::assert_abs_diff_eq;

    fn formula() -> ModelFormula {
        ModelFormula::new("A", ["x1", "x2"])
    }

    #[test]
    fn resolves_strategy_from_mode() {
        let known = PropensityConfig::known(PropensityFit::new(vec![0.0, 1.0], 0.5));
        assert!(matches!(known.resolve(), Ok(PropensityStrategy::KnownPs(_))));

        let fixed = PropensityConfig::estimated(EstimationSpec::new(formula()));
        assert!(matches!(fixed.resolve(), Ok(PropensityStrategy::EstimatedFixedPs(_))));

        let mixed = PropensityConfig::estimated(EstimationSpec::new(formula()).with_random_intercept(true));
        assert!(matches!(mixed.resolve(), Ok(PropensityStrategy::EstimatedMixedPs(_))));
    }

    #[test]
    fn missing_parameters_are_config_errors() {
        let mut cfg = PropensityConfig::estimated(EstimationSpec::new(formula()));
        cfg.mode = PsMode::Known;
        assert_eq!(cfg.resolve(), Err(ConfigError::MissingTrueModel));

        let mut cfg = PropensityConfig::known(PropensityFit::fixed(vec![0.0]));
        cfg.mode = PsMode::Estimated;
        assert_eq!(cfg.resolve(), Err(ConfigError::MissingEstimationSpec));

        let cfg = PropensityConfig::known(PropensityFit::new(vec![0.0], -1.0));
        assert_eq!(cfg.resolve(), Err(ConfigError::InvalidReVar(-1.0)));
    }

    #[test]
    fn fixed_strategy_has_exactly_zero_variance() {
        let data = fixtures::simulated(30, 6, 0.8, 1);
        let part = data.partition().unwrap();
        let strategy = PropensityConfig::estimated(EstimationSpec::new(formula()))
            .resolve()
            .unwrap();
        let fit = strategy.fit(&data, &part).unwrap();
        assert_eq!(fit.coefs.len(), 3);
        assert_abs_diff_eq!(fit.re_var, 0.0);
        assert!(!fit.has_random_effect());
    }

    #[test]
    fn known_strategy_returns_parameters_unchanged() {
        let truth = PropensityFit::new(vec![0.1, -0.2], 0.5);
        let data = fixtures::tiny();
        let strategy = PropensityConfig::from(truth.clone()).resolve().unwrap();
        assert_eq!(strategy.fit(&data, &data.partition().unwrap()), Ok(truth));
        assert_eq!(strategy.counterfactual(), None);
    }

    #[test]
    fn counterfactual_and_columns() {
        let spec = EstimationSpec::new(formula()).with_counterfactual(vec![0.0, 0.1, 0.2]);
        let strategy = PropensityConfig::from(spec).resolve().unwrap();
        assert_eq!(strategy.counterfactual(), Some([0.0, 0.1, 0.2].as_slice()));

        let data = fixtures::tiny();
        assert_eq!(
            strategy.check_columns(&data),
            Err(ConfigError::UnknownColumn("x1".into()))
        );
    }

    #[test]
    fn known_coefficients_must_cover_the_covariates() {
        let covs = vec!["x".to_string()];
        let strategy = PropensityConfig::known(PropensityFit::new(vec![0.1, -0.2], 0.5))
            .resolve()
            .unwrap();
        assert_eq!(strategy.group_covariates(&covs), Ok(covs.clone()));
        assert_eq!(
            strategy.group_covariates(&[]),
            Err(ConfigError::CoefficientLength {
                what: "true propensity model",
                expected: 1,
                found: 2,
            })
        );
    }

    #[test]
    fn estimated_covariates_follow_the_predictors() {
        let strategy = PropensityConfig::estimated(EstimationSpec::new(formula()))
            .resolve()
            .unwrap();
        let predictors = vec!["x1".to_string(), "x2".to_string()];
        assert_eq!(strategy.group_covariates(&[]), Ok(predictors.clone()));
        assert_eq!(strategy.group_covariates(&predictors), Ok(predictors.clone()));

        let swapped = vec!["x2".to_string(), "x1".to_string()];
        assert_eq!(
            strategy.group_covariates(&swapped),
            Err(ConfigError::CovariateMismatch {
                covariates: swapped.clone(),
                predictors: predictors.clone(),
            })
        );

        let short = PropensityConfig::estimated(EstimationSpec::new(formula()).with_counterfactual(vec![0.0]))
            .resolve()
            .unwrap();
        assert_eq!(
            short.group_covariates(&[]),
            Err(ConfigError::CoefficientLength {
                what: "counterfactual model",
                expected: 3,
                found: 1,
            })
        );
    }

    #[test]
    fn mode_serialises_with_legacy_names() {
        assert_eq!(serde_json::to_string(&PsMode::Known).unwrap(), "\"true\"");
        let cfg: PropensityConfig = serde_json::from_str(
            r#"{"mode":"estimated","true_model":null,
                "estimation":{"formula":{"response":"A","predictors":["x"]},
                "random_intercept":true,"counterfactual":null,
                "control":{"optimizer":"nelder_mead","max_evals":1000}}}"#,
        )
        .unwrap();
        assert!(matches!(cfg.resolve(), Ok(PropensityStrategy::EstimatedMixedPs(_))));
    }
}
