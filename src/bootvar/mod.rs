//! Cluster-bootstrap distribution of IPW population estimates.
//!
//! Each repetition resamples clusters with replacement, refits the
//! propensity model on the resample, recomputes the group estimates and
//! stores their mean over clusters. Repetitions are independent: repetition
//! `bb` draws from its own random stream seeded with `seed + bb`, so the
//! result does not depend on whether repetitions run in parallel.

mod progress;
mod result;

use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

pub use progress::{LogProgress, Progress, Silent};
pub use result::{BootstrapDetail, BootstrapResult, Repetition};

use crate::data::{ClusterPartition, Dataset, OUTCOME_COLUMN, TREATMENT_COLUMN};
use crate::error::{ConfigError, Error, EstimatorError, RepetitionError, Result};
use crate::ipw::{ARMS, Estimand, GroupEstimator, GroupInput, GroupIpw};
use crate::propensity::{PropensityConfig, PropensityStrategy};
use crate::resample::cluster_draw;

/// Settings of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Number of repetitions (B).
    pub samples: usize,
    /// Allocation strategies; duplicates give duplicate output slots.
    pub alpha: Vec<f64>,
    /// Propensity model, known or estimated on every resample.
    pub propensity: PropensityConfig,
    /// Covariate columns passed to the group estimator. With an estimated
    /// propensity these default to the formula predictors when empty.
    pub covariates: Vec<String>,
    /// Treatment column override.
    pub treatment: Option<String>,
    /// Outcome column override.
    pub outcome: Option<String>,
    /// Keep group estimates, chosen clusters and variance flags.
    pub return_everything: bool,
    /// Log progress.
    pub verbose: bool,
    /// Repetitions between progress messages.
    pub progress_every: usize,
    /// Base seed; drawn from the thread RNG when absent.
    pub seed: Option<u64>,
}

impl BootstrapConfig {
    /// Settings with `samples` repetitions and no covariates.
    pub fn new(samples: usize, alpha: Vec<f64>, propensity: impl Into<PropensityConfig>) -> Self {
        Self {
            samples,
            alpha,
            propensity: propensity.into(),
            covariates: Vec::new(),
            treatment: None,
            outcome: None,
            return_everything: false,
            verbose: false,
            progress_every: 10,
            seed: None,
        }
    }

    /// Covariate columns for the group estimator.
    #[must_use]
    pub fn with_covariates<S: Into<String>>(mut self, covariates: impl IntoIterator<Item = S>) -> Self {
        self.covariates = covariates.into_iter().map(Into::into).collect();
        self
    }

    /// Read treatment from `column` instead of `A`.
    #[must_use]
    pub fn with_treatment(mut self, column: impl Into<String>) -> Self {
        self.treatment = Some(column.into());
        self
    }

    /// Read outcomes from `column` instead of `Y`.
    #[must_use]
    pub fn with_outcome(mut self, column: impl Into<String>) -> Self {
        self.outcome = Some(column.into());
        self
    }

    /// Keep per-repetition detail in the result.
    #[must_use]
    pub fn with_return_everything(mut self, everything: bool) -> Self {
        self.return_everything = everything;
        self
    }

    /// Log progress at info level.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Repetitions between progress messages.
    #[must_use]
    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every;
        self
    }

    /// Fix the base seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check the settings that do not depend on the data.
    pub fn validate(&self) -> std::result::Result<PropensityStrategy, ConfigError> {
        if self.samples == 0 {
            return Err(ConfigError::NoSamples);
        }
        if self.alpha.is_empty() {
            return Err(ConfigError::EmptyAlpha);
        }
        if let Some(&bad) = self.alpha.iter().find(|a| !(a.is_finite() && **a > 0.0 && **a < 1.0)) {
            return Err(ConfigError::AlphaOutOfRange(bad));
        }
        self.propensity.resolve()
    }

    fn treatment_column(&self) -> &str {
        self.treatment.as_deref().unwrap_or(TREATMENT_COLUMN)
    }

    fn outcome_column(&self) -> &str {
        self.outcome.as_deref().unwrap_or(OUTCOME_COLUMN)
    }
}

/// Bootstrap driver.
pub struct BootVar<E = GroupIpw, P = LogProgress> {
    config: BootstrapConfig,
    estimator: E,
    progress: P,
}

impl BootVar {
    /// Driver with the default IPW estimator and log-based progress.
    pub fn new(config: BootstrapConfig) -> Self {
        let progress = LogProgress::new(config.progress_every, config.verbose);
        Self {
            config,
            estimator: GroupIpw::default(),
            progress,
        }
    }
}

/// Validated inputs shared by all repetitions.
struct Plan<'a> {
    data: &'a Dataset,
    partition: ClusterPartition,
    strategy: PropensityStrategy,
    covariates: Vec<String>,
    seed: u64,
}

impl<E: GroupEstimator, P: Progress> BootVar<E, P> {
    /// Replace the group estimator.
    pub fn with_estimator<E2: GroupEstimator>(self, estimator: E2) -> BootVar<E2, P> {
        BootVar {
            config: self.config,
            estimator,
            progress: self.progress,
        }
    }

    /// Replace the progress observer.
    pub fn with_progress<P2: Progress>(self, progress: P2) -> BootVar<E, P2> {
        BootVar {
            config: self.config,
            estimator: self.estimator,
            progress,
        }
    }

    /// Settings of this driver.
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Run all repetitions.
    ///
    /// Configuration and data are validated before the first draw. The first
    /// failing repetition aborts the run; this includes a propensity fit that
    /// meets a single-class or separated resample.
    pub fn run(&self, data: &Dataset) -> Result<BootstrapResult> {
        let plan = self.plan(data)?;
        let samples = self.config.samples;
        info!(
            "cluster bootstrap: {samples} repetitions over {} clusters, {} alpha values, seed {}",
            plan.partition.len(),
            self.config.alpha.len(),
            plan.seed
        );

        let mut result = BootstrapResult::new(
            plan.partition.len(),
            self.config.alpha.clone(),
            samples,
            self.config.return_everything,
        );
        let completed = AtomicUsize::new(0);
        let run_one = |bb: usize| -> Result<Repetition> {
            let rep = self.repetition(&plan, bb)?;
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            self.progress.repetition_done(done, samples);
            Ok(rep)
        };

        #[cfg(feature = "rayon")]
        {
            let reps = (0..samples)
                .into_par_iter()
                .map(run_one)
                .collect::<Result<Vec<_>>>()?;
            for rep in reps {
                result.insert(rep)?;
            }
        }

        #[cfg(not(feature = "rayon"))]
        {
            for bb in 0..samples {
                result.insert(run_one(bb)?)?;
            }
        }

        Ok(result)
    }

    fn plan<'a>(&self, data: &'a Dataset) -> std::result::Result<Plan<'a>, ConfigError> {
        let strategy = self.config.validate()?;
        let partition = data.partition()?;
        strategy.check_columns(data)?;
        for name in &self.config.covariates {
            data.column(name)?;
        }
        data.column(self.config.treatment_column())?;
        data.column(self.config.outcome_column())?;
        let covariates = strategy.group_covariates(&self.config.covariates)?;

        let seed = self
            .config
            .seed
            .unwrap_or_else(|| rand::thread_rng().next_u64());
        Ok(Plan {
            data,
            partition,
            strategy,
            covariates,
            seed,
        })
    }

    /// One resample, fit and estimate.
    fn repetition(&self, plan: &Plan<'_>, bb: usize) -> Result<Repetition> {
        let fail = |source: RepetitionError| Error::Repetition { repetition: bb, source };

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(plan.seed.wrapping_add(bb as u64));
        let boot = cluster_draw(plan.data, &plan.partition, &mut rng);

        let fit = plan
            .strategy
            .fit(&boot.data, &boot.partition)
            .map_err(|e| fail(e.into()))?;
        debug!("repetition {bb}: coefs {:?}, re_var {}", fit.coefs, fit.re_var);

        let input = GroupInput {
            data: &boot.data,
            covariates: &plan.covariates,
            fit: &fit,
            counterfactual: plan.strategy.counterfactual(),
            alpha: &self.config.alpha,
            partition: &boot.partition,
            estimand: Estimand::ClusterAverage,
            treatment: self.config.treatment.as_deref(),
            outcome: self.config.outcome.as_deref(),
        };
        let estimate = self.estimator.estimate(&input).map_err(|e| fail(e.into()))?;

        let expected = [boot.partition.len(), ARMS, self.config.alpha.len()];
        if estimate.yhat.shape() != expected {
            return Err(fail(
                EstimatorError::Shape {
                    expected,
                    found: estimate.yhat.shape().to_vec(),
                }
                .into(),
            ));
        }

        Ok(Repetition {
            index: bb,
            chosen: boot.chosen,
            group: estimate.yhat,
            re_var_positive: fit.has_random_effect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures;
    use crate::error::FitError;
    use crate::ipw::GroupEstimate;
    use crate::propensity::{EstimationSpec, ModelFormula, PropensityFit};
    use crate::statistics::{Mean, Statistic};
    use approx::assert_abs_diff_eq;
    use itertools::iproduct;
    use ndarray::{Array3, s};
    use std::sync::Mutex;

    fn known(re_var: f64) -> PropensityFit {
        PropensityFit::new(vec![-0.2, 0.5, -0.4], re_var)
    }

    fn config(samples: usize, propensity: impl Into<PropensityConfig>) -> BootstrapConfig {
        BootstrapConfig::new(samples, vec![0.3, 0.5, 0.7], propensity)
            .with_covariates(["x1", "x2"])
            .with_seed(17)
    }

    #[test]
    fn shapes_and_known_flags() {
        let data = fixtures::simulated(12, 5, 0.5, 1);
        let cfg = config(6, known(0.5)).with_return_everything(true);
        let res = BootVar::new(cfg).run(&data).unwrap();

        assert_eq!(res.boots.shape(), &[2, 3, 6]);
        let detail = res.detail.unwrap();
        assert_eq!(detail.all_boots.shape(), &[12, 2, 3, 6]);
        assert_eq!(detail.chosen_clusters.shape(), &[12, 6]);
        assert_eq!(detail.re_var_positive.len(), 6);
        assert!(detail.re_var_positive.iter().all(|&f| f));
        assert!(detail.chosen_clusters.iter().all(|&c| (1..=12).contains(&c)));
    }

    #[test]
    fn known_zero_variance_flags_false() {
        let data = fixtures::simulated(8, 4, 0.5, 2);
        let res = BootVar::new(config(3, known(0.0)).with_return_everything(true))
            .run(&data)
            .unwrap();
        assert!(res.detail.unwrap().re_var_positive.iter().all(|&f| !f));
    }

    #[test]
    fn population_estimate_is_mean_over_clusters() {
        let data = fixtures::simulated(10, 4, 0.5, 3);
        let res = BootVar::new(config(4, known(0.5)).with_return_everything(true))
            .run(&data)
            .unwrap();
        let all = &res.detail.as_ref().unwrap().all_boots;

        for (arm, k, bb) in iproduct!(0..2, 0..3, 0..4) {
            let slice = all.slice(s![.., arm, k, bb]).to_vec();
            let mean: f64 = Mean.compute(&slice);
            assert_abs_diff_eq!(res.boots.get([arm, k, bb]).copied().unwrap(), mean, epsilon = 1e-12);
            assert!(mean.is_finite());
        }
    }

    #[test]
    fn same_seed_reproduces_the_run() {
        let data = fixtures::simulated(10, 4, 0.5, 4);
        let cfg = config(5, known(0.5)).with_return_everything(true);
        let a = BootVar::new(cfg.clone()).run(&data).unwrap();
        let b = BootVar::new(cfg.clone()).run(&data).unwrap();
        assert_eq!(a, b);

        let c = BootVar::new(cfg.with_seed(18)).run(&data).unwrap();
        assert_ne!(
            a.detail.unwrap().chosen_clusters,
            c.detail.unwrap().chosen_clusters
        );
    }

    #[test]
    fn four_clusters_single_repetition() {
        let data = fixtures::tiny();
        let cfg = BootstrapConfig::new(1, vec![0.3, 0.7], PropensityFit::new(vec![0.1, 0.2], 0.5))
            .with_covariates(["x"])
            .with_return_everything(true)
            .with_seed(5);
        let res = BootVar::new(cfg).run(&data).unwrap();
        assert_eq!(res.boots.shape(), &[2, 2, 1]);
        assert_eq!(res.detail.unwrap().re_var_positive.to_vec(), vec![true]);
    }

    #[test]
    fn fixed_effect_fit_has_no_random_effect() {
        let data = fixtures::simulated(20, 6, 0.5, 5);
        let spec = EstimationSpec::new(ModelFormula::new("A", ["x1", "x2"]));
        let res = BootVar::new(config(3, spec).with_return_everything(true))
            .run(&data)
            .unwrap();
        assert!(res.detail.unwrap().re_var_positive.iter().all(|&f| !f));
        assert!(res.boots.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn mixed_fit_runs_end_to_end() {
        let data = fixtures::simulated(30, 8, 1.5, 6);
        let spec = EstimationSpec::new(ModelFormula::new("A", ["x1", "x2"])).with_random_intercept(true);
        let res = BootVar::new(config(2, spec).with_return_everything(true))
            .run(&data)
            .unwrap();
        assert_eq!(res.boots.shape(), &[2, 3, 2]);
        assert!(res.boots.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn invalid_configuration_is_rejected_before_resampling() {
        let data = fixtures::tiny();
        let calls = AtomicUsize::new(0);
        let counting = |_: &GroupInput<'_>| -> std::result::Result<GroupEstimate, EstimatorError> {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(EstimatorError::NonBinaryTreatment)
        };

        let run = |cfg: BootstrapConfig| BootVar::new(cfg).with_estimator(&counting).run(&data);

        let no_samples = BootstrapConfig::new(0, vec![0.5], known(0.0));
        assert!(matches!(run(no_samples), Err(Error::Config(ConfigError::NoSamples))));

        let no_alpha = BootstrapConfig::new(3, vec![], known(0.0));
        assert!(matches!(run(no_alpha), Err(Error::Config(ConfigError::EmptyAlpha))));

        let bad_alpha = BootstrapConfig::new(3, vec![0.5, 1.0], known(0.0));
        assert!(matches!(run(bad_alpha), Err(Error::Config(ConfigError::AlphaOutOfRange(_)))));

        let mut missing = BootstrapConfig::new(3, vec![0.5], known(0.0));
        missing.propensity.true_model = None;
        assert!(matches!(run(missing), Err(Error::Config(ConfigError::MissingTrueModel))));

        let bad_column = BootstrapConfig::new(3, vec![0.5], known(0.0)).with_covariates(["nope"]);
        assert!(matches!(run(bad_column), Err(Error::Config(ConfigError::UnknownColumn(_)))));

        let gappy = Dataset::new(vec![1, 3]);
        assert!(matches!(
            BootVar::new(BootstrapConfig::new(1, vec![0.5], known(0.0))).run(&gappy),
            Err(Error::Config(ConfigError::MissingCluster(2)))
        ));

        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn ragged_dataset_is_rejected_before_resampling() {
        let ragged = Dataset::from_parts(
            vec![1, 1, 2, 2],
            vec!["A".into(), "Y".into()],
            vec![vec![1.0, 0.0, 1.0, 0.0], vec![1.0, 2.0]],
        );
        let cfg = BootstrapConfig::new(2, vec![0.5], PropensityFit::fixed(vec![0.0])).with_seed(1);
        assert!(matches!(
            BootVar::new(cfg).run(&ragged),
            Err(Error::Config(ConfigError::ColumnLength { expected: 4, found: 2, .. }))
        ));
    }

    #[test]
    fn known_coefficients_must_match_covariates() {
        let data = fixtures::tiny();
        let cfg = BootstrapConfig::new(2, vec![0.5], known(0.5)).with_covariates(["x"]);
        assert!(matches!(
            BootVar::new(cfg).run(&data),
            Err(Error::Config(ConfigError::CoefficientLength {
                expected: 2,
                found: 3,
                ..
            }))
        ));
    }

    #[test]
    fn estimated_covariates_default_to_the_predictors() {
        let data = fixtures::simulated(12, 5, 0.5, 7);
        let spec = EstimationSpec::new(ModelFormula::new("A", ["x1", "x2"]));

        let swapped = BootstrapConfig::new(2, vec![0.5], spec.clone())
            .with_covariates(["x2", "x1"])
            .with_seed(3);
        assert!(matches!(
            BootVar::new(swapped).run(&data),
            Err(Error::Config(ConfigError::CovariateMismatch { .. }))
        ));

        let implicit = BootstrapConfig::new(2, vec![0.5], spec.clone()).with_seed(3);
        let explicit = implicit.clone().with_covariates(["x1", "x2"]);
        let seen = Mutex::new(Vec::new());
        let recording = |inp: &GroupInput<'_>| {
            seen.lock().unwrap().push(inp.covariates.to_vec());
            GroupIpw::new().estimate(inp)
        };
        let a = BootVar::new(implicit).with_estimator(&recording).run(&data).unwrap();
        let b = BootVar::new(explicit).run(&data).unwrap();
        assert_eq!(a, b);
        let expected = vec!["x1".to_string(), "x2".to_string()];
        assert!(seen.into_inner().unwrap().iter().all(|c| *c == expected));
    }

    #[test]
    fn failures_abort_with_repetition_index() {
        let data = fixtures::tiny();
        let cfg = BootstrapConfig::new(3, vec![0.5], PropensityFit::fixed(vec![0.0, 0.0])).with_covariates(["x"]);
        let failing = |_: &GroupInput<'_>| -> std::result::Result<GroupEstimate, EstimatorError> {
            Err(EstimatorError::NonBinaryTreatment)
        };
        match BootVar::new(cfg).with_estimator(failing).run(&data) {
            Err(Error::Repetition { repetition, source }) => {
                assert!(repetition < 3);
                assert_eq!(source, RepetitionError::Estimator(EstimatorError::NonBinaryTreatment));
            }
            other => panic!("expected repetition failure, got {other:?}"),
        }
    }

    #[test]
    fn fit_failures_propagate() {
        // Treatment equals the covariate sign: perfectly separated on every resample.
        let data = Dataset::new(vec![1, 1, 2, 2, 3, 3])
            .with_column("x", vec![-1.0, 1.0, -2.0, 2.0, -0.5, 0.5])
            .and_then(|d| d.with_column("A", vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]))
            .and_then(|d| d.with_column("Y", vec![1.0; 6]))
            .unwrap();
        let spec = EstimationSpec::new(ModelFormula::new("A", ["x"]));
        let cfg = BootstrapConfig::new(2, vec![0.5], spec).with_covariates(["x"]).with_seed(1);
        let err = BootVar::new(cfg).run(&data).unwrap_err();
        assert!(matches!(
            err,
            Error::Repetition {
                source: RepetitionError::Fit(FitError::PerfectSeparation),
                ..
            }
        ));
    }

    #[test]
    fn custom_estimator_receives_driver_inputs() {
        let data = fixtures::tiny();
        let cfg = BootstrapConfig::new(2, vec![0.4, 0.6], PropensityFit::new(vec![0.0, 0.3], 0.2))
            .with_covariates(["x"])
            .with_treatment("A")
            .with_seed(3);
        let estimator = |inp: &GroupInput<'_>| -> std::result::Result<GroupEstimate, EstimatorError> {
            assert_eq!(inp.estimand, Estimand::ClusterAverage);
            assert_eq!(inp.counterfactual, None);
            assert_eq!(inp.treatment, Some("A"));
            assert_eq!(inp.partition.len(), 4);
            assert_eq!(inp.data.n_clusters(), 4);
            Ok(GroupEstimate {
                yhat: Array3::from_shape_fn((4, 2, 2), |(c, a, k)| (c + a + k) as f64),
                re_alpha: None,
            })
        };
        let res = BootVar::new(cfg).with_estimator(estimator).run(&data).unwrap();
        // mean over c of c + a + k = 1.5 + a + k
        assert_abs_diff_eq!(res.boots.get([1, 1, 0]).copied().unwrap(), 3.5, epsilon = 1e-12);
        assert_abs_diff_eq!(res.boots.get([0, 0, 1]).copied().unwrap(), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn wrong_shape_is_an_estimator_error() {
        let data = fixtures::tiny();
        let cfg = BootstrapConfig::new(1, vec![0.5], PropensityFit::fixed(vec![0.0, 0.0])).with_covariates(["x"]);
        let estimator = |_: &GroupInput<'_>| -> std::result::Result<GroupEstimate, EstimatorError> {
            Ok(GroupEstimate {
                yhat: Array3::zeros((3, 2, 1)),
                re_alpha: None,
            })
        };
        assert!(matches!(
            BootVar::new(cfg).with_estimator(estimator).run(&data),
            Err(Error::Repetition {
                source: RepetitionError::Estimator(EstimatorError::Shape { .. }),
                ..
            })
        ));
    }

    #[test]
    fn progress_observer_sees_every_repetition() {
        let data = fixtures::tiny();
        let seen = Mutex::new(Vec::new());
        let cfg = BootstrapConfig::new(4, vec![0.5], PropensityFit::fixed(vec![0.0, 0.0]))
            .with_covariates(["x"])
            .with_seed(9);
        let with_observer = BootVar::new(cfg.clone())
            .with_progress(|done: usize, total: usize| seen.lock().unwrap().push((done, total)))
            .run(&data)
            .unwrap();
        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);

        let silent = BootVar::new(cfg).with_progress(Silent).run(&data).unwrap();
        assert_eq!(with_observer, silent);
    }
}
