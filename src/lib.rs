//! Cluster-bootstrap variance for inverse-probability-weighted estimators
//! of potential outcomes under interference.
//!
//! Units are grouped into clusters (neighbourhoods) within which treatment
//! of one unit may affect the outcomes of others. [`BootVar`] resamples
//! whole clusters with replacement, refits the propensity model on every
//! resample and recomputes the group-level IPW estimates, giving the
//! bootstrap distribution of the population-level potential outcomes for
//! each counterfactual allocation `α`.
//!
//! ```no_run
//! use interference::{BootVar, BootstrapConfig, Dataset, EstimationSpec, ModelFormula};
//!
//! let data = Dataset::read("neighbourhoods.csv")?;
//! let spec = EstimationSpec::new(ModelFormula::new("A", ["x1", "x2"])).with_random_intercept(true);
//! let config = BootstrapConfig::new(500, vec![0.3, 0.5, 0.7], spec)
//!     .with_covariates(["x1", "x2"])
//!     .with_seed(2024);
//! let result = BootVar::new(config).run(&data)?;
//! println!("{}", result.summary(0.95));
//! # Ok::<(), interference::Error>(())
//! ```

pub mod bootvar;
pub mod data;
mod display;
pub mod error;
pub mod ipw;
pub mod math;
pub mod optim;
pub mod propensity;
pub mod resample;
pub mod statistics;
pub mod summary;

pub use bootvar::{BootVar, BootstrapConfig, BootstrapResult, LogProgress, Progress, Silent};
pub use data::{ClusterPartition, Dataset};
pub use error::{ConfigError, Error, EstimatorError, FitError, MergeError, ReadError, Result};
pub use ipw::{Estimand, GroupEstimate, GroupEstimator, GroupInput, GroupIpw};
pub use propensity::{
    EstimationSpec, FittingControl, ModelFormula, Optimizer, PropensityConfig, PropensityFit, PropensityStrategy, PsMode,
};
pub use resample::{BootSample, ClusterBootstrap, Re, cluster_draw};
pub use statistics::{Interval, Mean, Statistic, Variance};
pub use summary::BootstrapSummary;

pub use rand;
