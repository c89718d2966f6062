//! Error types.
//!
//! Configuration problems are reported before any resampling happens.
//! Failures inside a repetition are wrapped with the repetition index and
//! abort the whole run.

use thiserror::Error;

/// A referenced column is absent from the dataset.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown column '{0}'")]
pub struct MissingColumn(pub String);

/// Invalid configuration or malformed input data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// `samples` (B) must be at least one.
    #[error("number of bootstrap samples must be at least 1")]
    NoSamples,

    /// No allocation strategies were requested.
    #[error("alpha values must not be empty")]
    EmptyAlpha,

    /// Allocation strategies are probabilities in the open unit interval.
    #[error("alpha value {0} is outside (0, 1)")]
    AlphaOutOfRange(f64),

    /// Known-propensity mode without the true model parameters.
    #[error("known propensity mode requires the true model parameters")]
    MissingTrueModel,

    /// Estimated-propensity mode without an estimation spec.
    #[error("estimated propensity mode requires an estimation spec")]
    MissingEstimationSpec,

    /// A known random-effect variance must be finite and non-negative.
    #[error("random-effect variance {0} must be finite and non-negative")]
    InvalidReVar(f64),

    /// The dataset has no rows.
    #[error("dataset contains no records")]
    EmptyDataset,

    /// Cluster ids are 1-based.
    #[error("row {row}: cluster id 0 is outside 1..=n_clusters")]
    ZeroClusterId {
        /// Offending row.
        row: usize,
    },

    /// Cluster ids must cover `1..=n_clusters` without gaps.
    #[error("cluster {0} has no records; cluster ids must be contiguous")]
    MissingCluster(usize),

    /// A referenced column does not exist.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// A column has a different number of rows than the dataset.
    #[error("column '{name}' has {found} values, expected {expected}")]
    ColumnLength {
        /// Column name.
        name: String,
        /// Dataset row count.
        expected: usize,
        /// Column length.
        found: usize,
    },

    /// A column name was added twice.
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    /// Column names and column data disagree in number.
    #[error("{names} column names for {columns} columns")]
    ColumnCount {
        /// Names supplied.
        names: usize,
        /// Columns supplied.
        columns: usize,
    },

    /// A coefficient vector does not match `1 + covariates`.
    #[error("{what} has {found} coefficients, expected {expected}")]
    CoefficientLength {
        /// Which coefficient vector.
        what: &'static str,
        /// Intercept plus covariates.
        expected: usize,
        /// Supplied length.
        found: usize,
    },

    /// Estimated coefficients would be applied to different covariates.
    #[error("covariates {covariates:?} do not match the model predictors {predictors:?}")]
    CovariateMismatch {
        /// Covariates handed to the group estimator.
        covariates: Vec<String>,
        /// Predictors of the fitted model, in coefficient order.
        predictors: Vec<String>,
    },
}

/// Propensity-model fitting failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// The response is not coded 0/1.
    #[error("response must contain only 0 and 1 values")]
    NonBinaryResponse,

    /// All responses are identical.
    #[error("response must contain both 0 and 1 values")]
    DegenerateResponse,

    /// Fitted probabilities collapsed to 0 or 1.
    #[error("perfect separation detected; logistic regression cannot converge")]
    PerfectSeparation,

    /// The information matrix could not be factorised.
    #[error("information matrix is singular; check for collinearity")]
    SingularHessian,

    /// Iteration budget exhausted.
    #[error("fit did not converge after {iterations} iterations")]
    NotConverged {
        /// Iterations performed.
        iterations: u64,
    },

    /// The optimizer itself failed.
    #[error("optimizer failed: {0}")]
    Optimizer(String),

    /// A model column is absent from the dataset.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// A partition refers to a row the design does not have.
    #[error("row {row} is outside a design with {rows} rows")]
    RowOutOfBounds {
        /// Offending row.
        row: usize,
        /// Design rows.
        rows: usize,
    },

    /// Design and response disagree in size.
    #[error("design has {rows} rows but response has {found} values")]
    Dimension {
        /// Design rows.
        rows: usize,
        /// Response length.
        found: usize,
    },
}

/// Group IPW estimator failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimatorError {
    /// A referenced column does not exist.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// Coefficient vector does not match `1 + covariates`.
    #[error("{what} has {found} coefficients, expected {expected}")]
    CoefficientLength {
        /// Which coefficient vector.
        what: &'static str,
        /// Intercept plus covariates.
        expected: usize,
        /// Supplied length.
        found: usize,
    },

    /// Treatment column is not coded 0/1.
    #[error("treatment must contain only 0 and 1 values")]
    NonBinaryTreatment,

    /// No random intercept within the bound reproduces the requested alpha.
    #[error("cluster {cluster}: alpha {alpha} is not reachable within ±{bound}")]
    AlphaUnreachable {
        /// Cluster (1-based).
        cluster: usize,
        /// Requested allocation.
        alpha: f64,
        /// Search bound.
        bound: f64,
    },

    /// A cluster of the partition is empty.
    #[error("cluster {0} has no records")]
    EmptyCluster(usize),

    /// The partition refers to rows the dataset does not have.
    #[error("cluster {0} refers to rows outside the dataset")]
    RowOutOfBounds(usize),

    /// The estimate is not shaped `[cluster, arm, alpha]`.
    #[error("group estimate has shape {found:?}, expected {expected:?}")]
    Shape {
        /// `[n_clusters, 2, n_alpha]`.
        expected: [usize; 3],
        /// Returned shape.
        found: Vec<usize>,
    },
}

impl From<MissingColumn> for ConfigError {
    fn from(e: MissingColumn) -> Self {
        ConfigError::UnknownColumn(e.0)
    }
}

impl From<MissingColumn> for FitError {
    fn from(e: MissingColumn) -> Self {
        FitError::UnknownColumn(e.0)
    }
}

impl From<MissingColumn> for EstimatorError {
    fn from(e: MissingColumn) -> Self {
        EstimatorError::UnknownColumn(e.0)
    }
}

/// Failure while reading a dataset.
#[derive(Error, Debug)]
pub enum ReadError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV syntax failure.
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// The file has a header but no records.
    #[error("CSV file contains no data records")]
    EmptyFile,

    /// The cluster column is absent from the header.
    #[error("CSV file has no '{0}' column")]
    MissingClusterColumn(String),

    /// A field could not be parsed as a number.
    #[error("record {record}, column '{column}': cannot parse '{value}'")]
    Value {
        /// 1-based record number.
        record: usize,
        /// Column name.
        column: String,
        /// Raw field.
        value: String,
    },

    /// The parsed data violates a dataset invariant.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure of a single bootstrap repetition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepetitionError {
    /// Propensity fit failed.
    #[error(transparent)]
    Fit(#[from] FitError),

    /// Group estimator failed.
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
}

/// A repetition does not fit the slots of a [`BootstrapResult`](crate::BootstrapResult).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// The repetition index has no slot.
    #[error("repetition {index} is outside 0..{samples}")]
    IndexOutOfRange {
        /// Repetition index.
        index: usize,
        /// Allocated repetitions.
        samples: usize,
    },

    /// An array of the repetition has the wrong shape.
    #[error("{what} has shape {found:?}, expected {expected:?}")]
    Shape {
        /// Which part of the repetition.
        what: &'static str,
        /// Shape of the allocated slot.
        expected: Vec<usize>,
        /// Shape supplied.
        found: Vec<usize>,
    },
}

/// Top-level error.
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected before resampling.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dataset input failed.
    #[error("read error: {0}")]
    Read(#[from] ReadError),

    /// A repetition failed; the run is aborted.
    #[error("bootstrap repetition {repetition} failed: {source}")]
    Repetition {
        /// 0-based repetition index.
        repetition: usize,
        /// Cause.
        #[source]
        source: RepetitionError,
    },

    /// A repetition could not be stored.
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),
}

/// Result alias.
pub type Result<T> = std::result::Result<T, Error>;
