use std::fmt;

use serde::{Deserialize, Serialize};

/// Statistical interval with optional estimate and confidence level.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct Interval {
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
    /// Point estimate the interval surrounds.
    pub estimate: Option<f64>,
    /// Nominal coverage.
    pub confidence: Option<f64>,
}

impl Interval {
    /// Create an interval; bounds are reordered if given backwards.
    #[inline]
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            lower: lower.min(upper),
            upper: lower.max(upper),
            estimate: None,
            confidence: None,
        }
    }

    /// `[estimate - error, estimate + error]`.
    #[inline]
    pub fn symmetric(estimate: f64, error: f64) -> Self {
        Self::new(estimate - error, estimate + error).estimate(estimate)
    }

    /// Fluent builder: attach point estimate.
    #[must_use]
    pub const fn estimate(mut self, estimate: f64) -> Self {
        self.estimate = Some(estimate);
        self
    }

    /// Fluent builder: attach confidence level.
    #[must_use]
    pub const fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Check if value lies within `[lower, upper]`.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    /// `upper - lower`.
    #[inline]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Interval with NaN bounds.
    pub fn nan() -> Self {
        Self {
            lower: f64::NAN,
            upper: f64::NAN,
            estimate: None,
            confidence: None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = f.precision().unwrap_or(4);
        write!(f, "[{:.*}, {:.*}]", digits, self.lower, digits, self.upper)
    }
}
