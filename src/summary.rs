//! Summaries of a bootstrap distribution.
//!
//! Besides the arm-specific potential outcomes, two contrasts are computed
//! replicate by replicate: the direct effect `Y(1; α) - Y(0; α)` and the
//! indirect effect `Y(0; α) - Y(0; α_ref)` against the first allocation.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::bootvar::BootstrapResult;
use crate::statistics::{Interval, Mean, Statistic, Variance, quantile_linear_sorted};

/// What a summary row describes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Quantity {
    /// Population potential outcome under treatment arm `arm`.
    Outcome {
        /// 0 for control, 1 for treated.
        arm: usize,
    },
    /// `Y(1; α) - Y(0; α)`.
    Direct,
    /// `Y(0; α) - Y(0; reference)`.
    Indirect {
        /// Allocation of the reference outcome.
        reference: f64,
    },
}

/// Moments and intervals of one set of bootstrap replicates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimateSummary {
    /// Mean of the replicates.
    pub mean: f64,
    /// Bootstrap variance (`ddof = 1`).
    pub variance: f64,
    /// Bootstrap standard error, the square root of `variance`.
    pub se: f64,
    /// Empirical quantile interval.
    pub percentile: Interval,
    /// `mean ± z · se`.
    pub normal: Interval,
}

impl EstimateSummary {
    /// Summarise `replicates` at confidence `level`.
    ///
    /// Intervals are NaN when `level` is outside `(0, 1)`.
    pub fn from_replicates(replicates: &[f64], level: f64) -> Self {
        let (mean, variance): (f64, f64) = (Mean, Variance::default()).compute(replicates);
        let se = variance.sqrt();

        let tail = (1.0 - level) / 2.0;
        let z = Normal::new(0.0, 1.0)
            .ok()
            .filter(|_| level > 0.0 && level < 1.0)
            .map_or(f64::NAN, |n| n.inverse_cdf(1.0 - tail));

        let mut sorted = replicates.to_vec();
        sorted.sort_by(f64::total_cmp);
        let percentile = if z.is_nan() {
            Interval::nan()
        } else {
            Interval::new(
                quantile_linear_sorted(&sorted, tail),
                quantile_linear_sorted(&sorted, 1.0 - tail),
            )
            .estimate(mean)
            .confidence(level)
        };
        let normal = if z.is_nan() {
            Interval::nan()
        } else {
            Interval::symmetric(mean, z * se).confidence(level)
        };

        Self {
            mean,
            variance,
            se,
            percentile,
            normal,
        }
    }
}

/// One row of a [`BootstrapSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// Quantity summarised.
    pub quantity: Quantity,
    /// Allocation of the row.
    pub alpha: f64,
    /// Moments and intervals.
    pub stats: EstimateSummary,
}

/// Per-allocation summary of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSummary {
    /// Confidence level of the intervals.
    pub level: f64,
    /// Repetitions summarised.
    pub samples: usize,
    /// Outcomes by arm, then direct effects, then indirect effects.
    pub rows: Vec<SummaryRow>,
}

impl BootstrapSummary {
    /// Rows of one quantity, in allocation order.
    pub fn quantity(&self, quantity: Quantity) -> impl Iterator<Item = &SummaryRow> {
        self.rows.iter().filter(move |r| r.quantity == quantity)
    }
}

impl BootstrapResult {
    /// Summarise every potential outcome and effect at confidence `level`.
    pub fn summary(&self, level: f64) -> BootstrapSummary {
        let mut rows = Vec::new();
        let reference = self.alpha.first().copied();

        for arm in 0..2 {
            for (k, &alpha) in self.alpha.iter().enumerate() {
                rows.push(SummaryRow {
                    quantity: Quantity::Outcome { arm },
                    alpha,
                    stats: EstimateSummary::from_replicates(&self.replicates(arm, k), level),
                });
            }
        }

        for (k, &alpha) in self.alpha.iter().enumerate() {
            let treated = self.replicates(1, k);
            let control = self.replicates(0, k);
            let direct: Vec<f64> = treated.iter().zip(&control).map(|(t, c)| t - c).collect();
            rows.push(SummaryRow {
                quantity: Quantity::Direct,
                alpha,
                stats: EstimateSummary::from_replicates(&direct, level),
            });
        }

        if let Some(reference) = reference {
            let base = self.replicates(0, 0);
            for (k, &alpha) in self.alpha.iter().enumerate().skip(1) {
                let indirect: Vec<f64> = self
                    .replicates(0, k)
                    .iter()
                    .zip(&base)
                    .map(|(y, b)| y - b)
                    .collect();
                rows.push(SummaryRow {
                    quantity: Quantity::Indirect { reference },
                    alpha,
                    stats: EstimateSummary::from_replicates(&indirect, level),
                });
            }
        }

        BootstrapSummary {
            level,
            samples: self.samples(),
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootvar::Repetition;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn result() -> BootstrapResult {
        let mut res = BootstrapResult::new(2, vec![0.3, 0.6], 4, false);
        for bb in 0..4 {
            let shift = bb as f64;
            res.insert(Repetition {
                index: bb,
                chosen: vec![1, 2],
                // cluster mean = shift + 2a + 5k
                group: Array3::from_shape_fn((2, 2, 2), |(c, a, k)| {
                    shift + 2.0 * a as f64 + 5.0 * k as f64 + if c == 0 { -1.0 } else { 1.0 }
                }),
                re_var_positive: false,
            })
            .unwrap();
        }
        res
    }

    #[test]
    fn moments_of_replicates() {
        let s = EstimateSummary::from_replicates(&[1.0, 2.0, 3.0, 4.0], 0.9);
        assert_abs_diff_eq!(s.mean, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(s.variance, 5.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.se, (5.0_f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(s.percentile.lower, 1.15, epsilon = 1e-12);
        assert_abs_diff_eq!(s.percentile.upper, 3.85, epsilon = 1e-12);
        assert_abs_diff_eq!(s.normal.upper - s.mean, 1.6448536 * s.se, epsilon = 1e-6);
        assert_eq!(s.normal.confidence, Some(0.9));
    }

    #[test]
    fn invalid_level_gives_nan_intervals() {
        let s = EstimateSummary::from_replicates(&[1.0, 2.0], 1.5);
        assert!(s.percentile.lower.is_nan() && s.normal.upper.is_nan());
        assert_abs_diff_eq!(s.mean, 1.5, epsilon = 1e-12);
    }

    #[test]
    fn effects_are_replicatewise_contrasts() {
        let summary = result().summary(0.95);
        assert_eq!(summary.samples, 4);
        assert_eq!(summary.rows.len(), 4 + 2 + 1);

        let outcomes: Vec<f64> = summary
            .quantity(Quantity::Outcome { arm: 1 })
            .map(|r| r.stats.mean)
            .collect();
        assert_eq!(outcomes.len(), 2);
        for (got, want) in outcomes.iter().zip([1.5 + 2.0, 1.5 + 7.0]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
        }

        for row in summary.quantity(Quantity::Direct) {
            assert_abs_diff_eq!(row.stats.mean, 2.0, epsilon = 1e-12);
            assert_abs_diff_eq!(row.stats.variance, 0.0, epsilon = 1e-12);
        }
        let indirect: Vec<_> = summary.quantity(Quantity::Indirect { reference: 0.3 }).collect();
        let [row] = indirect.as_slice() else {
            panic!("expected one indirect row, got {}", indirect.len());
        };
        assert_abs_diff_eq!(row.alpha, 0.6);
        assert_abs_diff_eq!(row.stats.mean, 5.0, epsilon = 1e-12);
    }
}
