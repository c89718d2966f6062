//! Statistics of bootstrap replicates.

mod interval;
mod mean;
mod quantile;
mod variance;

pub use interval::Interval;
pub use mean::Mean;
pub use quantile::{quantile_linear, quantile_linear_sorted};
pub use variance::Variance;

/// A functional of a data set.
pub trait Statistic<D: ?Sized, T> {
    /// Evaluate the statistic on `data`.
    fn compute(&self, data: &D) -> T;
}

// ===== 2-tuple: evaluate both on the same data =====
impl<D, T1, T2, S1, S2> Statistic<D, (T1, T2)> for (S1, S2)
where
    D: ?Sized,
    S1: Statistic<D, T1>,
    S2: Statistic<D, T2>,
{
    #[inline]
    fn compute(&self, data: &D) -> (T1, T2) {
        (self.0.compute(data), self.1.compute(data))
    }
}
