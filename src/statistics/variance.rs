use num_traits::{Float, FromPrimitive};

use super::{Mean, Statistic};

/// Variance with a degrees-of-freedom adjustment.
///
/// The bootstrap variance of an estimator is the sample variance
/// (`ddof = 1`) of its replicates.
#[derive(Debug, Clone, Copy)]
pub struct Variance {
    /// Subtracted from `n` in the denominator.
    pub ddof: usize,
}

impl Variance {
    /// - `ddof = 0`: population variance
    /// - `ddof = 1`: sample variance (Bessel's correction), the default
    pub fn new(ddof: usize) -> Self {
        Variance { ddof }
    }
}

impl Default for Variance {
    fn default() -> Self {
        Variance { ddof: 1 }
    }
}

impl<D, T> Statistic<D, T> for Variance
where
    D: AsRef<[T]> + ?Sized,
    T: Float + FromPrimitive,
{
    fn compute(&self, data: &D) -> T {
        let slice = data.as_ref();
        if slice.len() <= self.ddof {
            return T::nan();
        }

        let mean: T = Mean.compute(slice);

        let mut sq_sum = T::zero();
        let mut c = T::zero();
        for &x in slice {
            let dev = x - mean;
            let y = dev * dev - c;
            let t = sq_sum + y;
            c = (t - sq_sum) - y;
            sq_sum = t;
        }

        match T::from_usize(slice.len() - self.ddof) {
            Some(dof) => sq_sum / dof,
            None => T::nan(),
        }
    }
}
