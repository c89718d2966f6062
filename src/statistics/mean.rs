use num_traits::{Float, FromPrimitive};

use super::Statistic;

/// Arithmetic mean with **Kahan summation**.
///
/// Population-level bootstrap estimates are means over clusters of
/// group-level estimates; compensated summation keeps them independent of
/// how many clusters are averaged. An empty slice yields NaN.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mean;

impl<D, T> Statistic<D, T> for Mean
where
    D: AsRef<[T]> + ?Sized,
    T: Float + FromPrimitive,
{
    fn compute(&self, data: &D) -> T {
        let slice: &[T] = data.as_ref();

        let mut sum = T::zero();
        let mut c = T::zero();
        for &x in slice {
            let y = x - c;
            let t = sum + y;
            c = (t - sum) - y;
            sum = t;
        }

        match T::from_usize(slice.len()) {
            Some(n) => sum / n,
            None => T::nan(),
        }
    }
}
