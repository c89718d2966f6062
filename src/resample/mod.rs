//! Resampling schemes.

pub use rand::Rng;

/// A resampling scheme: turns one data set into a stream of resamples.
pub trait Re<T> {
    /// Resample type.
    type Item;
    /// Endless iterator of resamples of `t`.
    fn re(&self, t: &T) -> impl Iterator<Item = Self::Item>;
}

mod cluster;

pub use cluster::{BootSample, ClusterBootstrap, ClusterBootstrapIter, cluster_draw};
