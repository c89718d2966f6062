use rand::Rng;

use super::Re;
use crate::data::{ClusterPartition, Dataset};

/// One cluster-bootstrap resample.
#[derive(Debug, Clone, PartialEq)]
pub struct BootSample {
    /// Records of the drawn clusters, concatenated in draw order. The
    /// cluster drawn at position `k` carries synthetic id `k + 1`.
    pub data: Dataset,
    /// Original ids of the drawn clusters, in draw order.
    pub chosen: Vec<usize>,
    /// Rows of each synthetic cluster within `data`.
    pub partition: ClusterPartition,
}

/// Draw `n_clusters` clusters uniformly with replacement.
///
/// Duplicated draws of the same original cluster become distinct synthetic
/// clusters, so a random-intercept model refitted on the resample treats
/// them as independent groups. `partition` is the one returned by
/// [`Dataset::partition`]; rows it names beyond the data come out as NaN.
pub fn cluster_draw<R: Rng + ?Sized>(data: &Dataset, partition: &ClusterPartition, rng: &mut R) -> BootSample {
    let n = partition.len();
    if n == 0 {
        return BootSample {
            data: Dataset::from_parts(Vec::new(), data.column_names().to_vec(), vec![Vec::new(); data.columns().len()]),
            chosen: Vec::new(),
            partition: ClusterPartition::default(),
        };
    }

    let chosen: Vec<usize> = (0..n).map(|_| rng.gen_range(1..=n)).collect();
    let groups: Vec<&[usize]> = chosen
        .iter()
        .map(|&id| partition.rows(id - 1).unwrap_or_default())
        .collect();
    let total: usize = groups.iter().map(|g| g.len()).sum();

    let mut clusters = Vec::with_capacity(total);
    let mut columns: Vec<Vec<f64>> = (0..data.columns().len()).map(|_| Vec::with_capacity(total)).collect();
    let mut synthetic = Vec::with_capacity(n);

    for (pos, rows) in groups.iter().enumerate() {
        let start = clusters.len();
        clusters.extend(std::iter::repeat_n(pos + 1, rows.len()));
        synthetic.push((start..start + rows.len()).collect());
        for (dst, src) in columns.iter_mut().zip(data.columns()) {
            dst.extend(rows.iter().map(|&r| src.get(r).copied().unwrap_or(f64::NAN)));
        }
    }

    BootSample {
        data: Dataset::from_parts(clusters, data.column_names().to_vec(), columns),
        chosen,
        partition: ClusterPartition::new(synthetic),
    }
}

/// Cluster bootstrap as a resampling scheme.
#[derive(Clone, Copy, Default)]
pub struct ClusterBootstrap<R: Rng> {
    /// Random source; cloned into every iterator.
    pub rng: R,
}

impl<R: Rng> ClusterBootstrap<R> {
    /// Wrap a random source.
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng + Clone> Re<Dataset> for ClusterBootstrap<R> {
    type Item = BootSample;

    /// Yields nothing when the dataset's cluster ids are invalid.
    fn re(&self, data: &Dataset) -> impl Iterator<Item = Self::Item> {
        ClusterBootstrapIter::new(data, self.rng.clone())
    }
}

/// Iterator behind [`ClusterBootstrap`].
pub struct ClusterBootstrapIter<'a, R: Rng> {
    data: &'a Dataset,
    partition: ClusterPartition,
    rng: R,
}

impl<'a, R: Rng> ClusterBootstrapIter<'a, R> {
    fn new(data: &'a Dataset, rng: R) -> Self {
        Self {
            partition: data.partition().unwrap_or_default(),
            data,
            rng,
        }
    }
}

impl<R: Rng> Iterator for ClusterBootstrapIter<'_, R> {
    type Item = BootSample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.partition.is_empty() {
            return None;
        }
        Some(cluster_draw(self.data, &self.partition, &mut self.rng))
    }
}
