use ndarray::{Array1, Array2, Array3, Array4, s};
use serde::{Deserialize, Serialize};

use crate::error::MergeError;
use crate::ipw::ARMS;
use crate::statistics::{Mean, Statistic};

/// Output of one bootstrap repetition.
#[derive(Debug, Clone, PartialEq)]
pub struct Repetition {
    /// 0-based repetition index.
    pub index: usize,
    /// Original ids of the drawn clusters.
    pub chosen: Vec<usize>,
    /// Group estimates `[cluster, arm, alpha]`.
    pub group: Array3<f64>,
    /// Whether the random-effect variance used was strictly positive.
    pub re_var_positive: bool,
}

/// Per-repetition detail kept when everything is requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapDetail {
    /// `[cluster, arm, alpha, repetition]`.
    pub all_boots: Array4<f64>,
    /// Original cluster ids drawn, `[cluster, repetition]`.
    pub chosen_clusters: Array2<usize>,
    /// `[repetition]`.
    pub re_var_positive: Array1<bool>,
}

/// Bootstrap distribution of the population-level estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapResult {
    /// Allocation strategies, in output order.
    pub alpha: Vec<f64>,
    /// Population estimates `[arm, alpha, repetition]`.
    pub boots: Array3<f64>,
    /// Per-repetition detail, when requested.
    pub detail: Option<BootstrapDetail>,
}

impl BootstrapResult {
    /// Allocate all slots; entries stay NaN until their repetition is inserted.
    pub fn new(n_clusters: usize, alpha: Vec<f64>, samples: usize, keep_detail: bool) -> Self {
        let n_alpha = alpha.len();
        let detail = keep_detail.then(|| BootstrapDetail {
            all_boots: Array4::from_elem((n_clusters, ARMS, n_alpha, samples), f64::NAN),
            chosen_clusters: Array2::zeros((n_clusters, samples)),
            re_var_positive: Array1::from_elem(samples, false),
        });
        Self {
            boots: Array3::from_elem((ARMS, n_alpha, samples), f64::NAN),
            alpha,
            detail,
        }
    }

    /// Number of repetitions.
    pub fn samples(&self) -> usize {
        self.boots.dim().2
    }

    fn check(&self, rep: &Repetition) -> Result<(), MergeError> {
        let samples = self.samples();
        if rep.index >= samples {
            return Err(MergeError::IndexOutOfRange {
                index: rep.index,
                samples,
            });
        }
        let (clusters, arms, n_alpha) = rep.group.dim();
        let expected_clusters = self.detail.as_ref().map_or(clusters, |d| d.all_boots.dim().0);
        let expected = [expected_clusters, ARMS, self.alpha.len()];
        if [clusters, arms, n_alpha] != expected {
            return Err(MergeError::Shape {
                what: "group estimate",
                expected: expected.to_vec(),
                found: vec![clusters, arms, n_alpha],
            });
        }
        if self.detail.is_some() && rep.chosen.len() != expected_clusters {
            return Err(MergeError::Shape {
                what: "chosen clusters",
                expected: vec![expected_clusters],
                found: vec![rep.chosen.len()],
            });
        }
        Ok(())
    }

    /// Write one repetition into its slot.
    ///
    /// The population estimate is the mean over clusters of each
    /// `(arm, alpha)` slice of the group array. A repetition whose index or
    /// shapes do not match the allocated slots is rejected untouched.
    pub fn insert(&mut self, rep: Repetition) -> Result<(), MergeError> {
        self.check(&rep)?;
        let idx = rep.index;

        for ((arm, k), slot) in self.boots.slice_mut(s![.., .., idx]).indexed_iter_mut() {
            let slice = rep.group.slice(s![.., arm, k]).to_vec();
            *slot = Mean.compute(&slice);
        }

        if let Some(detail) = self.detail.as_mut() {
            detail.all_boots.slice_mut(s![.., .., .., idx]).assign(&rep.group);
            detail
                .chosen_clusters
                .column_mut(idx)
                .assign(&Array1::from(rep.chosen));
            if let Some(flag) = detail.re_var_positive.get_mut(idx) {
                *flag = rep.re_var_positive;
            }
        }
        Ok(())
    }

    /// Bootstrap replicates of one `(arm, alpha)` estimate; empty when
    /// either index is out of range.
    pub fn replicates(&self, arm: usize, alpha_index: usize) -> Vec<f64> {
        if arm >= ARMS || alpha_index >= self.alpha.len() {
            return Vec::new();
        }
        self.boots.slice(s![arm, alpha_index, ..]).to_vec()
    }
}
