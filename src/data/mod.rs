//! Clustered unit-level data.

mod read;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, MissingColumn};

/// Default name of the cluster (neighbourhood) id column.
pub const CLUSTER_COLUMN: &str = "neigh";
/// Default treatment column.
pub const TREATMENT_COLUMN: &str = "A";
/// Default outcome column.
pub const OUTCOME_COLUMN: &str = "Y";

/// Unit-level records grouped into clusters.
///
/// Every row carries a 1-based cluster id and one value per named numeric
/// column. Columns are stored column-major.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    clusters: Vec<usize>,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

/// Serialised form, checked on the way in.
#[derive(Deserialize)]
struct RawDataset {
    clusters: Vec<usize>,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = ConfigError;

    fn try_from(raw: RawDataset) -> Result<Self, Self::Error> {
        let data = Self::from_parts(raw.clusters, raw.names, raw.columns);
        data.check_shape()?;
        Ok(data)
    }
}

impl Dataset {
    /// Create a dataset from per-row cluster ids, with no columns yet.
    pub fn new(clusters: Vec<usize>) -> Self {
        Self {
            clusters,
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub(crate) fn from_parts(clusters: Vec<usize>, names: Vec<String>, columns: Vec<Vec<f64>>) -> Self {
        Self { clusters, names, columns }
    }

    /// Check that every column is named and holds one value per row.
    pub fn check_shape(&self) -> Result<(), ConfigError> {
        if self.names.len() != self.columns.len() {
            return Err(ConfigError::ColumnCount {
                names: self.names.len(),
                columns: self.columns.len(),
            });
        }
        match self
            .names
            .iter()
            .zip(&self.columns)
            .find(|(_, col)| col.len() != self.clusters.len())
        {
            Some((name, col)) => Err(ConfigError::ColumnLength {
                name: name.clone(),
                expected: self.clusters.len(),
                found: col.len(),
            }),
            None => Ok(()),
        }
    }

    /// Attach a named column; its length must match the row count.
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self, ConfigError> {
        let name = name.into();
        if self.names.contains(&name) {
            return Err(ConfigError::DuplicateColumn(name));
        }
        if values.len() != self.clusters.len() {
            return Err(ConfigError::ColumnLength {
                name,
                expected: self.clusters.len(),
                found: values.len(),
            });
        }
        self.names.push(name);
        self.columns.push(values);
        Ok(self)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Check if the dataset contains no records.
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Per-row cluster ids.
    pub fn clusters(&self) -> &[usize] {
        &self.clusters
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub(crate) fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Result<&[f64], MissingColumn> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|idx| self.columns.get(idx))
            .map(Vec::as_slice)
            .ok_or_else(|| MissingColumn(name.to_owned()))
    }

    /// Number of clusters, taken as the largest id present.
    pub fn n_clusters(&self) -> usize {
        self.clusters.iter().copied().max().unwrap_or(0)
    }

    /// Group row indices by cluster, checking that ids run `1..=n_clusters`
    /// with no zero and no gap, and that the columns are rectangular.
    pub fn partition(&self) -> Result<ClusterPartition, ConfigError> {
        if self.is_empty() {
            return Err(ConfigError::EmptyDataset);
        }
        self.check_shape()?;
        if let Some(row) = self.clusters.iter().position(|&id| id == 0) {
            return Err(ConfigError::ZeroClusterId { row });
        }

        let mut groups = vec![Vec::new(); self.n_clusters()];
        for (row, &id) in self.clusters.iter().enumerate() {
            if let Some(group) = groups.get_mut(id - 1) {
                group.push(row);
            }
        }
        if let Some(empty) = groups.iter().position(Vec::is_empty) {
            return Err(ConfigError::MissingCluster(empty + 1));
        }
        Ok(ClusterPartition { groups })
    }

    /// Design matrix `[1, x_1, .., x_p]` over the named columns.
    ///
    /// Short columns are padded with NaN; [`Dataset::check_shape`] rejects
    /// them up front.
    pub fn design(&self, columns: &[String]) -> Result<DMatrix<f64>, MissingColumn> {
        let n = self.len();
        let cols = columns
            .iter()
            .map(|name| self.column(name))
            .collect::<Result<Vec<_>, _>>()?;

        let values = std::iter::repeat_n(1.0, n).chain(
            cols.iter()
                .flat_map(|col| col.iter().copied().chain(std::iter::repeat(f64::NAN)).take(n)),
        );
        Ok(DMatrix::from_iterator(n, cols.len() + 1, values))
    }
}

/// Row indices of each cluster; entry `k` holds the rows of cluster `k + 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPartition {
    groups: Vec<Vec<usize>>,
}

impl ClusterPartition {
    /// Build from explicit groups.
    pub fn new(groups: Vec<Vec<usize>>) -> Self {
        Self { groups }
    }

    /// Number of clusters.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Check if there are no clusters.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Rows of the cluster at 0-based position `idx`.
    pub fn rows(&self, idx: usize) -> Option<&[usize]> {
        self.groups.get(idx).map(Vec::as_slice)
    }

    /// Iterate clusters in id order.
    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.groups.iter().map(Vec::as_slice)
    }

    /// Records per cluster.
    pub fn sizes(&self) -> Vec<usize> {
        self.groups.iter().map(Vec::len).collect()
    }
}
