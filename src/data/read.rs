use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;

use super::{CLUSTER_COLUMN, Dataset};
use crate::error::{ConfigError, ReadError};

impl Dataset {
    /// Read a headered CSV file whose `neigh` column holds cluster ids and
    /// whose remaining columns are numeric.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ReadError> {
        Self::read_with_cluster(path, CLUSTER_COLUMN)
    }

    /// Like [`Dataset::read`] with a custom cluster column name.
    pub fn read_with_cluster<P: AsRef<Path>>(path: P, cluster_column: &str) -> Result<Self, ReadError> {
        let rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;
        Self::from_csv(rdr, cluster_column)
    }

    /// Parse CSV from any reader.
    pub fn from_reader<R: Read>(reader: R, cluster_column: &str) -> Result<Self, ReadError> {
        let rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        Self::from_csv(rdr, cluster_column)
    }

    fn from_csv<R: Read>(mut rdr: csv::Reader<R>, cluster_column: &str) -> Result<Self, ReadError> {
        let headers = rdr.headers()?.clone();
        let cluster_idx = headers
            .iter()
            .position(|h| h == cluster_column)
            .ok_or_else(|| ReadError::MissingClusterColumn(cluster_column.to_owned()))?;

        let names: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != cluster_idx)
            .map(|(_, h)| h.to_owned())
            .collect();
        let duplicate = names
            .iter()
            .enumerate()
            .find_map(|(i, n)| names.iter().take(i).any(|m| m == n).then_some(n));
        if let Some(dup) = duplicate {
            return Err(ConfigError::DuplicateColumn(dup.clone()).into());
        }

        let mut clusters = Vec::new();
        let mut columns = vec![Vec::new(); names.len()];

        for (record_no, result) in rdr.records().enumerate() {
            let record = result?;
            let mut col = 0;
            for (i, field) in record.iter().enumerate() {
                let bad = || ReadError::Value {
                    record: record_no + 1,
                    column: headers.get(i).unwrap_or_default().to_owned(),
                    value: field.to_owned(),
                };
                if i == cluster_idx {
                    clusters.push(parse_cluster(field).ok_or_else(bad)?);
                } else {
                    let value = field.parse::<f64>().map_err(|_| bad())?;
                    if let Some(column) = columns.get_mut(col) {
                        column.push(value);
                    }
                    col += 1;
                }
            }
        }

        if clusters.is_empty() {
            return Err(ReadError::EmptyFile);
        }

        let data = Self::from_parts(clusters, names, columns);
        data.partition()?;
        Ok(data)
    }
}

// Ids written by numeric tools often come out as "3.0".
fn parse_cluster(field: &str) -> Option<usize> {
    field.parse::<usize>().ok().or_else(|| {
        let v = field.parse::<f64>().ok()?;
        (v >= 0.0 && v.fract() == 0.0).then_some(v as usize)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_cluster_and_numeric_columns() {
        let csv = "neigh,x,A,Y\n1,0.5,1,2.0\n1,-0.5,0,1.0\n2,1.5,1,3.0\n";
        let data = Dataset::from_reader(csv.as_bytes(), "neigh").unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.clusters(), &[1, 1, 2]);
        assert_eq!(data.column_names(), &["x", "A", "Y"]);
        let y = data.column("Y").unwrap();
        assert_eq!(y.len(), 3);
        assert!(y.iter().zip([2.0, 1.0, 3.0]).all(|(a, b)| (a - b).abs() < 1e-15));
    }

    #[test]
    fn accepts_float_formatted_ids() {
        let csv = "A,neigh\n1,1.0\n0,2.0\n";
        let data = Dataset::from_reader(csv.as_bytes(), "neigh").unwrap();
        assert_eq!(data.clusters(), &[1, 2]);
    }

    #[test]
    fn rejects_missing_cluster_column() {
        let csv = "x,A\n1,0\n";
        let err = Dataset::from_reader(csv.as_bytes(), "neigh").unwrap_err();
        assert!(matches!(err, ReadError::MissingClusterColumn(c) if c == "neigh"));
    }

    #[test]
    fn rejects_non_numeric_value() {
        let csv = "neigh,x\n1,abc\n";
        let err = Dataset::from_reader(csv.as_bytes(), "neigh").unwrap_err();
        assert!(matches!(err, ReadError::Value { record: 1, ref column, .. } if column == "x"));
    }

    #[test]
    fn rejects_empty_file_and_gaps() {
        let err = Dataset::from_reader("neigh,x\n".as_bytes(), "neigh").unwrap_err();
        assert!(matches!(err, ReadError::EmptyFile));

        let err = Dataset::from_reader("neigh,x\n1,0\n3,0\n".as_bytes(), "neigh").unwrap_err();
        assert!(matches!(err, ReadError::Config(ConfigError::MissingCluster(2))));
    }
}
